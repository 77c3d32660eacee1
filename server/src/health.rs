//! Plain HTTP on the WebSocket port.
//!
//! Hosting platforms check the public port with ordinary `GET` requests, so a
//! connection that is not asking for a WebSocket upgrade gets a small JSON
//! answer instead of a failed handshake: `/` reports that the server is up and
//! `/health` reports how many clients and players are registered.

use crate::arena::Arena;
use log::debug;
use serde_json::json;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

/// Largest request head inspected before giving up on a connection.
pub const MAX_REQUEST_HEAD: usize = 8 * 1024;
const PEEK_RETRY: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// A WebSocket handshake; left unread for the upgrade.
    Upgrade,
    Status,
    Health,
    NotFound,
    BadRequest,
}

fn header_end(head: &[u8]) -> Option<usize> {
    head.windows(4).position(|w| w == b"\r\n\r\n").map(|pos| pos + 4)
}

/// Decides what a complete request head is asking for.
pub fn route(head: &str) -> Route {
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let (Some(method), Some(target)) = (request_line.next(), request_line.next()) else {
        return Route::BadRequest;
    };

    let upgrade = lines.any(|line| match line.split_once(':') {
        Some((name, value)) => {
            name.trim().eq_ignore_ascii_case("upgrade")
                && value.to_ascii_lowercase().contains("websocket")
        }
        None => false,
    });
    if upgrade {
        return Route::Upgrade;
    }

    if method != "GET" && method != "HEAD" {
        return Route::NotFound;
    }
    match target.split('?').next().unwrap_or_default() {
        "/" => Route::Status,
        "/health" => Route::Health,
        _ => Route::NotFound,
    }
}

/// Peeks at the request head without consuming it. Plain requests have their
/// head consumed; upgrades are left intact for the WebSocket handshake.
pub async fn inspect(stream: &mut TcpStream) -> io::Result<Route> {
    let mut buf = vec![0u8; MAX_REQUEST_HEAD];

    loop {
        let peeked = stream.peek(&mut buf).await?;
        if peeked == 0 {
            return Err(io::ErrorKind::UnexpectedEof.into());
        }

        let (decided, consumed) = match header_end(&buf[..peeked]) {
            Some(end) => (route(&String::from_utf8_lossy(&buf[..end])), end),
            None if peeked == buf.len() => (Route::BadRequest, peeked),
            None => {
                // Peek returns at once while bytes are pending; wait for more.
                tokio::time::sleep(PEEK_RETRY).await;
                continue;
            }
        };

        if decided != Route::Upgrade {
            stream.read_exact(&mut buf[..consumed]).await?;
        }
        return Ok(decided);
    }
}

/// Writes the JSON answer for a plain request and closes the connection.
pub async fn respond(mut stream: TcpStream, route: Route, arena: &Arena) -> io::Result<()> {
    let (status, body) = match route {
        Route::Status => (
            "200 OK",
            json!({ "status": "ok", "message": "Game server online" }),
        ),
        Route::Health => {
            let (clients, players) = arena.counts().await;
            ("200 OK", json!({ "players": players, "clients": clients }))
        }
        Route::NotFound | Route::Upgrade => ("404 Not Found", json!({ "error": "not found" })),
        Route::BadRequest => ("400 Bad Request", json!({ "error": "bad request" })),
    };

    let body = body.to_string();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nAccess-Control-Allow-Origin: *\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    debug!("Answering plain HTTP request with {}", status);
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routes_plain_requests() {
        assert_eq!(route("GET / HTTP/1.1\r\nHost: x\r\n\r\n"), Route::Status);
        assert_eq!(route("GET /health HTTP/1.1\r\n\r\n"), Route::Health);
        assert_eq!(route("HEAD /health?full=1 HTTP/1.1\r\n\r\n"), Route::Health);
        assert_eq!(route("GET /metrics HTTP/1.1\r\n\r\n"), Route::NotFound);
        assert_eq!(route("POST /health HTTP/1.1\r\n\r\n"), Route::NotFound);
        assert_eq!(route("\r\n\r\n"), Route::BadRequest);
    }

    #[test]
    fn test_upgrade_wins_over_path() {
        let head = "GET /health HTTP/1.1\r\nHost: x\r\nConnection: Upgrade\r\nUpgrade: WebSocket\r\n\r\n";
        assert_eq!(route(head), Route::Upgrade);

        let other = "GET / HTTP/1.1\r\nUpgrade: h2c\r\n\r\n";
        assert_eq!(route(other), Route::Status);
    }

    #[test]
    fn test_header_end() {
        assert_eq!(header_end(b"GET / HTTP/1.1\r\n\r\nrest"), Some(18));
        assert_eq!(header_end(b"GET / HTTP/1.1\r\n"), None);
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let arena = Arena::new(4);

        let request = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\n\r\n")
                .await
                .unwrap();
            let mut response = String::new();
            stream.read_to_string(&mut response).await.unwrap();
            response
        });

        let (mut stream, _) = listener.accept().await.unwrap();
        let route = inspect(&mut stream).await.unwrap();
        assert_eq!(route, Route::Health);
        respond(stream, route, &arena).await.unwrap();

        let response = request.await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK\r\n"));
        let body = response.split("\r\n\r\n").nth(1).unwrap();
        let value: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(value, json!({ "players": 0, "clients": 0 }));
    }
}

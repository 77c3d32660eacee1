//! Connection drivers for the two transports.
//!
//! Both drivers follow the same shape: a writer task drains the connection's
//! bounded outbound queue onto the socket with a per-write timeout, while the
//! driver reads inbound units and feeds them to a [`Session`] in receipt order.
//! The connection ends when the peer closes, a read fails or idles out, or the
//! writer exits; the session is terminated on every one of those paths.

use crate::arena::Arena;
use crate::client_manager::{Frame, Transport};
use crate::health::{self, Route};
use crate::session::{Session, SessionFlow};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use log::{debug, warn};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{error::Elapsed, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

/// Per-connection limits, copied out of the server configuration.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub idle_timeout: Option<Duration>,
    pub send_timeout: Duration,
    pub outbound_queue: usize,
    pub max_line_bytes: usize,
}

/// Reads newline-terminated lines with an upper bound on line length.
///
/// Oversized lines are skipped up to their terminating newline. Invalid UTF-8
/// is replaced rather than treated as an error, so it surfaces later as an
/// ordinary malformed unit. A trailing fragment without a newline at end of
/// stream is discarded.
pub struct LineReader<R> {
    reader: BufReader<R>,
    buf: Vec<u8>,
    max_len: usize,
}

impl<R: AsyncRead + Unpin> LineReader<R> {
    pub fn new(reader: R, max_len: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            buf: Vec::new(),
            max_len,
        }
    }

    /// Returns the next line without its terminator, or `None` at end of stream.
    ///
    /// The length limit applies to the line content; a `\r\n` terminator
    /// does not count against it.
    pub async fn next_line(&mut self) -> io::Result<Option<String>> {
        loop {
            self.buf.clear();
            let limit = self.max_len as u64 + 2;
            let read = (&mut self.reader)
                .take(limit)
                .read_until(b'\n', &mut self.buf)
                .await?;

            if read == 0 {
                return Ok(None);
            }

            if self.buf.last() == Some(&b'\n') {
                self.buf.pop();
                if self.buf.last() == Some(&b'\r') {
                    self.buf.pop();
                }
                if self.buf.len() <= self.max_len {
                    return Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()));
                }
                warn!("Discarding inbound line longer than {} bytes", self.max_len);
                continue;
            }

            if (read as u64) < limit {
                // End of stream in the middle of a line.
                return Ok(None);
            }

            warn!("Discarding inbound line longer than {} bytes", self.max_len);
            if !self.skip_rest_of_line().await? {
                return Ok(None);
            }
        }
    }

    /// Consumes input up to and including the next newline. Returns false if
    /// the stream ended first.
    async fn skip_rest_of_line(&mut self) -> io::Result<bool> {
        loop {
            let available = self.reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(false);
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(pos) => {
                    self.reader.consume(pos + 1);
                    return Ok(true);
                }
                None => {
                    let len = available.len();
                    self.reader.consume(len);
                }
            }
        }
    }
}

/// Awaits `fut`, giving up after `limit` when one is set.
async fn with_idle_timeout<F: Future>(fut: F, limit: Option<Duration>) -> Result<F::Output, Elapsed> {
    match limit {
        Some(limit) => timeout(limit, fut).await,
        None => Ok(fut.await),
    }
}

/// Drains the outbound queue onto a byte stream, one line per frame.
pub async fn write_lines<W>(mut writer: W, mut outbound: mpsc::Receiver<Frame>, send_timeout: Duration)
where
    W: AsyncWrite + Unpin,
{
    let mut line = Vec::with_capacity(256);
    while let Some(frame) = outbound.recv().await {
        line.clear();
        line.extend_from_slice(frame.as_bytes());
        line.push(b'\n');

        match timeout(send_timeout, writer.write_all(&line)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("Write failed: {}", e);
                break;
            }
            Err(_) => {
                warn!("Write timed out after {:?}, dropping connection", send_timeout);
                break;
            }
        }
    }

    let _ = writer.shutdown().await;
}

/// Drains the outbound queue onto a WebSocket, one text frame per message.
async fn write_frames(
    mut sink: SplitSink<WebSocketStream<TcpStream>, Message>,
    mut outbound: mpsc::Receiver<Frame>,
    send_timeout: Duration,
) {
    while let Some(frame) = outbound.recv().await {
        let message = Message::Text(frame.to_string().into());
        match timeout(send_timeout, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                debug!("WebSocket send failed: {}", e);
                break;
            }
            Err(_) => {
                warn!("WebSocket send timed out after {:?}, dropping connection", send_timeout);
                break;
            }
        }
    }

    let _ = sink.close().await;
}

/// Runs one client on the newline-delimited stream transport.
pub async fn serve_tcp_client(
    stream: TcpStream,
    peer: SocketAddr,
    arena: Arc<Arena>,
    settings: ConnectionSettings,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", peer, e);
    }

    let (read_half, write_half) = stream.into_split();
    let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_queue);
    let mut writer = tokio::spawn(write_lines(write_half, outbound_rx, settings.send_timeout));
    let mut session = Session::new(arena, peer, Transport::Tcp, outbound_tx);
    let mut lines = LineReader::new(read_half, settings.max_line_bytes);

    debug!("TCP connection from {}", peer);

    loop {
        tokio::select! {
            read = with_idle_timeout(lines.next_line(), settings.idle_timeout) => match read {
                Ok(Ok(Some(line))) => {
                    if session.handle_line(&line).await == SessionFlow::Close {
                        break;
                    }
                }
                Ok(Ok(None)) => {
                    debug!("{} closed the connection", peer);
                    break;
                }
                Ok(Err(e)) => {
                    debug!("Read error from {}: {}", peer, e);
                    break;
                }
                Err(_) => {
                    debug!("{} idle for too long", peer);
                    break;
                }
            },
            _ = &mut writer => {
                debug!("Outbound path to {} closed", peer);
                break;
            }
        }
    }

    session.terminate().await;
    writer.abort();
}

/// Runs one client on the WebSocket transport. Plain HTTP requests on the
/// same port are answered by [`health`] instead.
pub async fn serve_ws_client(
    mut stream: TcpStream,
    peer: SocketAddr,
    arena: Arc<Arena>,
    settings: ConnectionSettings,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Could not disable Nagle for {}: {}", peer, e);
    }

    match with_idle_timeout(health::inspect(&mut stream), settings.idle_timeout).await {
        Ok(Ok(Route::Upgrade)) => {}
        Ok(Ok(route)) => {
            if let Err(e) = health::respond(stream, route, &arena).await {
                debug!("HTTP response to {} failed: {}", peer, e);
            }
            return;
        }
        Ok(Err(e)) => {
            debug!("Could not read request from {}: {}", peer, e);
            return;
        }
        Err(_) => {
            debug!("Request from {} timed out", peer);
            return;
        }
    }

    let handshake = with_idle_timeout(tokio_tungstenite::accept_async(stream), settings.idle_timeout);
    let ws_stream = match handshake.await {
        Ok(Ok(ws_stream)) => ws_stream,
        Ok(Err(e)) => {
            debug!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            debug!("WebSocket handshake with {} timed out", peer);
            return;
        }
    };

    let (sink, mut source) = ws_stream.split();
    let (outbound_tx, outbound_rx) = mpsc::channel(settings.outbound_queue);
    let mut writer = tokio::spawn(write_frames(sink, outbound_rx, settings.send_timeout));
    let mut session = Session::new(arena, peer, Transport::WebSocket, outbound_tx);

    debug!("WebSocket connection from {}", peer);

    loop {
        tokio::select! {
            read = with_idle_timeout(source.next(), settings.idle_timeout) => match read {
                Ok(Some(Ok(Message::Text(text)))) => {
                    if session.handle_line(text.as_str()).await == SessionFlow::Close {
                        break;
                    }
                }
                Ok(Some(Ok(Message::Binary(_)))) => {
                    debug!("Ignoring binary frame from {}", peer);
                }
                Ok(Some(Ok(Message::Close(_)))) | Ok(None) => {
                    debug!("{} closed the connection", peer);
                    break;
                }
                // Control frames are answered by tungstenite itself.
                Ok(Some(Ok(_))) => {}
                Ok(Some(Err(e))) => {
                    debug!("WebSocket error from {}: {}", peer, e);
                    break;
                }
                Err(_) => {
                    debug!("{} idle for too long", peer);
                    break;
                }
            },
            _ = &mut writer => {
                debug!("Outbound path to {} closed", peer);
                break;
            }
        }
    }

    session.terminate().await;
    writer.abort();
}

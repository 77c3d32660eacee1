use log::{debug, info, trace};
use shared::{
    decode_server_message, encode_message, ClientId, ClientMessage, Hello, ProtocolError,
    ServerMessage,
};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout_at, Instant};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),
    #[error("connection closed by server")]
    Closed,
}

/// A connection to the relay over the newline-delimited JSON transport.
pub struct Client {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    client_id: Option<ClientId>,
}

impl Client {
    pub async fn connect(server_addr: &str) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(server_addr).await?;
        stream.set_nodelay(true)?;
        let (read_half, writer) = stream.into_split();

        debug!("Connected to {}", server_addr);

        Ok(Client {
            lines: BufReader::new(read_half).lines(),
            writer,
            client_id: None,
        })
    }

    /// The id assigned by the server, once the handshake has completed.
    pub fn client_id(&self) -> Option<ClientId> {
        self.client_id
    }

    pub async fn send(&mut self, message: &ClientMessage) -> Result<(), ClientError> {
        let line = encode_message(message)?;
        self.send_raw(&line).await
    }

    /// Writes one line verbatim. Useful for probing how the server treats
    /// malformed input.
    pub async fn send_raw(&mut self, line: &str) -> Result<(), ClientError> {
        let mut buf = Vec::with_capacity(line.len() + 1);
        buf.extend_from_slice(line.as_bytes());
        buf.push(b'\n');
        self.writer.write_all(&buf).await?;
        Ok(())
    }

    /// Performs the handshake and returns the assigned id.
    pub async fn hello(&mut self, hello: Hello, wait: Duration) -> Result<ClientId, ClientError> {
        self.send(&ClientMessage::Hello(hello)).await?;

        match self
            .wait_for(wait, |msg| matches!(msg, ServerMessage::Welcome { .. }))
            .await
        {
            Ok(ServerMessage::Welcome { id }) => {
                info!("Connected! Client ID: {}", id);
                self.client_id = Some(id);
                Ok(id)
            }
            Ok(_) => Err(ClientError::Closed),
            Err(ClientError::Timeout(_)) => Err(ClientError::Timeout("welcome")),
            Err(e) => Err(e),
        }
    }

    /// Receives the next well-formed server message, skipping anything that
    /// does not decode.
    pub async fn recv(&mut self) -> Result<ServerMessage, ClientError> {
        loop {
            let Some(line) = self.lines.next_line().await? else {
                return Err(ClientError::Closed);
            };
            if line.trim().is_empty() {
                continue;
            }
            match decode_server_message(&line) {
                Ok(message) => return Ok(message),
                Err(e) => trace!("Skipping undecodable line: {}", e),
            }
        }
    }

    pub async fn recv_timeout(&mut self, wait: Duration) -> Result<ServerMessage, ClientError> {
        timeout_at(Instant::now() + wait, self.recv())
            .await
            .map_err(|_| ClientError::Timeout("message"))?
    }

    /// Receives until `predicate` accepts a message, discarding the others.
    pub async fn wait_for<F>(
        &mut self,
        wait: Duration,
        mut predicate: F,
    ) -> Result<ServerMessage, ClientError>
    where
        F: FnMut(&ServerMessage) -> bool,
    {
        let deadline = Instant::now() + wait;
        loop {
            let message = timeout_at(deadline, self.recv())
                .await
                .map_err(|_| ClientError::Timeout("matching message"))??;
            if predicate(&message) {
                return Ok(message);
            }
        }
    }

    /// Closes the write side so the server sees end of stream.
    pub async fn shutdown(&mut self) -> Result<(), ClientError> {
        self.writer.shutdown().await?;
        Ok(())
    }
}

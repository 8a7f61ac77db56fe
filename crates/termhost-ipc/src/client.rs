//! Client side of a session socket, used to reach sessions owned by another
//! process.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::net::unix::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::error::ClientError;
use crate::protocol::MessageParser;
use crate::socket::validate_socket_path;
use crate::types::{KillSignal, Message};

pub struct SocketClient {
    path: PathBuf,
    writer: Arc<Mutex<OwnedWriteHalf>>,
    incoming: mpsc::UnboundedReceiver<Message>,
    reader: JoinHandle<()>,
}

impl SocketClient {
    pub async fn connect(path: &Path) -> Result<Self, ClientError> {
        validate_socket_path(path)?;
        let stream = UnixStream::connect(path).await?;
        let (mut read_half, write_half) = stream.into_split();
        let writer = Arc::new(Mutex::new(write_half));
        let (tx, incoming) = mpsc::unbounded_channel();

        let echo = Arc::clone(&writer);
        let socket = path.display().to_string();
        let reader = tokio::spawn(async move {
            let mut parser = MessageParser::default();
            let mut buf = vec![0u8; 8192];
            loop {
                let n = match read_half.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) => {
                        debug!(socket = %socket, error = %e, "Session socket read failed");
                        break;
                    }
                };
                parser.add_data(&buf[..n]);

                loop {
                    let frame = match parser.next_frame() {
                        Ok(Some(frame)) => frame,
                        Ok(None) => break,
                        Err(e) => {
                            warn!(socket = %socket, error = %e, "Dropping session connection");
                            return;
                        }
                    };
                    match Message::decode(frame) {
                        Ok(Message::Heartbeat) => {
                            let frame = Message::Heartbeat.to_frame();
                            if let Err(e) = echo.lock().await.write_all(&frame).await {
                                debug!(socket = %socket, error = %e, "Heartbeat echo failed");
                            }
                        }
                        Ok(message) => {
                            if tx.send(message).is_err() {
                                return;
                            }
                        }
                        Err(e) => warn!(socket = %socket, error = %e, "Ignoring malformed message"),
                    }
                }
            }
        });

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            incoming,
            reader,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_connected(&self) -> bool {
        !self.reader.is_finished()
    }

    pub async fn send(&self, message: &Message) -> Result<(), ClientError> {
        if self.reader.is_finished() {
            return Err(ClientError::ConnectionClosed);
        }
        let frame = message.to_frame();
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn send_stdin(&self, data: &str) -> Result<(), ClientError> {
        self.send(&Message::Stdin(data.to_string())).await
    }

    pub async fn resize(&self, cols: u16, rows: u16) -> Result<(), ClientError> {
        self.send(&Message::resize(cols, rows)).await
    }

    pub async fn kill(&self, signal: Option<KillSignal>) -> Result<(), ClientError> {
        self.send(&Message::kill(signal)).await
    }

    pub async fn reset_size(&self) -> Result<(), ClientError> {
        self.send(&Message::reset_size()).await
    }

    pub async fn update_title(&self, title: &str) -> Result<(), ClientError> {
        self.send(&Message::update_title(title)).await
    }

    pub async fn send_status(&self, app: &str, status: &str) -> Result<(), ClientError> {
        self.send(&Message::status(app, status)).await
    }

    /// Next status or error message pushed by the session, `None` once closed.
    pub async fn recv(&mut self) -> Option<Message> {
        self.incoming.recv().await
    }

    pub async fn disconnect(self) {
        self.reader.abort();
        let mut writer = self.writer.lock().await;
        let _ = writer.shutdown().await;
    }
}

impl Drop for SocketClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

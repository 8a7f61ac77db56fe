//! Per-session control socket.
//!
//! Every peer connection gets its own [`MessageParser`]. Heartbeats are
//! answered in place, status updates are relayed to the other peers, and
//! everything else is handed to the controller through an event channel.
//! A framing error closes the offending connection only.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use termhost_common::mutex_lock_or_recover;
use termhost_ipc::{ControlCommand, Message, MessageParser, StatusUpdate, validate_socket_path};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, info, warn};

use crate::error::SessionError;

pub type PeerId = u64;

#[derive(Debug, Clone, PartialEq)]
pub enum EndpointEvent {
    Stdin(String),
    Control(ControlCommand),
    Status { peer: PeerId, update: StatusUpdate },
}

struct Peer {
    outgoing: mpsc::UnboundedSender<Vec<u8>>,
    task: AbortHandle,
}

type PeerMap = Arc<Mutex<HashMap<PeerId, Peer>>>;

pub struct ControlEndpoint {
    path: PathBuf,
    peers: PeerMap,
    accept: JoinHandle<()>,
}

impl ControlEndpoint {
    /// Binds the socket, replacing a stale socket file from an earlier run.
    pub fn bind(
        path: &Path,
        max_frame_bytes: usize,
        events: mpsc::UnboundedSender<EndpointEvent>,
    ) -> Result<Self, SessionError> {
        validate_socket_path(path)?;

        let bind_error = |e: std::io::Error| SessionError::Endpoint {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        match std::fs::remove_file(path) {
            Ok(()) => debug!(socket = %path.display(), "Removed stale session socket"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(bind_error(e)),
        }
        let listener = UnixListener::bind(path).map_err(bind_error)?;

        let peers: PeerMap = Arc::new(Mutex::new(HashMap::new()));
        let accept = tokio::spawn(accept_loop(
            listener,
            path.to_path_buf(),
            Arc::clone(&peers),
            events,
            max_frame_bytes,
        ));

        info!(socket = %path.display(), "Session socket listening");
        Ok(Self {
            path: path.to_path_buf(),
            peers,
            accept,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn peer_count(&self) -> usize {
        mutex_lock_or_recover(&self.peers).len()
    }

    /// Sends `message` to every connected peer except `except`.
    pub fn broadcast(&self, message: &Message, except: Option<PeerId>) {
        broadcast(&self.peers, message, except);
    }

    /// Stops accepting, disconnects every peer and removes the socket file.
    pub fn close(&self) {
        self.accept.abort();
        disconnect_all(&self.peers);
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(socket = %self.path.display(), error = %e, "Failed to remove session socket");
            }
        }
    }
}

impl Drop for ControlEndpoint {
    fn drop(&mut self) {
        self.accept.abort();
        disconnect_all(&self.peers);
    }
}

/// Aborting a peer task drops both halves of its stream, so the peer reads EOF.
fn disconnect_all(peers: &PeerMap) {
    let drained: Vec<(PeerId, Peer)> = mutex_lock_or_recover(peers).drain().collect();
    for (id, peer) in drained {
        peer.task.abort();
        debug!(peer = id, "Peer disconnected by endpoint close");
    }
}

fn broadcast(peers: &PeerMap, message: &Message, except: Option<PeerId>) {
    let frame = message.to_frame();
    let peers = mutex_lock_or_recover(peers);
    for (id, peer) in peers.iter() {
        if Some(*id) == except {
            continue;
        }
        // A closed channel means the peer is disconnecting; it removes itself.
        let _ = peer.outgoing.send(frame.clone());
    }
}

async fn accept_loop(
    listener: UnixListener,
    path: PathBuf,
    peers: PeerMap,
    events: mpsc::UnboundedSender<EndpointEvent>,
    max_frame_bytes: usize,
) {
    let next_id = AtomicU64::new(1);
    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                debug!(socket = %path.display(), peer = id, "Peer connected");
                let (outgoing, rx) = mpsc::unbounded_channel();
                // Held across the spawn so the task cannot deregister before it is registered.
                let mut map = mutex_lock_or_recover(&peers);
                let task = tokio::spawn(serve_peer(
                    stream,
                    id,
                    Arc::clone(&peers),
                    rx,
                    events.clone(),
                    max_frame_bytes,
                ));
                map.insert(
                    id,
                    Peer {
                        outgoing,
                        task: task.abort_handle(),
                    },
                );
            }
            Err(e) => {
                warn!(socket = %path.display(), error = %e, "Accept failed");
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
    }
}

enum Step {
    Write(Vec<Vec<u8>>),
    Close,
}

async fn serve_peer(
    stream: UnixStream,
    peer: PeerId,
    peers: PeerMap,
    mut outgoing: mpsc::UnboundedReceiver<Vec<u8>>,
    events: mpsc::UnboundedSender<EndpointEvent>,
    max_frame_bytes: usize,
) {
    let (mut read_half, mut write_half) = stream.into_split();
    let mut parser = MessageParser::new(max_frame_bytes);
    let mut buf = vec![0u8; 8192];

    loop {
        let step = tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(frame) => Step::Write(vec![frame]),
                None => Step::Close,
            },
            read = read_half.read(&mut buf) => match read {
                Ok(0) => Step::Close,
                Ok(n) => {
                    parser.add_data(&buf[..n]);
                    handle_frames(&mut parser, peer, &peers, &events)
                }
                Err(e) => {
                    debug!(peer, error = %e, "Peer read failed");
                    Step::Close
                }
            },
        };

        let Step::Write(frames) = step else {
            break;
        };
        if let Err(e) = write_frames(&mut write_half, &frames).await {
            debug!(peer, error = %e, "Peer write failed");
            break;
        }
    }

    mutex_lock_or_recover(&peers).remove(&peer);
    debug!(peer, "Peer disconnected");
}

async fn write_frames(writer: &mut OwnedWriteHalf, frames: &[Vec<u8>]) -> std::io::Result<()> {
    for frame in frames {
        writer.write_all(frame).await?;
    }
    Ok(())
}

/// Dispatches every complete frame. Returns the replies owed to this peer.
fn handle_frames(
    parser: &mut MessageParser,
    peer: PeerId,
    peers: &PeerMap,
    events: &mpsc::UnboundedSender<EndpointEvent>,
) -> Step {
    let mut replies = Vec::new();
    loop {
        let frame = match parser.next_frame() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Step::Write(replies),
            Err(e) => {
                warn!(peer, error = %e, "Dropping peer after framing error");
                return Step::Close;
            }
        };
        let message = match Message::decode(frame) {
            Ok(message) => message,
            Err(e) => {
                warn!(peer, error = %e, "Ignoring malformed message");
                continue;
            }
        };

        let event = match message {
            Message::Heartbeat => {
                replies.push(Message::Heartbeat.to_frame());
                continue;
            }
            Message::Error(err) => {
                debug!(peer, code = %err.code, message = %err.message, "Peer reported error");
                continue;
            }
            Message::Status(update) => {
                broadcast(peers, &Message::Status(update.clone()), Some(peer));
                EndpointEvent::Status { peer, update }
            }
            Message::Stdin(text) => EndpointEvent::Stdin(text),
            Message::Control(cmd) => EndpointEvent::Control(cmd),
        };
        if events.send(event).is_err() {
            return Step::Close;
        }
    }
}

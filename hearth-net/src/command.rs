//! TCP command channel.
//!
//! A server accepts one length-prefixed request per connection and hands it
//! to the owning task through a capacity-1 queue; the connection stays open
//! until that task replies through the [`CommandMessage`]. The capacity of 1
//! is the admission policy: only one in-flight, not-yet-replied-to command
//! exists at a time, so a second client's `send` blocks until the first has
//! been answered and pulled off the queue.

use std::net::SocketAddr;
use std::time::Duration;

use serde_json::Value;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::NetError;
use crate::frame;
use crate::wire::{Reply, Request};

/// Default control-channel port.
pub const DEFAULT_CONTROL_PORT: u16 = 55100;
/// Default control-channel host.
pub const DEFAULT_HOST: &str = "127.0.0.1";
/// Bound on reading one request frame from an accepted connection.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(1);

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// One accepted command, owning its connection. Replying consumes the
/// message, so each command is answered at most once and the connection is
/// never reused.
pub struct CommandMessage {
    stream: TcpStream,
    payload: Value,
    peer: SocketAddr,
}

impl CommandMessage {
    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Send the reply payload back to the waiting client.
    pub async fn send_reply(self, payload: Value) -> Result<(), NetError> {
        self.finish(Reply::ok(payload)).await
    }

    /// Send a failure back to the waiting client. The error crosses the wire
    /// as formatted text, never as a live error object.
    pub async fn send_error(self, error: impl std::fmt::Display) -> Result<(), NetError> {
        let message = error.to_string();
        debug!(peer = %self.peer, error = %message, "replying with error");
        self.finish(Reply::error(message)).await
    }

    async fn finish(mut self, reply: Reply) -> Result<(), NetError> {
        let bytes = frame::encode(&reply)?;
        frame::write_frame(&mut self.stream, &bytes).await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Accepts connections on a background task and exposes the bounded queue
/// of pending commands to the owning task.
pub struct CommandServer {
    queue: mpsc::Receiver<CommandMessage>,
    shutdown: watch::Sender<bool>,
    listener_task: JoinHandle<Result<(), NetError>>,
    local_addr: SocketAddr,
}

impl CommandServer {
    /// Bind the listener and spawn the accept loop.
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self, NetError> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let (queue_tx, queue_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(addr = %local_addr, "command channel listening");
        let listener_task = tokio::spawn(accept_loop(listener, queue_tx, shutdown_rx));

        Ok(Self {
            queue: queue_rx,
            shutdown: shutdown_tx,
            listener_task,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Pull the next command, waiting indefinitely. Returns `None` once the
    /// listener has stopped and the queue drained.
    pub async fn recv(&mut self) -> Option<CommandMessage> {
        self.queue.recv().await
    }

    /// Pull the next command, waiting at most `timeout`. The bounded wait is
    /// what lets a dispatch loop interleave queue polling with liveness
    /// checks without busy-waiting. `Ok(None)` means the wait elapsed; an
    /// error means the accept loop is gone and no command can ever arrive.
    pub async fn recv_timeout(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<CommandMessage>, NetError> {
        match tokio::time::timeout(timeout, self.queue.recv()).await {
            Err(_) => Ok(None),
            Ok(Some(message)) => Ok(Some(message)),
            Ok(None) => Err(NetError::ListenerStopped),
        }
    }

    /// Signal the accept loop to stop and wait for it to finish.
    pub async fn shutdown(self) -> Result<(), NetError> {
        let _ = self.shutdown.send(true);
        // Dropping the receiver unblocks a push stalled on a full queue.
        drop(self.queue);
        match self.listener_task.await {
            Ok(result) => result,
            Err(err) => Err(NetError::TaskJoin(err.to_string())),
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    queue: mpsc::Sender<CommandMessage>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), NetError> {
    loop {
        let (stream, peer) = tokio::select! {
            _ = shutdown.changed() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                // Transient failures (ECONNABORTED, fd exhaustion) must not
                // take the listener down.
                Err(err) => {
                    warn!(error = %err, "accept failed");
                    continue;
                }
            },
        };

        // The request is read inline: the channel serves one connection at
        // a time by design, so a new accept waits for the previous frame.
        // The read is bounded so a silent peer cannot wedge the loop.
        let message = tokio::select! {
            _ = shutdown.changed() => break,
            read = tokio::time::timeout(REQUEST_READ_TIMEOUT, read_request(stream, peer)) => {
                match read {
                    Ok(Ok(message)) => message,
                    Ok(Err(err)) => {
                        warn!(%peer, error = %err, "dropping malformed command request");
                        continue;
                    }
                    Err(_) => {
                        warn!(%peer, "dropping idle connection");
                        continue;
                    }
                }
            }
        };

        // Blocks while a previous command is still outstanding.
        tokio::select! {
            _ = shutdown.changed() => break,
            pushed = queue.send(message) => {
                if pushed.is_err() {
                    break;
                }
            }
        }
    }

    info!("command channel stopped");
    Ok(())
}

async fn read_request(
    mut stream: TcpStream,
    peer: SocketAddr,
) -> Result<CommandMessage, NetError> {
    let bytes = frame::read_frame(&mut stream).await?;
    let request = frame::decode::<Request>(&bytes)?.validate()?;
    debug!(%peer, "accepted command request");
    Ok(CommandMessage {
        stream,
        payload: request.into_payload(),
        peer,
    })
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// Opens a fresh connection per call: one framed request out, one framed
/// reply back, then the connection is closed. Retry policy belongs to the
/// caller; transport failures propagate unchanged.
#[derive(Debug, Clone)]
pub struct CommandClient {
    host: String,
    port: u16,
}

impl CommandClient {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Send one command and block until the reply arrives.
    pub async fn send(&self, payload: Value) -> Result<Value, NetError> {
        let mut stream = TcpStream::connect((self.host.as_str(), self.port)).await?;
        debug!(host = %self.host, port = self.port, "connected to command channel");

        let request = frame::encode(&Request::new(payload))?;
        frame::write_frame(&mut stream, &request).await?;

        let bytes = frame::read_frame(&mut stream).await?;
        let reply = frame::decode::<Reply>(&bytes)
            .and_then(Reply::validate)
            .map_err(|_| NetError::MalformedReply)?;

        reply.into_result().map_err(NetError::Remote)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn recv_timeout_distinguishes_quiet_from_stopped() {
        let mut server = CommandServer::bind("127.0.0.1:0").await.expect("bind");

        // Quiet channel: the bounded wait elapses.
        let got = server
            .recv_timeout(Duration::from_millis(50))
            .await
            .expect("listener alive");
        assert!(got.is_none());

        // Dead listener: the queue closes and the caller is told, instead
        // of every poll returning instantly as if it had merely timed out.
        server.listener_task.abort();
        let err = loop {
            match server.recv_timeout(Duration::from_millis(50)).await {
                Ok(None) => continue, // abort not yet observed
                Ok(Some(_)) => panic!("no command was sent"),
                Err(err) => break err,
            }
        };
        assert!(matches!(err, NetError::ListenerStopped));
    }
}

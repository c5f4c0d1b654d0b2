//! Multiplexed server endpoint
//!
//! One listener serves many concurrently connected callers. The transport
//! tags every inbound connection with a stable [`ConnectionId`]; each
//! envelope is dispatched on its own task and the reply is routed back
//! through the connection's writer, so a slow call never blocks its
//! neighbours and replies may leave in any order. A peer that dies
//! mid-call tears down only its own connection tasks.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::BufReader;
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::codec;
use super::{CallEnvelope, ErrorReply, ReplyEnvelope};

/// Stable identity assigned to an inbound connection by the transport
pub type ConnectionId = Uuid;

/// Server-side envelope processing, implemented by the command dispatcher
///
/// `handle` must never panic across this boundary with work left undone;
/// the dispatcher converts handler failures into error replies.
pub trait EnvelopeHandler: Send + Sync + 'static {
    /// Produce the reply for one inbound call.
    fn handle(&self, connection: ConnectionId, call: CallEnvelope) -> ReplyEnvelope;
}

/// A listening multiplexed endpoint
pub struct ChannelServer {
    local_addr: SocketAddr,
    accept: JoinHandle<()>,
    connections: Arc<parking_lot::Mutex<Vec<JoinHandle<()>>>>,
}

impl ChannelServer {
    /// Bind `addr` and start serving envelopes through `handler`.
    ///
    /// Binding port 0 picks an ephemeral port; [`ChannelServer::port`]
    /// reports the actual one for registration.
    pub async fn bind<A: ToSocketAddrs>(
        addr: A,
        handler: Arc<dyn EnvelopeHandler>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let connections: Arc<parking_lot::Mutex<Vec<JoinHandle<()>>>> =
            Arc::new(parking_lot::Mutex::new(Vec::new()));

        let accept = {
            let connections = connections.clone();
            tokio::spawn(async move {
                loop {
                    match listener.accept().await {
                        Ok((stream, peer)) => {
                            let connection = Uuid::new_v4();
                            tracing::debug!(%connection, %peer, "accepted connection");
                            let handles = serve_connection(stream, connection, handler.clone());
                            let mut guard = connections.lock();
                            guard.retain(|handle| !handle.is_finished());
                            guard.extend(handles);
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to accept connection");
                        }
                    }
                }
            })
        };

        Ok(Self {
            local_addr,
            accept,
            connections,
        })
    }

    /// The address this server is listening on.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// The port this server is listening on.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    /// Stop accepting connections and tear down the ones still open.
    pub async fn shutdown(self) {
        self.accept.abort();
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.connections.lock());
        for handle in &handles {
            handle.abort();
        }
        let _ = futures::future::join_all(handles).await;
    }
}

impl Drop for ChannelServer {
    fn drop(&mut self) {
        self.accept.abort();
        for handle in self.connections.lock().iter() {
            handle.abort();
        }
    }
}

/// Spawn the reader and writer tasks for one connection.
fn serve_connection(
    stream: TcpStream,
    connection: ConnectionId,
    handler: Arc<dyn EnvelopeHandler>,
) -> Vec<JoinHandle<()>> {
    let (read_half, write_half) = stream.into_split();
    let (reply_tx, mut reply_rx) = mpsc::channel::<ReplyEnvelope>(32);

    // Writer: sole owner of the socket's write half. Replies from any
    // dispatch task funnel through here, which is what routes a reply back
    // to the connection that issued the call.
    let writer = tokio::spawn(async move {
        let mut write_half = write_half;
        while let Some(reply) = reply_rx.recv().await {
            if let Err(err) = codec::write_frame(&mut write_half, &reply).await {
                tracing::debug!(%connection, error = %err, "reply write failed, closing");
                break;
            }
        }
    });

    let reader = tokio::spawn(async move {
        let mut reader = BufReader::new(read_half);
        loop {
            let line = match codec::read_line(&mut reader).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(err) => {
                    tracing::debug!(%connection, error = %err, "read failed, closing");
                    break;
                }
            };

            let call: CallEnvelope = match serde_json::from_str(&line) {
                Ok(call) => call,
                Err(err) => {
                    // No token to correlate with; the nil token marks a
                    // reply to an unparseable envelope.
                    let reply = ReplyEnvelope::failure(
                        Uuid::nil(),
                        ErrorReply::parse_error(err.to_string()),
                    );
                    if reply_tx.send(reply).await.is_err() {
                        break;
                    }
                    continue;
                }
            };

            let handler = handler.clone();
            let reply_tx = reply_tx.clone();
            tokio::task::spawn_blocking(move || {
                let reply = handler.handle(connection, call);
                let _ = reply_tx.blocking_send(reply);
            });
        }
        tracing::debug!(%connection, "connection closed");
    });

    vec![reader, writer]
}

//! Point-to-point client channel
//!
//! One proxy talking to one dispatcher with strict request-then-reply
//! ordering: a second call on the same channel waits until the previous
//! reply (or its timeout) resolves. There is no built-in retry; every
//! failure is surfaced as a typed [`ChannelError`] and retry policy stays
//! with the caller.

use std::time::Duration;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;

use super::codec;
use super::{CallEnvelope, Endpoint, ReplyEnvelope};
use crate::config::TimeoutConfig;
use crate::error::{ChannelError, ChannelResult};

struct ChannelIo {
    reader: BufReader<OwnedReadHalf>,
    writer: OwnedWriteHalf,
}

/// A connected point-to-point channel to one server endpoint
pub struct ClientChannel {
    endpoint: Endpoint,
    timeouts: TimeoutConfig,
    io: Mutex<ChannelIo>,
}

impl ClientChannel {
    /// Connect to `endpoint` within the configured connect timeout.
    pub async fn connect(endpoint: Endpoint, timeouts: TimeoutConfig) -> ChannelResult<Self> {
        let stream = tokio::time::timeout(timeouts.connect, TcpStream::connect(endpoint.addr()))
            .await
            .map_err(|_| ChannelError::ConnectTimeout {
                endpoint: endpoint.to_string(),
                timeout: timeouts.connect,
            })?
            .map_err(|err| ChannelError::SendFailure(format!("connect to {endpoint}: {err}")))?;

        let (read_half, write_half) = stream.into_split();
        Ok(Self {
            endpoint,
            timeouts,
            io: Mutex::new(ChannelIo {
                reader: BufReader::new(read_half),
                writer: write_half,
            }),
        })
    }

    /// The endpoint this channel is connected to.
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Send `call` and wait for its reply using the default request timeout.
    pub async fn call(&self, call: &CallEnvelope) -> ChannelResult<ReplyEnvelope> {
        self.call_with_deadline(call, self.timeouts.request).await
    }

    /// Send `call` and wait at most `deadline` for the matching reply.
    ///
    /// Replies whose correlation token does not match are discarded: they
    /// are stragglers from an earlier call that timed out, and skipping
    /// them keeps the connection usable. The deadline covers the whole
    /// round-trip including any discarded stragglers.
    pub async fn call_with_deadline(
        &self,
        call: &CallEnvelope,
        deadline: Duration,
    ) -> ChannelResult<ReplyEnvelope> {
        let mut io = self.io.lock().await;

        codec::write_frame(&mut io.writer, call)
            .await
            .map_err(|err| ChannelError::SendFailure(err.to_string()))?;

        let wait = async {
            loop {
                let line = codec::read_line(&mut io.reader)
                    .await
                    .map_err(|err| ChannelError::SendFailure(err.to_string()))?
                    .ok_or_else(|| {
                        ChannelError::SendFailure("connection closed by peer".to_string())
                    })?;

                let reply: ReplyEnvelope = serde_json::from_str(&line)
                    .map_err(|err| ChannelError::MalformedReply(err.to_string()))?;

                if reply.token == call.token {
                    return Ok(reply);
                }
                tracing::warn!(
                    expected = %call.token,
                    received = %reply.token,
                    "discarding stale reply with mismatched correlation token"
                );
            }
        };

        tokio::time::timeout(deadline, wait)
            .await
            .map_err(|_| ChannelError::ReplyTimeout(deadline))?
    }
}

use std::net::SocketAddr;

use futures::{SinkExt, StreamExt};
use hopctl_wire::{Codec, Envelope};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use crate::{ExponentialBackoff, Push, PushOptions, TransportError};

/// Pushes every envelope over a fresh TCP connection.
///
/// No connection outlives a single push.
#[derive(Debug, Default, Clone)]
pub struct TcpPush {
    options: PushOptions,
}

impl TcpPush {
    pub fn new(options: PushOptions) -> Self {
        Self { options }
    }

    /// A single connect-send-close attempt, bounded by the configured timeout.
    async fn attempt(&self, peer: SocketAddr, envelope: &Envelope) -> Result<(), TransportError> {
        let send = async {
            let stream = TcpStream::connect(peer).await?;
            stream.set_nodelay(true)?;

            // `send` flushes, the connection is closed on drop.
            let mut framed = Framed::new(stream, Codec::new());
            framed.send(envelope).await?;

            Ok::<_, TransportError>(())
        };

        tokio::time::timeout(self.options.timeout, send)
            .await
            .map_err(|_| TransportError::Timeout(self.options.timeout))?
    }
}

#[async_trait::async_trait]
impl Push for TcpPush {
    async fn push(&self, peer: SocketAddr, envelope: &Envelope) -> Result<(), TransportError> {
        let mut backoff = ExponentialBackoff::new(self.options.backoff, Some(self.options.retries));
        let mut attempts = 0;

        loop {
            attempts += 1;

            let error = match self.attempt(peer, envelope).await {
                Ok(()) => {
                    tracing::debug!(%peer, sequence = envelope.sequence, attempts, "pushed");
                    return Ok(());
                }
                Err(e) => e,
            };

            tracing::debug!(%peer, attempts, error = %error, "push attempt failed");

            if backoff.next().await.is_none() {
                return Err(TransportError::Exhausted { peer, attempts, last: Box::new(error) });
            }
        }
    }
}

#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

//! Delivery of [`Envelope`]s between hopctl peers.
//!
//! The sending side is a [`Push`]: fire one envelope at a peer and return once it has been
//! written, with no acknowledgment from the application. The receiving side is a [`Listener`]
//! that deposits everything it decodes into an [`Inbox`], which the control loop drains at the
//! top of each cycle.

use std::{io, net::SocketAddr, time::Duration};

use hopctl_wire::Envelope;

mod backoff;
pub use backoff::ExponentialBackoff;

mod inbox;
pub use inbox::Inbox;

mod listener;
pub use listener::Listener;

mod tcp;
pub use tcp::TcpPush;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Wire protocol error: {0}")]
    Wire(#[from] hopctl_wire::Error),
    #[error("Push timed out after {0:?}")]
    Timeout(Duration),
    #[error("Push to {peer} failed after {attempts} attempts: {last}")]
    Exhausted { peer: SocketAddr, attempts: usize, last: Box<TransportError> },
}

/// Options for pushing envelopes to peers.
#[derive(Debug, Clone)]
pub struct PushOptions {
    /// Upper bound on a single connect-and-send attempt.
    pub timeout: Duration,
    /// How many times a failed attempt is retried.
    pub retries: usize,
    /// The delay before the first retry. Doubles on every retry.
    pub backoff: Duration,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(5), retries: 3, backoff: Duration::from_millis(200) }
    }
}

/// The remote-apply channel: deliver `envelope` to the peer at `peer`.
#[async_trait::async_trait]
pub trait Push: Send + Sync {
    async fn push(&self, peer: SocketAddr, envelope: &Envelope) -> Result<(), TransportError>;
}

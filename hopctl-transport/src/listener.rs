use std::{io, net::SocketAddr};

use futures::StreamExt;
use hopctl_wire::Codec;
use tokio::{
    net::{TcpListener, TcpStream},
    task::JoinHandle,
};
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::codec::FramedRead;

use crate::Inbox;

/// Accepts peer connections and deposits every decoded envelope into an [`Inbox`].
#[derive(Debug)]
pub struct Listener {
    listener: TcpListener,
    inbox: Inbox,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, inbox: Inbox) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "listening for peers");

        Ok(Self { listener, inbox })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Spawns the accept loop onto the runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(self) {
        let Self { listener, inbox } = self;
        let mut incoming = TcpListenerStream::new(listener);

        while let Some(conn) = incoming.next().await {
            match conn {
                Ok(stream) => {
                    tokio::spawn(serve(stream, inbox.clone()));
                }
                Err(e) => tracing::warn!(error = %e, "failed to accept connection"),
            }
        }
    }
}

/// Drains one peer connection until it closes or sends a malformed frame.
async fn serve(stream: TcpStream, inbox: Inbox) {
    let peer = stream.peer_addr().ok();
    let mut frames = FramedRead::new(stream, Codec::new());

    while let Some(frame) = frames.next().await {
        match frame {
            Ok(envelope) => {
                tracing::debug!(
                    ?peer,
                    sender = %envelope.sender,
                    kind = ?envelope.kind(),
                    sequence = envelope.sequence,
                    "received envelope"
                );
                inbox.deposit(envelope);
            }
            Err(e) => {
                tracing::warn!(?peer, error = %e, "dropping connection");
                break;
            }
        }
    }
}

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use super::protocol::{CodecError, Message, Reply};
use super::PeerAddr;
use crate::crypto::PublicKey;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("peer {peer} unreachable: {reason}")]
    Unreachable { peer: PublicKey, reason: String },
    #[error("request to {0} timed out")]
    Timeout(PublicKey),
    #[error("protocol error: {0}")]
    Codec(#[from] CodecError),
    #[error("stream error with {peer}: {reason}")]
    Stream { peer: PublicKey, reason: String },
    #[error("peer {peer} answered with unexpected {reply} reply")]
    UnexpectedReply { peer: PublicKey, reply: &'static str },
    #[error("peer {peer} rejected request: {reason}")]
    Rejected { peer: PublicKey, reason: String },
    #[error("failed to bind endpoint: {0}")]
    Bind(String),
    #[error("transport is shut down")]
    Closed,
}

impl TransportError {
    /// Error for a reply that does not answer the request that was sent
    pub fn unexpected(peer: PublicKey, reply: Reply) -> Self {
        match reply {
            Reply::Rejected(reason) => TransportError::Rejected { peer, reason },
            other => TransportError::UnexpectedReply {
                peer,
                reply: other.kind(),
            },
        }
    }
}

/// Answers requests arriving from other nodes
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, from: PublicKey, message: Message) -> Reply;
}

/// Request/reply link to other nodes
///
/// One request maps to one reply; there is no connection state visible to
/// callers. Implementations: the iroh QUIC endpoint for real deployments and
/// an in-process network in `testkit`.
#[async_trait]
pub trait Transport: Send + Sync + Debug + 'static {
    /// Our own id and the addresses others can reach us on
    fn local_addr(&self) -> PeerAddr;

    async fn request(&self, peer: &PeerAddr, message: Message) -> Result<Reply, TransportError>;

    /// Start answering inbound requests with `handler`
    fn serve(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError>;

    async fn shutdown(&self) -> Result<(), TransportError>;
}

/// [`Transport::request`] bounded by `timeout`
pub async fn request_with_timeout(
    transport: &dyn Transport,
    peer: &PeerAddr,
    message: Message,
    timeout: Duration,
) -> Result<Reply, TransportError> {
    match tokio::time::timeout(timeout, transport.request(peer, message)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout(peer.id)),
    }
}

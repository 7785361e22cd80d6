use std::fmt;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use iroh::discovery::pkarr::dht::DhtDiscovery;
use iroh::endpoint::Connection;
use iroh::protocol::{AcceptError, ProtocolHandler, Router};
use iroh::{Endpoint, NodeAddr};
use parking_lot::Mutex;

use super::protocol::{self, Message, Reply, ALPN, MAX_MESSAGE_SIZE};
use super::transport::{MessageHandler, Transport, TransportError};
use super::PeerAddr;
use crate::crypto::{PublicKey, SecretKey};

/// QUIC transport on an iroh endpoint
///
/// The node id is the public half of the endpoint's secret key. Outbound
/// requests dial by id, seeding the endpoint with any direct addresses the
/// [`PeerAddr`] carries; inbound requests are routed to the
/// [`MessageHandler`] installed by [`Transport::serve`].
#[derive(Debug)]
pub struct IrohTransport {
    endpoint: Endpoint,
    router: Mutex<Option<Router>>,
}

impl IrohTransport {
    /// Bind an endpoint for `secret_key`
    ///
    /// With no `listen` address an ephemeral port on all IPv4 interfaces is
    /// used. `dht_discovery` publishes and resolves node addresses through
    /// the mainline DHT.
    pub async fn bind(
        secret_key: &SecretKey,
        listen: Option<SocketAddr>,
        dht_discovery: bool,
    ) -> Result<Self, TransportError> {
        let listen = listen.unwrap_or_else(|| SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0));

        let mut builder = Endpoint::builder().secret_key(secret_key.0.clone());
        builder = match listen {
            SocketAddr::V4(addr) => builder.bind_addr_v4(addr),
            SocketAddr::V6(addr) => builder.bind_addr_v6(addr),
        };
        if dht_discovery {
            let discovery = DhtDiscovery::builder()
                .secret_key(secret_key.0.clone())
                .build()
                .map_err(|e| TransportError::Bind(format!("dht discovery: {}", e)))?;
            builder = builder.discovery(discovery);
        }

        let endpoint = builder
            .bind()
            .await
            .map_err(|e| TransportError::Bind(e.to_string()))?;
        tracing::info!(
            node_id = %endpoint.node_id(),
            sockets = ?endpoint.bound_sockets(),
            "iroh endpoint bound"
        );

        Ok(Self {
            endpoint,
            router: Mutex::new(None),
        })
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[async_trait]
impl Transport for IrohTransport {
    fn local_addr(&self) -> PeerAddr {
        PeerAddr::with_addrs(self.endpoint.node_id().into(), self.endpoint.bound_sockets())
    }

    async fn request(&self, peer: &PeerAddr, message: Message) -> Result<Reply, TransportError> {
        let unreachable = |reason: String| TransportError::Unreachable {
            peer: peer.id,
            reason,
        };
        let stream_err = |reason: String| TransportError::Stream {
            peer: peer.id,
            reason,
        };

        if !peer.addrs.is_empty() {
            let node_addr = NodeAddr::from_parts(*peer.id, None, peer.addrs.clone());
            self.endpoint
                .add_node_addr_with_source(node_addr, "crabfs")
                .map_err(|e| unreachable(e.to_string()))?;
        }

        let kind = message.kind();
        let request_bytes = protocol::encode("message", &message)?;

        let conn = self
            .endpoint
            .connect(*peer.id, ALPN)
            .await
            .map_err(|e| unreachable(e.to_string()))?;

        let (mut send, mut recv) = conn
            .open_bi()
            .await
            .map_err(|e| stream_err(format!("failed to open stream: {}", e)))?;

        send.write_all(&request_bytes)
            .await
            .map_err(|e| stream_err(format!("failed to write request: {}", e)))?;
        send.finish()
            .map_err(|e| stream_err(format!("failed to finish request: {}", e)))?;

        let reply_bytes = recv
            .read_to_end(MAX_MESSAGE_SIZE)
            .await
            .map_err(|e| stream_err(format!("failed to read reply: {}", e)))?;
        conn.close(0u32.into(), b"done");

        let reply: Reply = protocol::decode(&reply_bytes)?;
        tracing::trace!(
            peer = %peer.id.short(),
            request = kind,
            reply = reply.kind(),
            bytes = reply_bytes.len(),
            "request complete"
        );
        Ok(reply)
    }

    fn serve(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        let mut slot = self.router.lock();
        if slot.is_some() {
            return Err(TransportError::Bind("already serving".into()));
        }
        let router = Router::builder(self.endpoint.clone())
            .accept(ALPN, CrabfsProtocol { handler })
            .spawn();
        *slot = Some(router);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        let router = self.router.lock().take();
        match router {
            Some(router) => router
                .shutdown()
                .await
                .map_err(|e| TransportError::Stream {
                    peer: self.endpoint.node_id().into(),
                    reason: format!("router shutdown failed: {}", e),
                }),
            None => Ok(()),
        }
    }
}

/// ALPN handler feeding inbound streams to a [`MessageHandler`]
#[derive(Clone)]
struct CrabfsProtocol {
    handler: Arc<dyn MessageHandler>,
}

impl fmt::Debug for CrabfsProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrabfsProtocol").finish_non_exhaustive()
    }
}

impl CrabfsProtocol {
    async fn handle_connection(self, conn: Connection) -> Result<(), AcceptError> {
        let remote: PublicKey = conn
            .remote_node_id()
            .map_err(|e| AcceptError::from(std::io::Error::other(e)))?
            .into();

        let (mut send, mut recv) = conn.accept_bi().await.map_err(|e| {
            tracing::warn!(peer = %remote.short(), "failed to accept stream: {}", e);
            AcceptError::from(e)
        })?;

        let message_bytes = recv.read_to_end(MAX_MESSAGE_SIZE).await.map_err(|e| {
            tracing::warn!(peer = %remote.short(), "failed to read message: {}", e);
            AcceptError::from(std::io::Error::other(e))
        })?;

        let message: Message = protocol::decode(&message_bytes).map_err(|e| {
            tracing::warn!(peer = %remote.short(), "dropping undecodable message: {}", e);
            let err: Box<dyn std::error::Error + Send + Sync> = e.into();
            AcceptError::from(err)
        })?;

        let kind = message.kind();
        let reply = self.handler.handle(remote, message).await;
        tracing::debug!(peer = %remote.short(), request = kind, reply = reply.kind(), "handled request");

        let reply_bytes = protocol::encode("reply", &reply).map_err(|e| {
            tracing::error!("failed to encode reply: {}", e);
            let err: Box<dyn std::error::Error + Send + Sync> = e.into();
            AcceptError::from(err)
        })?;

        send.write_all(&reply_bytes)
            .await
            .map_err(|e| AcceptError::from(std::io::Error::other(e)))?;
        send.finish()
            .map_err(|e| AcceptError::from(std::io::Error::other(e)))?;

        // the requester closes once it has read the reply
        conn.closed().await;
        Ok(())
    }
}

impl ProtocolHandler for CrabfsProtocol {
    #[allow(refining_impl_trait)]
    fn accept(&self, conn: Connection) -> BoxFuture<'static, Result<(), AcceptError>> {
        Box::pin(self.clone().handle_connection(conn))
    }
}

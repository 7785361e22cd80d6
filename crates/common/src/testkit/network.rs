use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::crypto::{PublicKey, SecretKey};
use crate::peer::protocol::{self, Message, Reply};
use crate::peer::transport::{MessageHandler, Transport, TransportError};
use crate::peer::PeerAddr;

#[derive(Default)]
struct NetworkState {
    handlers: HashMap<PublicKey, Arc<dyn MessageHandler>>,
    offline: HashSet<PublicKey>,
}

/// In-process network connecting [`MemoryTransport`]s
///
/// Messages pass through the real wire codec, so anything that would not
/// survive the QUIC transport fails here too. Nodes can be taken offline to
/// simulate partitions, and arbitrary handlers can be registered to play
/// misbehaving peers.
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
    requests: Arc<AtomicU64>,
}

impl fmt::Debug for MemoryNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryNetwork")
            .field("nodes", &state.handlers.len())
            .field("offline", &state.offline.len())
            .finish()
    }
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// A transport for the node identified by `key`
    pub fn transport(&self, key: &SecretKey) -> Arc<MemoryTransport> {
        Arc::new(MemoryTransport {
            id: key.public(),
            network: self.clone(),
            closed: AtomicBool::new(false),
        })
    }

    /// Answer requests to `id` with a plain function
    pub fn register_fn<F>(&self, id: PublicKey, f: F)
    where
        F: Fn(PublicKey, Message) -> Reply + Send + Sync + 'static,
    {
        self.state.lock().handlers.insert(id, Arc::new(FnHandler(f)));
    }

    /// Take a node off the network or bring it back
    pub fn set_online(&self, id: &PublicKey, online: bool) {
        let mut state = self.state.lock();
        if online {
            state.offline.remove(id);
        } else {
            state.offline.insert(*id);
        }
    }

    /// Requests delivered so far, across all nodes
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }

    fn route(&self, from: &PublicKey, to: &PublicKey) -> Result<Arc<dyn MessageHandler>, String> {
        let state = self.state.lock();
        if state.offline.contains(from) {
            return Err("local node is offline".into());
        }
        if state.offline.contains(to) {
            return Err("node is offline".into());
        }
        state
            .handlers
            .get(to)
            .cloned()
            .ok_or_else(|| "no such node".into())
    }
}

struct FnHandler<F>(F);

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(PublicKey, Message) -> Reply + Send + Sync + 'static,
{
    async fn handle(&self, from: PublicKey, message: Message) -> Reply {
        (self.0)(from, message)
    }
}

/// [`Transport`] over a [`MemoryNetwork`]
#[derive(Debug)]
pub struct MemoryTransport {
    id: PublicKey,
    network: MemoryNetwork,
    closed: AtomicBool,
}

impl MemoryTransport {
    pub fn id(&self) -> PublicKey {
        self.id
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    fn local_addr(&self) -> PeerAddr {
        PeerAddr::new(self.id)
    }

    async fn request(&self, peer: &PeerAddr, message: Message) -> Result<Reply, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let handler = self
            .network
            .route(&self.id, &peer.id)
            .map_err(|reason| TransportError::Unreachable {
                peer: peer.id,
                reason,
            })?;

        let message: Message = protocol::decode(&protocol::encode("message", &message)?)?;
        tokio::task::yield_now().await;
        self.network.requests.fetch_add(1, Ordering::Relaxed);

        let reply = handler.handle(self.id, message).await;
        Ok(protocol::decode(&protocol::encode("reply", &reply)?)?)
    }

    fn serve(&self, handler: Arc<dyn MessageHandler>) -> Result<(), TransportError> {
        let mut state = self.network.state.lock();
        if state.handlers.contains_key(&self.id) {
            return Err(TransportError::Bind("already serving".into()));
        }
        state.handlers.insert(self.id, handler);
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        self.network.state.lock().handlers.remove(&self.id);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_route_and_offline() {
        let network = MemoryNetwork::new();
        let a = network.transport(&SecretKey::generate().unwrap());
        let b_key = SecretKey::generate().unwrap();
        network.register_fn(b_key.public(), |_, _| Reply::Ack);
        let b = PeerAddr::new(b_key.public());

        assert!(matches!(
            a.request(&b, Message::Hello { from: a.local_addr() }).await,
            Ok(Reply::Ack)
        ));

        network.set_online(&b.id, false);
        assert!(matches!(
            a.request(&b, Message::Hello { from: a.local_addr() }).await,
            Err(TransportError::Unreachable { .. })
        ));

        network.set_online(&b.id, true);
        a.shutdown().await.unwrap();
        assert!(matches!(
            a.request(&b, Message::Hello { from: a.local_addr() }).await,
            Err(TransportError::Closed)
        ));
        assert_eq!(network.request_count(), 1);
    }
}

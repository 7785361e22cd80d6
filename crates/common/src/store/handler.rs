use std::sync::Weak;

use async_trait::async_trait;

use super::StoreInner;
use crate::crypto::PublicKey;
use crate::peer::protocol::{Message, Reply, Subject};
use crate::peer::transport::MessageHandler;
use crate::publication::RecordProvider;

/// Routes inbound requests to the store's components
///
/// Holds the store weakly so the transport does not keep a dropped store
/// alive.
pub(super) struct NodeHandler<R: RecordProvider> {
    inner: Weak<StoreInner<R>>,
}

impl<R: RecordProvider> NodeHandler<R> {
    pub(super) fn new(inner: Weak<StoreInner<R>>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<R: RecordProvider> MessageHandler for NodeHandler<R> {
    async fn handle(&self, from: PublicKey, message: Message) -> Reply {
        let Some(inner) = self.inner.upgrade() else {
            return Reply::Rejected("node is shutting down".to_string());
        };

        match message {
            Message::Hello { from: addr } => inner.directory.handle_hello(from, addr),
            Message::Announce {
                from: addr,
                subjects,
                ttl_secs,
            } => inner
                .directory
                .handle_announce(from, addr, subjects, ttl_secs),
            Message::FindProviders(subject) => {
                let held_here = match subject {
                    Subject::Chunk(id) => inner
                        .transfer
                        .chunks()
                        .contains(&id)
                        .await
                        .unwrap_or(false),
                    Subject::Owner(_) => false,
                };
                inner.directory.handle_find_providers(subject, held_here)
            }
            Message::Publish(record) => inner.index.handle_publish(record).await,
            Message::Lookup(key) => inner.index.handle_lookup(key).await,
            Message::FetchChunk(id) => inner.transfer.handle_fetch(id).await,
        }
    }
}

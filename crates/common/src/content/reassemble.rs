use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};

use super::manifest::{BlockRef, Manifest};

/// Resolves a manifest entry to its plaintext
///
/// Implementations own verification: a returned `Ok` must be the exact
/// plaintext `block.id` names.
#[async_trait]
pub trait ChunkFetcher: Send + Sync + 'static {
    type Error: Send + 'static;

    async fn fetch(&self, block: BlockRef) -> Result<Bytes, Self::Error>;
}

/// Lazily rebuild a blob from its manifest
///
/// Up to `window` fetches run at once and may finish in any order; chunks are
/// still yielded in manifest order. The first failure is yielded and ends
/// the stream.
pub fn reassemble<F>(
    manifest: &Manifest,
    fetcher: Arc<F>,
    window: usize,
) -> BoxStream<'static, Result<Bytes, F::Error>>
where
    F: ChunkFetcher,
{
    let blocks = manifest.blocks().to_vec();
    stream::iter(blocks)
        .map(move |block| {
            let fetcher = fetcher.clone();
            async move { fetcher.fetch(block).await }
        })
        .buffered(window.max(1))
        .scan(false, |failed, item| {
            if *failed {
                return future::ready(None);
            }
            *failed = item.is_err();
            future::ready(Some(item))
        })
        .boxed()
}

use std::path::{Path, PathBuf};

use chrono::Utc;
use clap::Args;
use tokio::io::AsyncWriteExt;

use common::address::{Address, AddressError, Location};
use common::context::Context;
use common::crypto::{KeyError, SecretKey};
use common::store::{Store, StoreError};

use super::keygen::{self, KeygenError};
use crate::state::StateError;

#[derive(Args, Debug, Clone)]
pub struct Cp {
    /// Path to the owner's private key
    pub key: PathBuf,

    /// Local path or crabfs://bucket/filename to copy from
    pub src: String,

    /// Local path or crabfs://bucket/filename to copy to
    pub dst: String,

    /// Generate a new private key at <KEY> and use it
    #[arg(long = "gen")]
    pub generate: bool,

    /// Exit after pushing instead of seeding until Ctrl-C
    #[arg(long)]
    pub no_seed: bool,

    /// Store root (defaults to the configured root)
    #[arg(long)]
    pub root: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum CpError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error("failed to load key: {0}")]
    Key(#[from] KeyError),
    #[error(transparent)]
    Keygen(#[from] KeygenError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::op::Op for Cp {
    type Error = CpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        // both ends are checked before touching disk or network
        let src = Location::parse(&self.src)?;
        let dst = Location::parse(&self.dst)?;
        let key = self.load_key().await?;

        if let (Location::Local(from), Location::Local(to)) = (&src, &dst) {
            let copied = copy_local(from, to).await?;
            return Ok(format!("Copied {} byte(s)", copied));
        }

        let options = ctx.state.store_options(self.root.clone())?;
        let store = Store::open(options).await?;
        let result = self.transfer(&store, &key, &src, &dst).await;
        if let Err(e) = store.close().await {
            tracing::warn!(error = %e, "failed to close store");
        }
        result
    }
}

impl Cp {
    async fn load_key(&self) -> Result<SecretKey, CpError> {
        if self.generate {
            return Ok(keygen::write_new_key(&self.key).await?);
        }
        let bytes = tokio::fs::read(&self.key).await?;
        Ok(SecretKey::load(&bytes)?)
    }

    async fn transfer(
        &self,
        store: &Store,
        key: &SecretKey,
        src: &Location,
        dst: &Location,
    ) -> Result<String, CpError> {
        let ctx = Context::background();
        store.publish_public_key(&ctx, &key.public()).await?;

        match dst {
            Location::Local(path) => {
                let dir = parent_dir(path);
                let tmp = tempfile::NamedTempFile::new_in(dir)?;
                let copied = copy_into(store, key, src, tmp.path()).await?;
                tmp.persist(path).map_err(|e| e.error)?;
                Ok(format!("Copied {} byte(s)", copied))
            }
            Location::Remote(address) => {
                let tmp = tempfile::NamedTempFile::new()?;
                let copied = copy_into(store, key, src, tmp.path()).await?;
                println!("Copied {} byte(s)", copied);

                let mut reader = tokio::fs::File::open(tmp.path()).await?;
                let summary = store
                    .put(
                        &ctx,
                        key,
                        address.bucket(),
                        address.filename(),
                        &mut reader,
                        Utc::now(),
                    )
                    .await?;
                tracing::info!(%address, chunks = summary.manifest.len(), outcome = ?summary.outcome, "pushed");

                if self.no_seed {
                    return Ok(format!("Pushed to {}", address));
                }
                seed_until_interrupted(store, address).await
            }
        }
    }
}

async fn seed_until_interrupted(store: &Store, address: &Address) -> Result<String, CpError> {
    println!("Pushed to crabfs. Now seeding... Press ctrl+c to exit");
    let handle = store.seed();
    let interrupted = tokio::signal::ctrl_c().await;
    handle.stop().await;
    interrupted?;
    Ok(format!("Stopped seeding {}", address))
}

/// Copy `src` into the file at `path`, returning bytes written
async fn copy_into(
    store: &Store,
    key: &SecretKey,
    src: &Location,
    path: &Path,
) -> Result<u64, CpError> {
    let mut out = tokio::fs::File::create(path).await?;
    let copied = match src {
        Location::Remote(address) => {
            let mut reader = store
                .get(
                    &Context::background(),
                    key,
                    address.bucket(),
                    address.filename(),
                )
                .await?;
            reader.copy_to(&mut out).await?
        }
        Location::Local(from) => {
            let mut input = tokio::fs::File::open(from).await?;
            let copied = tokio::io::copy(&mut input, &mut out).await?;
            out.flush().await?;
            copied
        }
    };
    out.sync_all().await?;
    Ok(copied)
}

async fn copy_local(from: &Path, to: &Path) -> Result<u64, CpError> {
    let mut input = tokio::fs::File::open(from).await?;
    let mut out = tokio::fs::File::create(to).await?;
    let copied = tokio::io::copy(&mut input, &mut out).await?;
    out.flush().await?;
    Ok(copied)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::{Op, OpContext};

    fn context(dir: &Path) -> OpContext {
        OpContext::load(Some(dir.to_path_buf())).unwrap()
    }

    #[tokio::test]
    async fn test_local_to_local() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("a.txt");
        let dst = dir.path().join("b.txt");
        tokio::fs::write(&src, b"hello world").await.unwrap();

        let cp = Cp {
            key: dir.path().join("owner.pem"),
            src: src.display().to_string(),
            dst: dst.display().to_string(),
            generate: true,
            no_seed: true,
            root: None,
        };
        let output = cp.execute(&context(dir.path())).await.unwrap();
        assert_eq!(output, "Copied 11 byte(s)");
        assert_eq!(tokio::fs::read(&dst).await.unwrap(), b"hello world");
        // --gen left a loadable key behind
        let pem = tokio::fs::read(dir.path().join("owner.pem")).await.unwrap();
        assert!(SecretKey::load(&pem).is_ok());
    }

    #[tokio::test]
    async fn test_malformed_address_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Cp {
            key: dir.path().join("missing.pem"),
            src: "crabfs://bad-bucket/file".to_string(),
            dst: dir.path().join("out").display().to_string(),
            generate: false,
            no_seed: true,
            root: None,
        };
        let err = cp.execute(&context(dir.path())).await.unwrap_err();
        assert!(matches!(err, CpError::Address(_)), "{:?}", err);
        assert!(!dir.path().join("out").exists());
    }

    #[tokio::test]
    async fn test_missing_key_file() {
        let dir = tempfile::tempdir().unwrap();
        let cp = Cp {
            key: dir.path().join("missing.pem"),
            src: "crabfs://docs/file".to_string(),
            dst: dir.path().join("out").display().to_string(),
            generate: false,
            no_seed: true,
            root: None,
        };
        let err = cp.execute(&context(dir.path())).await.unwrap_err();
        assert!(matches!(err, CpError::Io(_)), "{:?}", err);
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir(Path::new("file.txt")), Path::new("."));
        assert_eq!(parent_dir(Path::new("/tmp/file.txt")), Path::new("/tmp"));
    }
}

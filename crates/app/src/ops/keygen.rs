use std::path::PathBuf;

use clap::Args;

use common::crypto::{KeyError, SecretKey};

#[derive(Args, Debug, Clone)]
pub struct Keygen {
    /// Where to write the new private key
    pub path: PathBuf,

    /// Overwrite an existing key file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum KeygenError {
    #[error("{0} already exists, pass --force to overwrite")]
    Exists(PathBuf),
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[async_trait::async_trait]
impl crate::op::Op for Keygen {
    type Error = KeygenError;
    type Output = String;

    async fn execute(&self, _ctx: &crate::op::OpContext) -> Result<Self::Output, Self::Error> {
        if !self.force && tokio::fs::try_exists(&self.path).await? {
            return Err(KeygenError::Exists(self.path.clone()));
        }
        let key = write_new_key(&self.path).await?;
        Ok(format!(
            "Wrote key to {}\nPublic key: {}",
            self.path.display(),
            key.public()
        ))
    }
}

/// Generate a key and write it to `path` as PEM
pub async fn write_new_key(path: &std::path::Path) -> Result<SecretKey, KeygenError> {
    let key = SecretKey::generate()?;
    common::disk::write_atomic(path, key.marshal()).await?;
    tracing::info!(path = %path.display(), public = %key.public(), "generated key");
    Ok(key)
}

//! Small filesystem helpers shared by the on-disk stores

use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `bytes` to `path` so readers see either the old file or the whole
/// new one, never a partial write
///
/// The data goes to a uniquely named temp file in the target directory and
/// is renamed into place; concurrent writers of the same path each rename a
/// complete file.
pub async fn write_atomic(path: &Path, bytes: Vec<u8>) -> std::io::Result<()> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let dir = path
            .parent()
            .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_data()?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Like [`write_atomic`] but never replaces an existing file
///
/// Returns `false` if `path` already existed, in which case the first
/// writer's content stays in place.
pub async fn write_new(path: &Path, bytes: Vec<u8>) -> std::io::Result<bool> {
    let path: PathBuf = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        if path.exists() {
            return Ok(false);
        }
        let dir = path
            .parent()
            .ok_or_else(|| std::io::Error::other("path has no parent directory"))?;
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_data()?;
        match tmp.persist_noclobber(&path) {
            Ok(_) => Ok(true),
            Err(e) if e.error.kind() == std::io::ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.error),
        }
    })
    .await
    .map_err(std::io::Error::other)?
}

/// Read a file, mapping a missing file to `None`
pub async fn read_optional(path: &Path) -> std::io::Result<Option<Vec<u8>>> {
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Remove a file, treating a missing file as success
pub async fn remove_optional(path: &Path) -> std::io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a/b/file");

        assert_eq!(read_optional(&path).await.unwrap(), None);
        write_atomic(&path, b"one".to_vec()).await.unwrap();
        write_atomic(&path, b"two".to_vec()).await.unwrap();
        assert_eq!(read_optional(&path).await.unwrap(), Some(b"two".to_vec()));

        assert!(remove_optional(&path).await.unwrap());
        assert!(!remove_optional(&path).await.unwrap());
    }

    #[tokio::test]
    async fn test_write_new_keeps_first() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x/first");

        assert!(write_new(&path, b"first".to_vec()).await.unwrap());
        assert!(!write_new(&path, b"second".to_vec()).await.unwrap());
        assert_eq!(read_optional(&path).await.unwrap(), Some(b"first".to_vec()));
    }

    #[tokio::test]
    async fn test_concurrent_writers_leave_whole_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared");

        let writers: Vec<_> = (0..8u8)
            .map(|i| {
                let path = path.clone();
                tokio::spawn(async move { write_atomic(&path, vec![i; 4096]).await })
            })
            .collect();
        for w in writers {
            w.await.unwrap().unwrap();
        }

        let bytes = read_optional(&path).await.unwrap().unwrap();
        assert_eq!(bytes.len(), 4096);
        assert!(bytes.iter().all(|b| *b == bytes[0]));
        // no temp files left behind
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}

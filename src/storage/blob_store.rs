//! Streaming blob storage (C1): get/write/delete/list of byte blobs rooted
//! under a single directory opened once at construction.
//!
//! Every key is validated and joined under the canonicalized root before any
//! filesystem syscall touches it — Rust's standard library has no portable
//! `openat`, so path-escape defense here is: reject `..`/absolute segments
//! up front, then re-canonicalize the resulting path (or its deepest
//! existing ancestor, for paths that don't exist yet) and refuse to proceed
//! if it resolves outside the root. This is the same invariant an `openat`-
//! rooted handle gives for free, expressed with what std offers.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::{content_type, metadata::ObjectEntry};

#[derive(Debug, Error)]
pub enum BlobError {
    #[error("object not found")]
    NotFound,
    #[error("operation canceled")]
    Canceled,
    #[error("invalid object key")]
    InvalidKey,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type BlobResult<T> = Result<T, BlobError>;

/// Outcome of a successful `write`.
#[derive(Debug, Clone)]
pub struct WriteOutcome {
    pub bytes_written: u64,
    pub etag: String,
}

const MAX_KEY_LEN: usize = 1024;

#[derive(Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    /// Open (creating if needed) the storage root and canonicalize it once.
    /// All subsequent operations are scoped to this canonical root.
    pub async fn open(root: impl Into<PathBuf>) -> io::Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        let root = fs::canonicalize(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_key_safe(key: &str) -> BlobResult<()> {
        if key.is_empty() || key.len() > MAX_KEY_LEN {
            return Err(BlobError::InvalidKey);
        }
        if key.starts_with('/') || key.contains("..") {
            return Err(BlobError::InvalidKey);
        }
        if key
            .bytes()
            .any(|b| b.is_ascii_control() || b == b'\\' || b == 0)
        {
            return Err(BlobError::InvalidKey);
        }
        if key.split('/').any(|segment| segment.is_empty()) {
            return Err(BlobError::InvalidKey);
        }
        Ok(())
    }

    fn joined_path(&self, key: &str) -> BlobResult<PathBuf> {
        Self::ensure_key_safe(key)?;
        Ok(self.root.join(key))
    }

    /// Verify a path that is expected to already exist resolves under the
    /// root once symlinks are resolved. Rejects symlink escapes.
    async fn verify_existing_under_root(&self, path: &Path) -> BlobResult<()> {
        let canonical = fs::canonicalize(path).await?;
        if !canonical.starts_with(&self.root) {
            return Err(BlobError::InvalidKey);
        }
        Ok(())
    }

    /// Verify that the deepest existing ancestor of `path` resolves under
    /// the root, for paths whose final component doesn't exist yet.
    async fn verify_new_path_under_root(&self, path: &Path) -> BlobResult<()> {
        let mut probe = path.to_path_buf();
        loop {
            if probe == self.root {
                return Ok(());
            }
            match fs::canonicalize(&probe).await {
                Ok(canonical) => {
                    return if canonical.starts_with(&self.root) {
                        Ok(())
                    } else {
                        Err(BlobError::InvalidKey)
                    };
                }
                Err(err) if err.kind() == ErrorKind::NotFound => {
                    if !probe.pop() {
                        return Err(BlobError::InvalidKey);
                    }
                }
                Err(err) => return Err(BlobError::Io(err)),
            }
        }
    }

    fn check_canceled(token: &CancellationToken) -> BlobResult<()> {
        if token.is_cancelled() {
            Err(BlobError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Open `key` for reading. `NotFound` when the underlying file is
    /// missing.
    pub async fn get(&self, key: &str, token: &CancellationToken) -> BlobResult<File> {
        Self::check_canceled(token)?;
        let path = self.joined_path(key)?;
        self.verify_existing_under_root(&path).await.map_err(|e| {
            if matches!(e, BlobError::Io(ref io) if io.kind() == ErrorKind::NotFound) {
                BlobError::NotFound
            } else {
                e
            }
        })?;
        File::open(&path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                BlobError::NotFound
            } else {
                BlobError::Io(err)
            }
        })
    }

    /// Stream `source` into a temporary sibling of `key`, computing SHA-256
    /// as a tee, then fsync and atomically rename over `key`. On any error
    /// or cancellation the temporary file is removed and no visible change
    /// occurs.
    pub async fn write<S>(
        &self,
        key: &str,
        mut source: S,
        token: &CancellationToken,
    ) -> BlobResult<WriteOutcome>
    where
        S: Stream<Item = io::Result<Bytes>> + Unpin,
    {
        let final_path = self.joined_path(key)?;
        let parent = final_path
            .parent()
            .ok_or(BlobError::InvalidKey)?
            .to_path_buf();
        fs::create_dir_all(&parent).await?;
        self.verify_new_path_under_root(&final_path).await?;

        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = match File::create(&tmp_path).await {
            Ok(f) => f,
            Err(err) => return Err(BlobError::Io(err)),
        };

        let mut hasher = Sha256::new();
        let mut bytes_written: u64 = 0;

        let result: BlobResult<()> = async {
            loop {
                Self::check_canceled(token)?;
                match source.next().await {
                    Some(Ok(chunk)) => {
                        hasher.update(&chunk);
                        bytes_written += chunk.len() as u64;
                        file.write_all(&chunk).await?;
                    }
                    Some(Err(err)) => return Err(BlobError::Io(err)),
                    None => break,
                }
            }
            file.flush().await?;
            file.sync_all().await?;
            Ok(())
        }
        .await;

        if let Err(err) = result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(err);
        }

        if let Err(err) = fs::rename(&tmp_path, &final_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(BlobError::Io(err));
        }

        let etag = hex::encode(hasher.finalize());
        Ok(WriteOutcome {
            bytes_written,
            etag,
        })
    }

    /// Unlink `key`. Missing file maps to `NotFound`.
    pub async fn delete(&self, key: &str, token: &CancellationToken) -> BlobResult<()> {
        Self::check_canceled(token)?;
        let path = self.joined_path(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(BlobError::NotFound),
            Err(err) => Err(BlobError::Io(err)),
        }
    }

    /// Depth-first walk of live files beneath the root. Recomputes each
    /// file's SHA-256 and derives its content type from the extension.
    pub async fn list(&self, token: &CancellationToken) -> BlobResult<Vec<ObjectEntry>> {
        let mut entries = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut read_dir = fs::read_dir(&dir).await?;
            loop {
                Self::check_canceled(token)?;
                let Some(entry) = read_dir.next_entry().await? else {
                    break;
                };
                let path = entry.path();
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    stack.push(path);
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let Some(rel) = relative_key(&self.root, &path) else {
                    continue;
                };
                if rel.split('/').next_back().map(|n| n.starts_with(".tmp-")).unwrap_or(false) {
                    continue;
                }
                let bytes = fs::read(&path).await?;
                let etag = hex::encode(Sha256::digest(&bytes));
                entries.push(ObjectEntry {
                    path: rel.clone(),
                    size: bytes.len() as i64,
                    etag,
                    content_type: content_type::from_extension(&rel),
                    updated_at: chrono::Utc::now(),
                });
            }
        }

        entries.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(entries)
    }
}

/// Compute `path` relative to `root` with forward-slash separators.
fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        parts.push(component.as_os_str().to_str()?.to_string());
    }
    Some(parts.join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    async fn store() -> (tempfile::TempDir, BlobStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let blobs = BlobStore::open(dir.path()).await.unwrap();
        (dir, blobs)
    }

    fn chunks(data: &'static [u8]) -> impl Stream<Item = io::Result<Bytes>> + Unpin {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    #[tokio::test]
    async fn write_then_get_roundtrips_bytes_and_etag() {
        let (_dir, blobs) = store().await;
        let token = CancellationToken::new();
        let outcome = blobs
            .write("a/b.txt", chunks(b"hello"), &token)
            .await
            .unwrap();
        assert_eq!(outcome.bytes_written, 5);

        let mut file = blobs.get("a/b.txt", &token).await.unwrap();
        let mut buf = Vec::new();
        use tokio::io::AsyncReadExt;
        file.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"hello");
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let (_dir, blobs) = store().await;
        let token = CancellationToken::new();
        let err = blobs.get("missing.txt", &token).await.unwrap_err();
        assert!(matches!(err, BlobError::NotFound));
    }

    #[tokio::test]
    async fn rejects_traversal_keys() {
        let (_dir, blobs) = store().await;
        let token = CancellationToken::new();
        for bad in ["../escape", "/abs", "a/../../b", "a//b"] {
            let err = blobs.write(bad, chunks(b"x"), &token).await.unwrap_err();
            assert!(matches!(err, BlobError::InvalidKey), "key {bad} should be rejected");
        }
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let (_dir, blobs) = store().await;
        let token = CancellationToken::new();
        blobs.write("x.txt", chunks(b"data"), &token).await.unwrap();
        blobs.delete("x.txt", &token).await.unwrap();
        assert!(matches!(
            blobs.get("x.txt", &token).await.unwrap_err(),
            BlobError::NotFound
        ));
    }

    #[tokio::test]
    async fn list_recomputes_etag_and_sorts() {
        let (_dir, blobs) = store().await;
        let token = CancellationToken::new();
        blobs.write("b.txt", chunks(b"second"), &token).await.unwrap();
        blobs.write("a.txt", chunks(b"first"), &token).await.unwrap();
        let entries = blobs.list(&token).await.unwrap();
        let paths: Vec<_> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
    }

    #[tokio::test]
    async fn write_checks_cancellation_before_first_chunk() {
        let (_dir, blobs) = store().await;
        let token = CancellationToken::new();
        token.cancel();
        let err = blobs
            .write("cancelled.txt", chunks(b"data"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, BlobError::Canceled));
    }
}

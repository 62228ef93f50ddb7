//! Object service (C3): orchestrates the blob store and metadata repository
//! under one of the three operating modes, owning the invariants described
//! in spec §3 and the state machine in spec §4.3.

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use thiserror::Error;
use tokio::fs::File;
use tokio_util::sync::CancellationToken;
use tracing::instrument;
use uuid::Uuid;

use crate::{
    models::{
        content_type,
        metadata::{MetaData, Mode, ObjectEntry},
    },
    repository::{ListQuery, MetadataRepository, RepoError},
    storage::blob_store::{BlobError, BlobStore},
};

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("not found")]
    NotFound,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("precondition failed")]
    PreconditionFailed,
    #[error("operation canceled")]
    Canceled,
    #[error("internal error: {0}")]
    Io(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl From<RepoError> for ServiceError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => ServiceError::NotFound,
            RepoError::InvalidArgument(msg) => ServiceError::InvalidArgument(msg),
            RepoError::Canceled => ServiceError::Canceled,
            RepoError::SchemaMismatch(msg) => ServiceError::Io(format!("schema mismatch: {msg}")),
            RepoError::Database(err) => ServiceError::Io(err.to_string()),
        }
    }
}

impl From<BlobError> for ServiceError {
    fn from(err: BlobError) -> Self {
        match err {
            BlobError::NotFound => ServiceError::NotFound,
            BlobError::Canceled => ServiceError::Canceled,
            BlobError::InvalidKey => ServiceError::InvalidArgument("invalid object key".into()),
            BlobError::Io(err) => ServiceError::Io(err.to_string()),
        }
    }
}

/// Outcome of a successful `Get`.
pub enum GetOutcome {
    Found { meta: MetaData, file: File },
    NotModified(MetaData),
}

/// Arguments accepted by `List`.
#[derive(Default)]
pub struct ListArgs {
    pub prefix: Option<String>,
    pub limit: Option<u32>,
    pub cursor: Option<String>,
}

const DEFAULT_LIST_LIMIT: u32 = 100;

fn strip_quotes(etag: &str) -> &str {
    etag.trim_matches('"')
}

#[derive(Clone)]
pub struct ObjectService {
    repo: Arc<dyn MetadataRepository>,
    blobs: Arc<BlobStore>,
    mode: Mode,
}

impl ObjectService {
    pub fn new(repo: Arc<dyn MetadataRepository>, blobs: Arc<BlobStore>, mode: Mode) -> Self {
        Self { repo, blobs, mode }
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Resolve the live row backing `path` honoring the operating mode's
    /// GET-miss fallback. Only used by `Get` — `Create`/`Delete` always
    /// address `path` literally.
    async fn resolve(&self, path: &str, token: &CancellationToken) -> ServiceResult<MetaData> {
        match self.repo.get(path, token).await {
            Ok(meta) => Ok(meta),
            Err(RepoError::NotFound) => match self.mode {
                Mode::Store => Err(ServiceError::NotFound),
                Mode::Static => {
                    let fallback = format!("{}/index.html", path.trim_end_matches('/'));
                    self.repo
                        .get(&fallback, token)
                        .await
                        .map_err(ServiceError::from)
                }
                Mode::Spa => self
                    .repo
                    .get("index.html", token)
                    .await
                    .map_err(ServiceError::from),
            },
            Err(other) => Err(other.into()),
        }
    }

    /// Stream-write `source` into `path`, update metadata, and return the
    /// post-state. Guarantees invariant 5 (blob SHA-256 matches the row's
    /// etag): the blob is renamed into place before the metadata upsert, and
    /// a failed upsert triggers a best-effort blob delete so a row is never
    /// left pointing at bytes on disk without a matching record (nor the
    /// reverse).
    #[instrument(skip(self, source, token))]
    pub async fn create<S>(
        &self,
        path: &str,
        content_type_hint: Option<String>,
        if_match: Option<&str>,
        source: S,
        token: &CancellationToken,
    ) -> ServiceResult<MetaData>
    where
        S: Stream<Item = std::io::Result<Bytes>> + Unpin,
    {
        if path.is_empty() {
            return Err(ServiceError::InvalidArgument("empty key".into()));
        }

        if let Some(expected) = if_match {
            match self.repo.get(path, token).await {
                Ok(current) if current.etag == strip_quotes(expected) => {}
                Ok(_) => return Err(ServiceError::PreconditionFailed),
                Err(RepoError::NotFound) => return Err(ServiceError::PreconditionFailed),
                Err(other) => return Err(other.into()),
            }
        }

        let content_type = content_type_hint.unwrap_or_else(|| content_type::from_extension(path));

        let outcome = self.blobs.write(path, source, token).await?;

        match self
            .repo
            .upsert(
                path,
                &content_type,
                &outcome.etag,
                outcome.bytes_written as i64,
                token,
            )
            .await
        {
            Ok(meta) => Ok(meta),
            Err(err) => {
                let _ = self.blobs.delete(path, token).await;
                Err(err.into())
            }
        }
    }

    /// Resolve `path` under the operating mode, honoring conditional
    /// headers, and open the backing blob for streaming.
    #[instrument(skip(self, token))]
    pub async fn get(
        &self,
        path: &str,
        if_none_match: Option<&str>,
        if_match: Option<&str>,
        token: &CancellationToken,
    ) -> ServiceResult<GetOutcome> {
        let meta = self.resolve(path, token).await?;

        if let Some(expected) = if_match {
            if meta.etag != strip_quotes(expected) {
                return Err(ServiceError::PreconditionFailed);
            }
        }
        if let Some(candidate) = if_none_match {
            if meta.etag == strip_quotes(candidate) {
                return Ok(GetOutcome::NotModified(meta));
            }
        }

        let file = self.blobs.get(&meta.path, token).await.map_err(|err| match err {
            BlobError::NotFound => ServiceError::Io(format!(
                "metadata present but blob missing for path `{}`",
                meta.path
            )),
            other => ServiceError::from(other),
        })?;

        Ok(GetOutcome::Found { meta, file })
    }

    /// Soft-delete the live row at `path`. The blob is left untouched;
    /// `Tombstone` removes it in a later batch.
    #[instrument(skip(self, token))]
    pub async fn delete(&self, path: &str, token: &CancellationToken) -> ServiceResult<()> {
        self.repo.soft_delete(path, token).await.map_err(Into::into)
    }

    /// List live rows, validating and defaulting `limit` per spec (C3 owns
    /// this clamp; the repository only enforces the outer [1, 1000] bound).
    pub async fn list(
        &self,
        args: ListArgs,
        token: &CancellationToken,
    ) -> ServiceResult<(Vec<ObjectEntry>, Option<String>)> {
        let limit = args.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, 1000);
        let page = self
            .repo
            .list(
                ListQuery {
                    prefix: args.prefix,
                    limit,
                    cursor: args.cursor,
                    include_deleted: false,
                },
                token,
            )
            .await?;

        let items = page.items.iter().map(ObjectEntry::from).collect();
        Ok((items, page.next_cursor))
    }

    /// Walk the blob store and insert a live row for every blob lacking one.
    /// Never overwrites an existing row; safe to re-run.
    #[instrument(skip(self, token))]
    pub async fn populate(&self, token: &CancellationToken) -> ServiceResult<u64> {
        let found = self.blobs.list(token).await?;
        let mut added = 0u64;

        for entry in found {
            match self.repo.get(&entry.path, token).await {
                Ok(_) => continue,
                Err(RepoError::NotFound) => {
                    self.repo
                        .upsert(
                            &entry.path,
                            &entry.content_type,
                            &entry.etag,
                            entry.size,
                            token,
                        )
                        .await?;
                    added += 1;
                }
                Err(other) => return Err(other.into()),
            }
        }

        Ok(added)
    }

    /// Phase-2 of soft-delete: remove the blob for each pending tombstone
    /// and mark it cleaned. Errors abort the batch; rows already processed
    /// stay cleaned (each iteration commits independently).
    #[instrument(skip(self, token))]
    pub async fn tombstone(&self, limit: u32, token: &CancellationToken) -> ServiceResult<u64> {
        let pending = self.repo.list_tombstones(limit, token).await?;
        let mut cleaned = 0u64;

        for row in pending {
            match self.blobs.delete(&row.path, token).await {
                Ok(()) => {}
                Err(BlobError::NotFound) => {}
                Err(other) => return Err(other.into()),
            }
            self.mark_cleaned(row.id, token).await?;
            cleaned += 1;
        }

        Ok(cleaned)
    }

    async fn mark_cleaned(&self, id: Uuid, token: &CancellationToken) -> ServiceResult<()> {
        self.repo.mark_cleaned(id, token).await.map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sqlite_repository::SqliteRepository;
    use futures::stream;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn service(mode: Mode) -> (tempfile::TempDir, ObjectService) {
        let dir = tempfile::TempDir::new().unwrap();
        let blobs = Arc::new(BlobStore::open(dir.path()).await.unwrap());
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteRepository::new(pool, "metadata".to_string());
        repo.migrate().await.unwrap();
        let service = ObjectService::new(Arc::new(repo), blobs, mode);
        (dir, service)
    }

    fn body(data: &'static [u8]) -> impl Stream<Item = std::io::Result<Bytes>> + Unpin {
        stream::iter(vec![Ok(Bytes::from_static(data))])
    }

    #[tokio::test]
    async fn create_then_get_roundtrips_bytes_and_etag() {
        let (_dir, service) = service(Mode::Store).await;
        let token = CancellationToken::new();
        let meta = service
            .create("hello.txt", Some("text/plain".into()), None, body(b"Hello, World!"), &token)
            .await
            .unwrap();
        assert_eq!(
            meta.etag,
            "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f"
        );

        match service.get("hello.txt", None, None, &token).await.unwrap() {
            GetOutcome::Found { meta, mut file } => {
                use tokio::io::AsyncReadExt;
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).await.unwrap();
                assert_eq!(buf, b"Hello, World!");
                assert_eq!(meta.etag, "dffd6021bb2bd5b0af676290809ec3a53191dd81c7f70a4b28688a362182986f");
            }
            GetOutcome::NotModified(_) => panic!("expected Found"),
        }
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found_store_mode() {
        let (_dir, service) = service(Mode::Store).await;
        let token = CancellationToken::new();
        service
            .create("a.txt", None, None, body(b"x"), &token)
            .await
            .unwrap();
        service.delete("a.txt", &token).await.unwrap();
        assert!(matches!(
            service.get("a.txt", None, None, &token).await.unwrap_err(),
            ServiceError::NotFound
        ));
    }

    #[tokio::test]
    async fn delete_twice_is_not_found_second_time() {
        let (_dir, service) = service(Mode::Store).await;
        let token = CancellationToken::new();
        service
            .create("a.txt", None, None, body(b"x"), &token)
            .await
            .unwrap();
        service.delete("a.txt", &token).await.unwrap();
        assert!(matches!(
            service.delete("a.txt", &token).await.unwrap_err(),
            ServiceError::NotFound
        ));
    }

    #[tokio::test]
    async fn resurrection_gets_new_id() {
        let (_dir, service) = service(Mode::Store).await;
        let token = CancellationToken::new();
        let first = service
            .create("a.txt", None, None, body(b"x"), &token)
            .await
            .unwrap();
        service.delete("a.txt", &token).await.unwrap();
        let second = service
            .create("a.txt", None, None, body(b"y"), &token)
            .await
            .unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn if_match_mismatch_is_precondition_failed() {
        let (_dir, service) = service(Mode::Store).await;
        let token = CancellationToken::new();
        service
            .create("a.txt", None, None, body(b"v1"), &token)
            .await
            .unwrap();
        let err = service
            .create("a.txt", None, Some("\"wrong\""), body(b"v2"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed));
    }

    #[tokio::test]
    async fn if_match_against_missing_object_is_precondition_failed() {
        let (_dir, service) = service(Mode::Store).await;
        let token = CancellationToken::new();
        let err = service
            .create("missing.txt", None, Some("\"whatever\""), body(b"v"), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::PreconditionFailed));
    }

    #[tokio::test]
    async fn if_none_match_current_etag_is_not_modified() {
        let (_dir, service) = service(Mode::Store).await;
        let token = CancellationToken::new();
        let meta = service
            .create("a.txt", None, None, body(b"v1"), &token)
            .await
            .unwrap();
        let quoted = format!("\"{}\"", meta.etag);
        match service.get("a.txt", Some(&quoted), None, &token).await.unwrap() {
            GetOutcome::NotModified(_) => {}
            GetOutcome::Found { .. } => panic!("expected NotModified"),
        }
    }

    #[tokio::test]
    async fn static_mode_falls_back_to_directory_index() {
        let (_dir, service) = service(Mode::Static).await;
        let token = CancellationToken::new();
        service
            .create("docs/readme.md", None, None, body(b"# readme"), &token)
            .await
            .unwrap();
        service
            .create("docs/index.html", None, None, body(b"<h1>docs</h1>"), &token)
            .await
            .unwrap();

        match service.get("docs", None, None, &token).await.unwrap() {
            GetOutcome::Found { meta, .. } => assert_eq!(meta.path, "docs/index.html"),
            GetOutcome::NotModified(_) => panic!("expected Found"),
        }
    }

    #[tokio::test]
    async fn spa_mode_falls_back_to_root_index_for_any_miss() {
        let (_dir, service) = service(Mode::Spa).await;
        let token = CancellationToken::new();
        service
            .create("index.html", None, None, body(b"<html/>"), &token)
            .await
            .unwrap();
        service
            .create("real.txt", None, None, body(b"real bytes"), &token)
            .await
            .unwrap();

        match service.get("nope/deep/path", None, None, &token).await.unwrap() {
            GetOutcome::Found { meta, .. } => assert_eq!(meta.path, "index.html"),
            GetOutcome::NotModified(_) => panic!("expected Found"),
        }
        match service.get("real.txt", None, None, &token).await.unwrap() {
            GetOutcome::Found { meta, .. } => assert_eq!(meta.path, "real.txt"),
            GetOutcome::NotModified(_) => panic!("expected Found"),
        }
    }

    #[tokio::test]
    async fn populate_is_idempotent() {
        let (dir, service) = service(Mode::Store).await;
        tokio::fs::write(dir.path().join("orphan.txt"), b"orphan bytes")
            .await
            .unwrap();
        let token = CancellationToken::new();
        let first = service.populate(&token).await.unwrap();
        assert_eq!(first, 1);
        let second = service.populate(&token).await.unwrap();
        assert_eq!(second, 0);
    }

    #[tokio::test]
    async fn tombstone_removes_blob_and_marks_cleaned() {
        let (dir, service) = service(Mode::Store).await;
        let token = CancellationToken::new();
        service
            .create("a.txt", None, None, body(b"bytes"), &token)
            .await
            .unwrap();
        service.delete("a.txt", &token).await.unwrap();
        let cleaned = service.tombstone(10, &token).await.unwrap();
        assert_eq!(cleaned, 1);
        assert!(!dir.path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn list_defaults_limit_to_one_hundred_and_paginates() {
        let (_dir, service) = service(Mode::Store).await;
        let token = CancellationToken::new();
        for i in 0..3 {
            service
                .create(&format!("f{i}.txt"), None, None, body(b"x"), &token)
                .await
                .unwrap();
        }
        let (items, next_cursor) = service
            .list(
                ListArgs {
                    limit: Some(2),
                    ..Default::default()
                },
                &token,
            )
            .await
            .unwrap();
        assert_eq!(items.len(), 2);
        assert!(next_cursor.is_some());
    }

    #[tokio::test]
    async fn list_pagination_visits_every_row_exactly_once() {
        let (_dir, service) = service(Mode::Store).await;
        let token = CancellationToken::new();
        for i in 0..3 {
            service
                .create(&format!("f{i}.txt"), None, None, body(b"x"), &token)
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut cursor = None;
        loop {
            let (items, next_cursor) = service
                .list(
                    ListArgs {
                        limit: Some(2),
                        cursor,
                        ..Default::default()
                    },
                    &token,
                )
                .await
                .unwrap();
            seen.extend(items.into_iter().map(|i| i.path));
            match next_cursor {
                Some(c) => cursor = Some(c),
                None => break,
            }
        }

        assert_eq!(seen, vec!["f0.txt", "f1.txt", "f2.txt"]);
    }
}

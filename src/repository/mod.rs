//! Metadata repository (C2): transactional CRUD over the `metadata`
//! relation shared by two driver implementations — an embedded SQL engine
//! (SQLite) and a network SQL engine (Postgres). Both implement
//! [`MetadataRepository`]; only DDL dialect and timestamp column type
//! differ between them.

pub mod postgres_repository;
pub mod sqlite_repository;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::models::metadata::MetaData;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation canceled")]
    Canceled,
    #[error("schema mismatch: {0}")]
    SchemaMismatch(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type RepoResult<T> = Result<T, RepoError>;

/// Parameters for [`MetadataRepository::list`].
#[derive(Clone, Debug, Default)]
pub struct ListQuery {
    pub prefix: Option<String>,
    pub limit: u32,
    pub cursor: Option<String>,
    pub include_deleted: bool,
}

/// Result page of [`MetadataRepository::list`]. `next_cursor` is `Some`
/// only when the page filled exactly (i.e. there may be more rows).
#[derive(Debug, Default)]
pub struct ListPage {
    pub items: Vec<MetaData>,
    pub next_cursor: Option<String>,
}

/// Shared contract between the SQLite and Postgres drivers. All operations
/// are scoped to an ambient [`CancellationToken`], checked at least once per
/// database round-trip.
#[async_trait]
pub trait MetadataRepository: Send + Sync {
    /// Create the table and its two indexes if they don't already exist.
    async fn migrate(&self) -> RepoResult<()>;

    /// Introspect the live schema; fail with `SchemaMismatch` when a
    /// required column is missing or has the wrong logical type/nullability.
    /// Extra columns are ignored.
    async fn validate(&self) -> RepoResult<()>;

    /// Fetch the live row for `path`. `NotFound` if none exists.
    async fn get(&self, path: &str, token: &CancellationToken) -> RepoResult<MetaData>;

    /// Insert or update the live row for `path` in one transaction.
    async fn upsert(
        &self,
        path: &str,
        content_type: &str,
        etag: &str,
        size: i64,
        token: &CancellationToken,
    ) -> RepoResult<MetaData>;

    /// Set `deleted_at = now` on the live row. `NotFound` if no live row
    /// exists for `path`.
    async fn soft_delete(&self, path: &str, token: &CancellationToken) -> RepoResult<()>;

    /// Cursor-paginated listing, ordered by `path` ascending.
    async fn list(&self, query: ListQuery, token: &CancellationToken) -> RepoResult<ListPage>;

    /// Tombstoned-but-uncleaned rows, oldest first.
    async fn list_tombstones(
        &self,
        limit: u32,
        token: &CancellationToken,
    ) -> RepoResult<Vec<MetaData>>;

    /// Set `cleaned_up_at = now`, only when the row is a pending tombstone.
    async fn mark_cleaned(&self, id: Uuid, token: &CancellationToken) -> RepoResult<()>;
}

pub(crate) fn check_canceled(token: &CancellationToken) -> RepoResult<()> {
    if token.is_cancelled() {
        Err(RepoError::Canceled)
    } else {
        Ok(())
    }
}

/// Cursor encoding shared by both drivers: an opaque base64 wrapper around
/// the last-seen path, per spec (§4.2/§9 — clients must treat it as a black
/// box; drivers are free to choose raw-vs-wrapped, this implementation
/// always wraps).
pub(crate) mod cursor {
    use base64::{engine::general_purpose::STANDARD, Engine as _};

    use super::{RepoError, RepoResult};

    pub fn encode(path: &str) -> String {
        STANDARD.encode(path.as_bytes())
    }

    pub fn decode(token: &str) -> RepoResult<String> {
        let bytes = STANDARD
            .decode(token)
            .map_err(|_| RepoError::InvalidArgument("malformed cursor".into()))?;
        String::from_utf8(bytes).map_err(|_| RepoError::InvalidArgument("malformed cursor".into()))
    }
}

//! Core data model for the object-storage service.
//!
//! `MetaData` is the one entity the service persists: one row per logical
//! path, carrying enough state to enforce the soft-delete/cleanup lifecycle
//! without ever touching the blob store to answer a metadata question.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A single object's metadata row.
///
/// Uniqueness of `path` is enforced only across rows with `deleted_at IS
/// NULL` (see the repository's partial index) — a soft-deleted row may
/// share its path with a newer live row created after it.
#[derive(Serialize, Deserialize, Clone, FromRow, Debug, PartialEq)]
pub struct MetaData {
    pub id: Uuid,
    pub path: String,
    pub content_type: String,
    pub etag: String,
    pub file_size_bytes: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub cleaned_up_at: Option<DateTime<Utc>>,
}

/// A single entry in a `List` result — the metadata projection clients see,
/// deliberately narrower than the full `MetaData` row (no id, no soft-delete
/// bookkeeping).
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ObjectEntry {
    pub path: String,
    pub size: i64,
    pub etag: String,
    pub content_type: String,
    pub updated_at: DateTime<Utc>,
}

impl From<&MetaData> for ObjectEntry {
    fn from(m: &MetaData) -> Self {
        ObjectEntry {
            path: m.path.clone(),
            size: m.file_size_bytes,
            etag: m.etag.clone(),
            content_type: m.content_type.clone(),
            updated_at: m.updated_at,
        }
    }
}

/// Operating mode. Affects only how `Get` resolves a miss.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Strict: a miss is always `NotFound`.
    Store,
    /// Serve `path/index.html` when `path` itself misses.
    Static,
    /// Fall back to `/index.html` for any miss (single-page-app routing).
    Spa,
}

impl std::str::FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "store" => Ok(Mode::Store),
            "static" => Ok(Mode::Static),
            "spa" => Ok(Mode::Spa),
            other => Err(format!("unknown server mode `{other}` (expected store|static|spa)")),
        }
    }
}

//! SQLite driver for [`MetadataRepository`] — the embedded SQL engine.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{check_canceled, cursor, ListPage, ListQuery, MetadataRepository, RepoError, RepoResult};
use crate::models::metadata::MetaData;

pub struct SqliteRepository {
    pool: SqlitePool,
    table: String,
}

impl SqliteRepository {
    pub fn new(pool: SqlitePool, table: impl Into<String>) -> Self {
        Self {
            pool,
            table: table.into(),
        }
    }
}

fn escape_like(pattern: &str) -> String {
    pattern
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[async_trait]
impl MetadataRepository for SqliteRepository {
    async fn migrate(&self) -> RepoResult<()> {
        let table = &self.table;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id TEXT PRIMARY KEY,
                path TEXT NOT NULL,
                content_type TEXT NOT NULL,
                etag TEXT NOT NULL,
                file_size_bytes INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                deleted_at TEXT,
                cleaned_up_at TEXT
            )"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE UNIQUE INDEX IF NOT EXISTS {table}_path_live_idx ON {table}(path) WHERE deleted_at IS NULL"
        ))
        .execute(&self.pool)
        .await?;

        sqlx::query(&format!(
            "CREATE INDEX IF NOT EXISTS {table}_tombstone_idx ON {table}(deleted_at, cleaned_up_at)"
        ))
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn validate(&self) -> RepoResult<()> {
        let rows = sqlx::query(&format!("PRAGMA table_info({})", self.table))
            .fetch_all(&self.pool)
            .await?;

        if rows.is_empty() {
            return Err(RepoError::SchemaMismatch(format!(
                "table `{}` does not exist",
                self.table
            )));
        }

        let required: &[(&str, bool)] = &[
            ("id", true),
            ("path", true),
            ("content_type", true),
            ("etag", true),
            ("file_size_bytes", true),
            ("created_at", true),
            ("updated_at", true),
            ("deleted_at", false),
            ("cleaned_up_at", false),
        ];

        for (name, not_null) in required {
            let found = rows.iter().find(|r| {
                r.try_get::<String, _>("name")
                    .map(|n| n == *name)
                    .unwrap_or(false)
            });
            let Some(row) = found else {
                return Err(RepoError::SchemaMismatch(format!("missing column `{name}`")));
            };
            let notnull: i64 = row.try_get("notnull").unwrap_or(0);
            if *not_null && notnull == 0 {
                return Err(RepoError::SchemaMismatch(format!(
                    "column `{name}` must be NOT NULL"
                )));
            }
        }

        Ok(())
    }

    async fn get(&self, path: &str, token: &CancellationToken) -> RepoResult<MetaData> {
        check_canceled(token)?;
        let table = &self.table;
        sqlx::query_as::<_, MetaData>(&format!(
            "SELECT id, path, content_type, etag, file_size_bytes, created_at, updated_at, deleted_at, cleaned_up_at
             FROM {table} WHERE path = ? AND deleted_at IS NULL"
        ))
        .bind(path)
        .fetch_one(&self.pool)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => RepoError::NotFound,
            other => RepoError::Database(other),
        })
    }

    async fn upsert(
        &self,
        path: &str,
        content_type: &str,
        etag: &str,
        size: i64,
        token: &CancellationToken,
    ) -> RepoResult<MetaData> {
        check_canceled(token)?;
        let table = &self.table;
        let now = Utc::now();
        sqlx::query_as::<_, MetaData>(&format!(
            "INSERT INTO {table}
                (id, path, content_type, etag, file_size_bytes, created_at, updated_at, deleted_at, cleaned_up_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, NULL, NULL)
             ON CONFLICT(path) WHERE deleted_at IS NULL DO UPDATE SET
                content_type = excluded.content_type,
                etag = excluded.etag,
                file_size_bytes = excluded.file_size_bytes,
                updated_at = excluded.updated_at
             RETURNING id, path, content_type, etag, file_size_bytes, created_at, updated_at, deleted_at, cleaned_up_at"
        ))
        .bind(Uuid::new_v4())
        .bind(path)
        .bind(content_type)
        .bind(etag)
        .bind(size)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(RepoError::Database)
    }

    async fn soft_delete(&self, path: &str, token: &CancellationToken) -> RepoResult<()> {
        check_canceled(token)?;
        let table = &self.table;
        let result = sqlx::query(&format!(
            "UPDATE {table} SET deleted_at = ? WHERE path = ? AND deleted_at IS NULL"
        ))
        .bind(Utc::now())
        .bind(path)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }

    async fn list(&self, query: ListQuery, token: &CancellationToken) -> RepoResult<ListPage> {
        check_canceled(token)?;
        let table = &self.table;
        let limit = query.limit.clamp(1, 1000);
        let fetch_limit = limit as i64 + 1;

        let mut sql = format!(
            "SELECT id, path, content_type, etag, file_size_bytes, created_at, updated_at, deleted_at, cleaned_up_at
             FROM {table} WHERE 1 = 1"
        );
        if !query.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        if query.prefix.is_some() {
            sql.push_str(" AND path LIKE ? ESCAPE '\\'");
        }
        let decoded_cursor = match &query.cursor {
            Some(raw) => Some(cursor::decode(raw)?),
            None => None,
        };
        if decoded_cursor.is_some() {
            sql.push_str(" AND path > ?");
        }
        sql.push_str(" ORDER BY path ASC LIMIT ?");

        let mut q = sqlx::query_as::<_, MetaData>(&sql);
        if let Some(prefix) = &query.prefix {
            q = q.bind(format!("{}%", escape_like(prefix)));
        }
        if let Some(cursor_path) = &decoded_cursor {
            q = q.bind(cursor_path.clone());
        }
        q = q.bind(fetch_limit);

        let mut rows = q.fetch_all(&self.pool).await?;

        let mut next_cursor = None;
        if rows.len() as i64 == fetch_limit {
            rows.pop();
            next_cursor = rows.last().map(|m| cursor::encode(&m.path));
        }

        Ok(ListPage {
            items: rows,
            next_cursor,
        })
    }

    async fn list_tombstones(
        &self,
        limit: u32,
        token: &CancellationToken,
    ) -> RepoResult<Vec<MetaData>> {
        check_canceled(token)?;
        let table = &self.table;
        let limit = limit.clamp(1, 1000) as i64;
        sqlx::query_as::<_, MetaData>(&format!(
            "SELECT id, path, content_type, etag, file_size_bytes, created_at, updated_at, deleted_at, cleaned_up_at
             FROM {table}
             WHERE deleted_at IS NOT NULL AND cleaned_up_at IS NULL
             ORDER BY deleted_at ASC
             LIMIT ?"
        ))
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(RepoError::Database)
    }

    async fn mark_cleaned(&self, id: Uuid, token: &CancellationToken) -> RepoResult<()> {
        check_canceled(token)?;
        let table = &self.table;
        sqlx::query(&format!(
            "UPDATE {table} SET cleaned_up_at = ?
             WHERE id = ? AND deleted_at IS NOT NULL AND cleaned_up_at IS NULL"
        ))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;

    async fn repo() -> SqliteRepository {
        let pool = SqlitePoolOptions::new()
            .connect("sqlite::memory:")
            .await
            .unwrap();
        let repo = SqliteRepository::new(pool, "metadata".to_string());
        repo.migrate().await.unwrap();
        repo
    }

    #[tokio::test]
    async fn upsert_then_get_roundtrips() {
        let repo = repo().await;
        let token = CancellationToken::new();
        let meta = repo
            .upsert("a.txt", "text/plain", "deadbeef", 4, &token)
            .await
            .unwrap();
        let fetched = repo.get("a.txt", &token).await.unwrap();
        assert_eq!(meta.id, fetched.id);
        assert_eq!(fetched.etag, "deadbeef");
    }

    #[tokio::test]
    async fn upsert_existing_path_updates_in_place() {
        let repo = repo().await;
        let token = CancellationToken::new();
        let first = repo
            .upsert("a.txt", "text/plain", "etag1", 1, &token)
            .await
            .unwrap();
        let second = repo
            .upsert("a.txt", "text/plain", "etag2", 2, &token)
            .await
            .unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.etag, "etag2");
        assert_eq!(second.created_at, first.created_at);
    }

    #[tokio::test]
    async fn soft_delete_then_resurrect_gets_new_id() {
        let repo = repo().await;
        let token = CancellationToken::new();
        let first = repo
            .upsert("a.txt", "text/plain", "etag1", 1, &token)
            .await
            .unwrap();
        repo.soft_delete("a.txt", &token).await.unwrap();
        assert!(matches!(
            repo.get("a.txt", &token).await.unwrap_err(),
            RepoError::NotFound
        ));
        let resurrected = repo
            .upsert("a.txt", "text/plain", "etag3", 1, &token)
            .await
            .unwrap();
        assert_ne!(first.id, resurrected.id);
    }

    #[tokio::test]
    async fn soft_delete_missing_is_not_found() {
        let repo = repo().await;
        let token = CancellationToken::new();
        assert!(matches!(
            repo.soft_delete("missing", &token).await.unwrap_err(),
            RepoError::NotFound
        ));
    }

    #[tokio::test]
    async fn list_paginates_in_path_order() {
        let repo = repo().await;
        let token = CancellationToken::new();
        for name in ["c", "a", "b"] {
            repo.upsert(name, "text/plain", "etag", 1, &token)
                .await
                .unwrap();
        }
        let page1 = repo
            .list(
                ListQuery {
                    limit: 2,
                    ..Default::default()
                },
                &token,
            )
            .await
            .unwrap();
        assert_eq!(
            page1.items.iter().map(|m| m.path.as_str()).collect::<Vec<_>>(),
            vec!["a", "b"]
        );
        assert!(page1.next_cursor.is_some());

        let page2 = repo
            .list(
                ListQuery {
                    limit: 2,
                    cursor: page1.next_cursor,
                    ..Default::default()
                },
                &token,
            )
            .await
            .unwrap();
        assert_eq!(
            page2.items.iter().map(|m| m.path.as_str()).collect::<Vec<_>>(),
            vec!["c"]
        );
        assert!(page2.next_cursor.is_none());
    }

    #[tokio::test]
    async fn tombstone_then_mark_cleaned() {
        let repo = repo().await;
        let token = CancellationToken::new();
        let meta = repo
            .upsert("a.txt", "text/plain", "etag", 1, &token)
            .await
            .unwrap();
        repo.soft_delete("a.txt", &token).await.unwrap();
        let pending = repo.list_tombstones(10, &token).await.unwrap();
        assert_eq!(pending.len(), 1);
        repo.mark_cleaned(meta.id, &token).await.unwrap();
        let pending = repo.list_tombstones(10, &token).await.unwrap();
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn validate_passes_after_migrate() {
        let repo = repo().await;
        repo.validate().await.unwrap();
    }
}

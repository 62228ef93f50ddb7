//! Postgres driver for [`MetadataRepository`] — the network SQL engine.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{check_canceled, cursor, ListPage, ListQuery, MetadataRepository, RepoError, RepoResult};
use crate::models::metadata::MetaData;

pub struct PostgresRepository {
    pool: PgPool,
    table: String,
}

impl PostgresRepository {
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
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
impl MetadataRepository for PostgresRepository {
    async fn migrate(&self) -> RepoResult<()> {
        let table = &self.table;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                id UUID PRIMARY KEY,
                path TEXT NOT NULL,
                content_type TEXT NOT NULL,
                etag TEXT NOT NULL,
                file_size_bytes BIGINT NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                deleted_at TIMESTAMPTZ,
                cleaned_up_at TIMESTAMPTZ
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
        let rows = sqlx::query(
            "SELECT column_name, is_nullable FROM information_schema.columns WHERE table_name = $1",
        )
        .bind(&self.table)
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
                r.try_get::<String, _>("column_name")
                    .map(|n| n == *name)
                    .unwrap_or(false)
            });
            let Some(row) = found else {
                return Err(RepoError::SchemaMismatch(format!("missing column `{name}`")));
            };
            let is_nullable: String = row.try_get("is_nullable").unwrap_or_else(|_| "YES".into());
            if *not_null && is_nullable == "YES" {
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
             FROM {table} WHERE path = $1 AND deleted_at IS NULL"
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
             VALUES ($1, $2, $3, $4, $5, $6, $6, NULL, NULL)
             ON CONFLICT (path) WHERE deleted_at IS NULL DO UPDATE SET
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
        .fetch_one(&self.pool)
        .await
        .map_err(RepoError::Database)
    }

    async fn soft_delete(&self, path: &str, token: &CancellationToken) -> RepoResult<()> {
        check_canceled(token)?;
        let table = &self.table;
        let result = sqlx::query(&format!(
            "UPDATE {table} SET deleted_at = $1 WHERE path = $2 AND deleted_at IS NULL"
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
        let mut next_idx = 1;
        if !query.include_deleted {
            sql.push_str(" AND deleted_at IS NULL");
        }
        let prefix_idx = if query.prefix.is_some() {
            next_idx += 1;
            sql.push_str(&format!(" AND path LIKE ${} ESCAPE '\\'", next_idx - 1));
            Some(next_idx - 1)
        } else {
            None
        };
        let decoded_cursor = match &query.cursor {
            Some(raw) => Some(cursor::decode(raw)?),
            None => None,
        };
        let cursor_idx = if decoded_cursor.is_some() {
            next_idx += 1;
            sql.push_str(&format!(" AND path > ${}", next_idx - 1));
            Some(next_idx - 1)
        } else {
            None
        };
        next_idx += 1;
        sql.push_str(&format!(" ORDER BY path ASC LIMIT ${}", next_idx - 1));
        let _ = (prefix_idx, cursor_idx);

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
             LIMIT $1"
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
            "UPDATE {table} SET cleaned_up_at = $1
             WHERE id = $2 AND deleted_at IS NOT NULL AND cleaned_up_at IS NULL"
        ))
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Sqlite,
};
use std::str::FromStr;

/// Scope used by the commute client for its profile and delay records.
pub const DEFAULT_SCOPE: &str = "commute";

/// Scoped string key/value persistence. Every `set` replaces the whole value
/// for its key in one statement, so a record is either the old or the new
/// document, never a mix.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
}

/// Stand-in used when the real store could not be opened. Reads and writes
/// all fail so callers fall back to their "no data" behaviour.
pub struct MissingKeyValueStore {
    reason: String,
}

impl MissingKeyValueStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl KeyValueStore for MissingKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Err(anyhow!(
            "storage unavailable while reading '{key}': {}",
            self.reason
        ))
    }

    async fn set(&self, key: &str, _value: &str) -> Result<()> {
        Err(anyhow!(
            "storage unavailable while writing '{key}': {}",
            self.reason
        ))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        Err(anyhow!(
            "storage unavailable while deleting '{key}': {}",
            self.reason
        ))
    }
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
    scope: String,
}

impl Storage {
    /// Opens the database file, creating it if missing. Its directory must
    /// already exist.
    pub async fn new(database_url: &str) -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;
        ensure_kv_table(&pool).await?;
        Ok(Self {
            pool,
            scope: DEFAULT_SCOPE.to_string(),
        })
    }

    /// Handle on the same database whose keys live in another scope.
    pub fn with_scope(&self, scope: impl Into<String>) -> Self {
        Self {
            pool: self.pool.clone(),
            scope: scope.into(),
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for Storage {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let value: Option<String> =
            sqlx::query_scalar("SELECT value FROM kv_entries WHERE scope = ? AND key = ?")
                .bind(&self.scope)
                .bind(key)
                .fetch_optional(&self.pool)
                .await
                .with_context(|| format!("failed to read '{}/{key}'", self.scope))?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO kv_entries (scope, key, value)
            VALUES (?, ?, ?)
            ON CONFLICT(scope, key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(&self.scope)
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to write '{}/{key}'", self.scope))?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        sqlx::query("DELETE FROM kv_entries WHERE scope = ? AND key = ?")
            .bind(&self.scope)
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete '{}/{key}'", self.scope))?;
        Ok(())
    }
}

async fn ensure_kv_table(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_entries (
            scope      TEXT NOT NULL,
            key        TEXT NOT NULL,
            value      TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (scope, key)
        )
        "#,
    )
    .execute(pool)
    .await
    .context("failed to ensure kv_entries table exists")?;
    Ok(())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

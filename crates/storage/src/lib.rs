use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::TerminalId;

/// Well-known key under which the bound terminal identifier is persisted.
pub const TERMINAL_ID_KEY: &str = "terminal_id";

/// Durable home of the terminal binding.
#[async_trait]
pub trait TerminalBindingStore: Send + Sync {
    async fn load_terminal_id(&self) -> Result<Option<TerminalId>>;
    async fn save_terminal_id(&self, terminal_id: &TerminalId) -> Result<()>;
    async fn clear_terminal_id(&self) -> Result<bool>;
}

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone)]
pub struct StoredSetting {
    pub name: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        // Every connection to `sqlite::memory:` opens its own database.
        let max_connections = if database_url.starts_with("sqlite::memory:") {
            1
        } else {
            5
        };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(connect_options)
            .await
            .with_context(|| format!("failed to open sqlite database '{database_url}'"))?;

        let storage = Self { pool };
        storage.ensure_settings_table().await?;
        Ok(storage)
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

    async fn ensure_settings_table(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS bridge_settings (
                name       TEXT PRIMARY KEY NOT NULL,
                value      TEXT NOT NULL,
                updated_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .context("failed to ensure bridge_settings table exists")?;
        Ok(())
    }

    pub async fn put_setting(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO bridge_settings (name, value, updated_at) VALUES (?, ?, ?)
             ON CONFLICT(name) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(name)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store setting '{name}'"))?;
        Ok(())
    }

    pub async fn setting(&self, name: &str) -> Result<Option<StoredSetting>> {
        let row = sqlx::query("SELECT name, value, updated_at FROM bridge_settings WHERE name = ?")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read setting '{name}'"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let updated_at_raw: String = row.try_get("updated_at")?;
        Ok(Some(StoredSetting {
            name: row.try_get("name")?,
            value: row.try_get("value")?,
            updated_at: parse_timestamp(&updated_at_raw),
        }))
    }

    pub async fn delete_setting(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM bridge_settings WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete setting '{name}'"))?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl TerminalBindingStore for Storage {
    async fn load_terminal_id(&self) -> Result<Option<TerminalId>> {
        let Some(setting) = self.setting(TERMINAL_ID_KEY).await? else {
            return Ok(None);
        };
        let terminal_id = TerminalId::parse(&setting.value)
            .with_context(|| format!("stored {TERMINAL_ID_KEY} is invalid"))?;
        Ok(Some(terminal_id))
    }

    async fn save_terminal_id(&self, terminal_id: &TerminalId) -> Result<()> {
        self.put_setting(TERMINAL_ID_KEY, terminal_id.as_str()).await
    }

    async fn clear_terminal_id(&self) -> Result<bool> {
        self.delete_setting(TERMINAL_ID_KEY).await
    }
}

// Rows written by the CURRENT_TIMESTAMP default use sqlite's own format.
fn parse_timestamp(raw: &str) -> DateTime<Utc> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return parsed.with_timezone(&Utc);
    }
    chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .map(|naive| naive.and_utc())
        .unwrap_or_else(|_| Utc::now())
}

/// Creates the directory holding a file-backed sqlite database, if any.
pub fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url.starts_with("sqlite::memory:") || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;

use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::path::{Path, PathBuf};

/// Persisted record pointing at a completed download. Opaque to the manager;
/// only the filesystem probe knows how to resolve it and judge staleness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Locator {
    pub path: PathBuf,
    pub fingerprint: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("malformed locator payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable asset-id to locator mapping; the only state that survives a
/// process restart.
#[derive(Clone)]
pub struct LocatorStore {
    pool: SqlitePool,
}

impl LocatorStore {
    pub async fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let abs = if db_path.is_absolute() {
            db_path.to_path_buf()
        } else {
            std::env::current_dir()?.join(db_path)
        };

        let mut p = abs.to_string_lossy().to_string();
        if cfg!(windows) {
            p = p.replace('\\', "/");
        }

        // mode=rwc so a missing database file gets created.
        let url = if p.starts_with('/') {
            format!("sqlite://{}?mode=rwc", p)
        } else {
            format!("sqlite:///{}?mode=rwc", p)
        };

        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Private throwaway database, one connection so the schema is shared.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    /// Closes the connection pool; any later operation returns a database
    /// error.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS locators (
              asset_id TEXT PRIMARY KEY,
              payload TEXT NOT NULL,
              updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn now_epoch() -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64
    }

    pub async fn get(&self, asset_id: &str) -> Result<Option<Locator>, StoreError> {
        let row = sqlx::query(r#"SELECT payload FROM locators WHERE asset_id = ?;"#)
            .bind(asset_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let payload: String = row.get("payload");
                Ok(Some(serde_json::from_str(&payload)?))
            }
            None => Ok(None),
        }
    }

    pub async fn set(&self, asset_id: &str, locator: &Locator) -> Result<(), StoreError> {
        let payload = serde_json::to_string(locator)?;
        sqlx::query(
            r#"
            INSERT INTO locators(asset_id, payload, updated_at)
            VALUES(?, ?, ?)
            ON CONFLICT(asset_id) DO UPDATE
            SET payload = excluded.payload,
                updated_at = excluded.updated_at;
            "#,
        )
        .bind(asset_id)
        .bind(payload)
        .bind(Self::now_epoch())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn remove(&self, asset_id: &str) -> Result<(), StoreError> {
        sqlx::query(r#"DELETE FROM locators WHERE asset_id = ?;"#)
            .bind(asset_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

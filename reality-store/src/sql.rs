//! Generic SQL storage adapter, covering the Postgres/MySQL/SQLite
//! dialects named in spec.md §6's persisted state layout.
//!
//! A single `sqlx::Any` pool is used so one code path serves all three
//! dialects; only the upsert statement and the isolation-level pragma
//! differ, matching the dialect-specific notes in the spec ("Postgres
//! `ON CONFLICT`, MySQL `ON DUPLICATE KEY UPDATE`, SQLite `INSERT OR
//! REPLACE`").

use crate::{now_millis, NodeMeta, StorageAdapter, StoreError};
use reality_hash::ContentHash;
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{Any, Connection, Pool, Row};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlDialect {
    Postgres,
    MySql,
    Sqlite,
}

impl SqlDialect {
    pub fn from_connection_string(s: &str) -> Result<Self, StoreError> {
        if s.starts_with("postgres://") || s.starts_with("postgresql://") {
            Ok(SqlDialect::Postgres)
        } else if s.starts_with("mysql://") {
            Ok(SqlDialect::MySql)
        } else if s.starts_with("sqlite:") {
            Ok(SqlDialect::Sqlite)
        } else {
            Err(StoreError::Backend(format!("unrecognized connection string scheme: {s}")))
        }
    }
}

pub struct SqlStore {
    pool: Pool<Any>,
    dialect: SqlDialect,
    table: String,
}

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SqlStore {
    pub async fn connect(connection_string: &str, table_name: impl Into<String>) -> Result<Self, StoreError> {
        sqlx::any::install_default_drivers();
        let dialect = SqlDialect::from_connection_string(connection_string)?;
        let pool = AnyPoolOptions::new()
            .max_connections(10)
            .connect(connection_string)
            .await
            .map_err(db_err)?;
        let store = SqlStore { pool, dialect, table: table_name.into() };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        let key_column = match self.dialect {
            SqlDialect::MySql => "`key` VARCHAR(255) PRIMARY KEY",
            SqlDialect::Postgres | SqlDialect::Sqlite => "key TEXT PRIMARY KEY",
        };
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS {t} ({k}, version BIGINT NOT NULL, hash VARCHAR(64) NOT NULL, updated_at BIGINT NOT NULL)",
            t = self.table,
            k = key_column,
        );
        sqlx::query(&ddl).execute(&self.pool).await.map_err(db_err)?;
        let idx = format!("CREATE INDEX IF NOT EXISTS idx_{t}_version ON {t} (version)", t = self.table);
        sqlx::query(&idx).execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    fn key_column(&self) -> &'static str {
        match self.dialect {
            SqlDialect::MySql => "`key`",
            SqlDialect::Postgres | SqlDialect::Sqlite => "key",
        }
    }

    fn upsert_sql(&self) -> String {
        let k = self.key_column();
        match self.dialect {
            SqlDialect::Postgres => format!(
                "INSERT INTO {t} ({k}, version, hash, updated_at) VALUES (?, ?, ?, ?) \
                 ON CONFLICT ({k}) DO UPDATE SET version = EXCLUDED.version, hash = EXCLUDED.hash, updated_at = EXCLUDED.updated_at",
                t = self.table,
            ),
            SqlDialect::MySql => format!(
                "INSERT INTO {t} ({k}, version, hash, updated_at) VALUES (?, ?, ?, ?) \
                 ON DUPLICATE KEY UPDATE version = VALUES(version), hash = VALUES(hash), updated_at = VALUES(updated_at)",
                t = self.table,
            ),
            SqlDialect::Sqlite => format!(
                "INSERT OR REPLACE INTO {t} ({k}, version, hash, updated_at) VALUES (?, ?, ?, ?)",
                t = self.table,
            ),
        }
    }

    fn row_to_meta(row: &AnyRow) -> Result<NodeMeta, StoreError> {
        let key: String = row.try_get("node_key").map_err(db_err)?;
        let version: i64 = row.try_get("version").map_err(db_err)?;
        let hash_hex: String = row.try_get("hash").map_err(db_err)?;
        let updated_at: i64 = row.try_get("updated_at").map_err(db_err)?;
        let hash = ContentHash::try_from(hash_hex)
            .map_err(|e| StoreError::Backend(format!("corrupt hash in storage: {e}")))?;
        Ok(NodeMeta { key, version: version as u64, hash, updated_at: updated_at as u64 })
    }
}

#[async_trait::async_trait]
impl StorageAdapter for SqlStore {
    async fn get_node(&self, key: &str) -> Result<Option<NodeMeta>, StoreError> {
        let sql = format!("SELECT {k} as node_key, version, hash, updated_at FROM {t} WHERE {k} = ?", k = self.key_column(), t = self.table);
        let row = sqlx::query(&sql).bind(key).fetch_optional(&self.pool).await.map_err(db_err)?;
        row.as_ref().map(Self::row_to_meta).transpose()
    }

    async fn get_nodes(&self, keys: &[String]) -> Result<HashMap<String, NodeMeta>, StoreError> {
        let mut out = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(meta) = self.get_node(key).await? {
                out.insert(key.clone(), meta);
            }
        }
        Ok(out)
    }

    async fn increment_version(&self, key: &str, hash: ContentHash) -> Result<NodeMeta, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        if self.dialect != SqlDialect::Sqlite {
            // Must run before BEGIN: MySQL rejects `SET TRANSACTION ISOLATION
            // LEVEL` once a transaction is already in progress (error 1568),
            // so this has to set the level for the *next* transaction on this
            // connection rather than the current one.
            sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
                .execute(&mut *conn)
                .await
                .map_err(db_err)?;
        }
        let mut tx = conn.begin().await.map_err(db_err)?;
        let max_sql = format!("SELECT MAX(version) as max_version FROM {t}", t = self.table);
        let max_row = sqlx::query(&max_sql).fetch_one(&mut *tx).await.map_err(db_err)?;
        let current_max: Option<i64> = max_row.try_get("max_version").map_err(db_err)?;
        let new_version = current_max.unwrap_or(0) + 1;
        let now = now_millis() as i64;
        sqlx::query(&self.upsert_sql())
            .bind(key)
            .bind(new_version)
            .bind(hash.to_hex())
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;
        Ok(NodeMeta { key: key.to_string(), version: new_version as u64, hash, updated_at: now as u64 })
    }

    async fn set_node(&self, key: &str, version: u64, hash: ContentHash) -> Result<NodeMeta, StoreError> {
        let now = now_millis() as i64;
        sqlx::query(&self.upsert_sql())
            .bind(key)
            .bind(version as i64)
            .bind(hash.to_hex())
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(NodeMeta { key: key.to_string(), version, hash, updated_at: now as u64 })
    }

    async fn list_changed_since(&self, version: u64) -> Result<Vec<NodeMeta>, StoreError> {
        let sql = format!(
            "SELECT {k} as node_key, version, hash, updated_at FROM {t} WHERE version > ? ORDER BY version ASC",
            k = self.key_column(),
            t = self.table,
        );
        let rows = sqlx::query(&sql).bind(version as i64).fetch_all(&self.pool).await.map_err(db_err)?;
        rows.iter().map(Self::row_to_meta).collect()
    }

    async fn get_max_version(&self) -> Result<u64, StoreError> {
        let sql = format!("SELECT MAX(version) as max_version FROM {t}", t = self.table);
        let row = sqlx::query(&sql).fetch_one(&self.pool).await.map_err(db_err)?;
        let max_version: Option<i64> = row.try_get("max_version").map_err(db_err)?;
        Ok(max_version.unwrap_or(0) as u64)
    }

    async fn delete_node(&self, key: &str) -> Result<(), StoreError> {
        let sql = format!("DELETE FROM {t} WHERE {k} = ?", k = self.key_column(), t = self.table);
        sqlx::query(&sql).bind(key).execute(&self.pool).await.map_err(db_err)?;
        Ok(())
    }

    async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

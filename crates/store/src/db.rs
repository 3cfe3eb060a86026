use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use sqlx::sqlite::{SqliteConnectOptions, SqliteQueryResult, SqliteRow};
use sqlx::{Connection, Row, SqliteConnection};
use tokio::sync::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{info, warn};

use crate::{Result, ShutdownCoordinator, StoreError, RESET_HEIGHT};

/// Tables owned by one store. `tables` lists drop order for resets.
pub(crate) struct Schema {
    pub name: &'static str,
    pub create: &'static [&'static str],
    pub tables: &'static [&'static str],
}

pub(crate) const CREATE_HEIGHTS: &str = r#"
    CREATE TABLE IF NOT EXISTS heights (
        chain  TEXT PRIMARY KEY NOT NULL,
        height INTEGER NOT NULL
    )
"#;

/// A single connection behind the store's mutex. `None` once closed.
#[derive(Clone)]
pub(crate) struct Handle {
    schema: &'static Schema,
    conn: Arc<Mutex<Option<SqliteConnection>>>,
}

impl Handle {
    pub async fn open(schema: &'static Schema, path: &Path, shutdown: &ShutdownCoordinator) -> Result<Self> {
        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        Self::connect(schema, options, shutdown).await
    }

    pub async fn open_in_memory(schema: &'static Schema, shutdown: &ShutdownCoordinator) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Open(format!("{}: {e}", schema.name)))?;
        Self::connect(schema, options, shutdown).await
    }

    async fn connect(
        schema: &'static Schema,
        options: SqliteConnectOptions,
        shutdown: &ShutdownCoordinator,
    ) -> Result<Self> {
        let mut conn = SqliteConnection::connect_with(&options)
            .await
            .map_err(|e| StoreError::Open(format!("{}: {e}", schema.name)))?;

        for stmt in schema.create {
            sqlx::query(stmt)
                .execute(&mut conn)
                .await
                .map_err(|e| StoreError::Open(format!("{}: {e}", schema.name)))?;
        }

        let handle = Self {
            schema,
            conn: Arc::new(Mutex::new(Some(conn))),
        };

        let release = handle.clone();
        shutdown
            .register(schema.name, move || async move {
                if let Err(e) = release.close().await {
                    warn!(store=%release.schema.name, "close failed: {e}");
                }
            })
            .await;

        info!(store=%schema.name, "opened");
        Ok(handle)
    }

    pub async fn lock(&self) -> Result<MappedMutexGuard<'_, SqliteConnection>> {
        let name = self.schema.name;
        MutexGuard::try_map(self.conn.lock().await, |conn| conn.as_mut()).map_err(|_| StoreError::Closed(name))
    }

    pub async fn close(&self) -> Result<()> {
        let mut guard = self.conn.lock().await;
        if let Some(conn) = guard.take() {
            conn.close().await?;
            info!(store=%self.schema.name, "closed");
        }
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        let mut conn = self.lock().await?;
        let mut tx = conn.begin().await?;
        for table in self.schema.tables {
            let sql = format!("DROP TABLE IF EXISTS {table}");
            sqlx::query(&sql).execute(&mut *tx).await?;
        }
        for stmt in self.schema.create {
            sqlx::query(stmt).execute(&mut *tx).await?;
        }
        tx.commit().await?;
        warn!(store=%self.schema.name, "reset: tables recreated");
        Ok(())
    }
}

/// Moves a chain's cursor forward. Lower or equal heights leave it alone;
/// [`RESET_HEIGHT`] sets it to zero. Returns the stored value.
pub(crate) async fn advance_height(conn: &mut SqliteConnection, chain: &str, height: u32) -> Result<u32> {
    let mut tx = conn.begin().await?;

    let stored: Option<i64> = sqlx::query_scalar("SELECT height FROM heights WHERE chain = ?")
        .bind(chain)
        .fetch_optional(&mut *tx)
        .await?;
    let stored = match stored {
        Some(v) => to_u32("height", v)?,
        None => 0,
    };

    let next = if height == RESET_HEIGHT {
        0
    } else if height > stored {
        height
    } else {
        return Ok(stored);
    };

    sqlx::query(
        r#"
        INSERT INTO heights (chain, height) VALUES (?, ?)
        ON CONFLICT(chain) DO UPDATE SET height = excluded.height
        "#,
    )
    .bind(chain)
    .bind(i64::from(next))
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(next)
}

/// Per-row outcome inside a batch: unique violations are reported as
/// `false`, anything else aborts the batch.
pub(crate) fn inserted(res: std::result::Result<SqliteQueryResult, sqlx::Error>) -> Result<bool> {
    match res {
        Ok(_) => Ok(true),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Ok(false),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn to_u32(column: &'static str, v: i64) -> Result<u32> {
    u32::try_from(v).map_err(|_| StoreError::Corrupt(column, v.to_string()))
}

pub(crate) fn get_u32(row: &SqliteRow, column: &'static str) -> Result<u32> {
    to_u32(column, row.try_get(column)?)
}

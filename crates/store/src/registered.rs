use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row};

use crate::db::{self, Handle, Schema};
use crate::{DataStore, RegisteredSideChain, Result, ShutdownCoordinator, StoreError};

static SCHEMA: Schema = Schema {
    name: "registered_side_chains",
    create: &[r#"
        CREATE TABLE IF NOT EXISTS registered_side_chains (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_hash            TEXT NOT NULL UNIQUE,
            genesis_block_hash TEXT NOT NULL UNIQUE,
            register_info      BLOB NOT NULL,
            height             INTEGER NOT NULL
        )
    "#],
    tables: &["registered_side_chains"],
};

const INSERT: &str = r#"
    INSERT INTO registered_side_chains (tx_hash, genesis_block_hash, register_info, height)
    VALUES (?, ?, ?, ?)
"#;

const SELECT: &str = r#"
    SELECT tx_hash, genesis_block_hash, register_info, height FROM registered_side_chains
"#;

/// Side chains registered on the main chain, keyed by genesis block hash.
#[derive(Clone)]
pub struct RegisteredSideChainStore {
    handle: Handle,
}

fn row_to_registered(row: &SqliteRow) -> Result<RegisteredSideChain> {
    Ok(RegisteredSideChain {
        tx_hash: row.try_get("tx_hash")?,
        genesis_block_hash: row.try_get("genesis_block_hash")?,
        register_info: row.try_get("register_info")?,
        height: db::get_u32(row, "height")?,
    })
}

impl RegisteredSideChainStore {
    pub async fn open(path: &Path, shutdown: &ShutdownCoordinator) -> Result<Self> {
        Ok(Self { handle: Handle::open(&SCHEMA, path, shutdown).await? })
    }

    pub async fn open_in_memory(shutdown: &ShutdownCoordinator) -> Result<Self> {
        Ok(Self { handle: Handle::open_in_memory(&SCHEMA, shutdown).await? })
    }

    pub async fn add_registered_side_chain(&self, chain: &RegisteredSideChain) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        let res = sqlx::query(INSERT)
            .bind(&chain.tx_hash)
            .bind(&chain.genesis_block_hash)
            .bind(&chain.register_info)
            .bind(i64::from(chain.height))
            .execute(&mut *conn)
            .await;

        if db::inserted(res)? {
            Ok(())
        } else {
            Err(StoreError::Duplicate(chain.genesis_block_hash.clone()))
        }
    }

    pub async fn add_registered_side_chains(&self, chains: &[RegisteredSideChain]) -> Result<Vec<bool>> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;
        let mut results = Vec::with_capacity(chains.len());
        for chain in chains {
            let res = sqlx::query(INSERT)
                .bind(&chain.tx_hash)
                .bind(&chain.genesis_block_hash)
                .bind(&chain.register_info)
                .bind(i64::from(chain.height))
                .execute(&mut *dbtx)
                .await;
            results.push(db::inserted(res)?);
        }
        dbtx.commit().await?;
        Ok(results)
    }

    pub async fn has_registered_side_chain(&self, genesis_block_hash: &str) -> Result<bool> {
        Ok(self.get_registered_side_chain(genesis_block_hash).await?.is_some())
    }

    pub async fn get_registered_side_chain(&self, genesis_block_hash: &str) -> Result<Option<RegisteredSideChain>> {
        let mut conn = self.handle.lock().await?;
        let sql = format!("{SELECT} WHERE genesis_block_hash = ?");
        let row = sqlx::query(&sql)
            .bind(genesis_block_hash)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_registered).transpose()
    }

    pub async fn get_all_registered_side_chains(&self) -> Result<Vec<RegisteredSideChain>> {
        let mut conn = self.handle.lock().await?;
        let sql = format!("{SELECT} ORDER BY height, id");
        let rows = sqlx::query(&sql).fetch_all(&mut *conn).await?;
        rows.iter().map(row_to_registered).collect()
    }

    pub async fn remove_registered_side_chain(&self, genesis_block_hash: &str) -> Result<()> {
        self.remove_registered_side_chains(&[genesis_block_hash.to_string()]).await
    }

    pub async fn remove_registered_side_chains(&self, genesis_block_hashes: &[String]) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;
        for hash in genesis_block_hashes {
            sqlx::query("DELETE FROM registered_side_chains WHERE genesis_block_hash = ?")
                .bind(hash)
                .execute(&mut *dbtx)
                .await?;
        }
        dbtx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DataStore for RegisteredSideChainStore {
    async fn reset_data_store(&self) -> Result<()> {
        self.handle.reset().await
    }

    async fn close(&self) -> Result<()> {
        self.handle.close().await
    }
}

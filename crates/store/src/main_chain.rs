use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row};
use tracing::debug;

use crate::db::{self, Handle, Schema};
use crate::{DataStore, MainChainTx, Result, ShutdownCoordinator, StoreError};

const MAIN_CHAIN: &str = "main";

static SCHEMA: Schema = Schema {
    name: "main_chain",
    create: &[
        db::CREATE_HEIGHTS,
        r#"
        CREATE TABLE IF NOT EXISTS main_chain_txs (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_hash               TEXT NOT NULL,
            genesis_block_address TEXT NOT NULL,
            tx                    BLOB NOT NULL,
            merkle_proof          BLOB NOT NULL,
            UNIQUE (tx_hash, genesis_block_address)
        )
        "#,
    ],
    tables: &["main_chain_txs", "heights"],
};

/// Main-chain deposits awaiting delivery plus the main-chain cursor.
#[derive(Clone)]
pub struct MainChainStore {
    handle: Handle,
}

fn row_to_tx(row: &SqliteRow) -> Result<MainChainTx> {
    Ok(MainChainTx {
        tx_hash: row.try_get("tx_hash")?,
        genesis_block_address: row.try_get("genesis_block_address")?,
        tx: row.try_get("tx")?,
        merkle_proof: row.try_get("merkle_proof")?,
    })
}

impl MainChainStore {
    pub async fn open(path: &Path, shutdown: &ShutdownCoordinator) -> Result<Self> {
        Ok(Self { handle: Handle::open(&SCHEMA, path, shutdown).await? })
    }

    pub async fn open_in_memory(shutdown: &ShutdownCoordinator) -> Result<Self> {
        Ok(Self { handle: Handle::open_in_memory(&SCHEMA, shutdown).await? })
    }

    /// Advances the main-chain cursor; see [`crate::RESET_HEIGHT`].
    pub async fn current_height(&self, height: u32) -> Result<u32> {
        let mut conn = self.handle.lock().await?;
        db::advance_height(&mut conn, MAIN_CHAIN, height).await
    }

    pub async fn add_main_chain_tx(&self, tx: &MainChainTx) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        let res = sqlx::query(
            r#"
            INSERT INTO main_chain_txs (tx_hash, genesis_block_address, tx, merkle_proof)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&tx.tx_hash)
        .bind(&tx.genesis_block_address)
        .bind(&tx.tx)
        .bind(&tx.merkle_proof)
        .execute(&mut *conn)
        .await;

        if db::inserted(res)? {
            Ok(())
        } else {
            Err(StoreError::Duplicate(format!("{} ({})", tx.tx_hash, tx.genesis_block_address)))
        }
    }

    /// Inserts every row in one transaction; duplicates come back as `false`.
    pub async fn add_main_chain_txs(&self, txs: &[MainChainTx]) -> Result<Vec<bool>> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;

        let mut results = Vec::with_capacity(txs.len());
        for tx in txs {
            let res = sqlx::query(
                r#"
                INSERT INTO main_chain_txs (tx_hash, genesis_block_address, tx, merkle_proof)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&tx.tx_hash)
            .bind(&tx.genesis_block_address)
            .bind(&tx.tx)
            .bind(&tx.merkle_proof)
            .execute(&mut *dbtx)
            .await;
            results.push(db::inserted(res)?);
        }

        dbtx.commit().await?;
        debug!(total = txs.len(), added = results.iter().filter(|ok| **ok).count(), "main_chain: batch insert");
        Ok(results)
    }

    pub async fn has_main_chain_tx(&self, tx_hash: &str, genesis_block_address: &str) -> Result<bool> {
        let mut conn = self.handle.lock().await?;
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT id FROM main_chain_txs WHERE tx_hash = ? AND genesis_block_address = ?",
        )
        .bind(tx_hash)
        .bind(genesis_block_address)
        .fetch_optional(&mut *conn)
        .await?;
        Ok(found.is_some())
    }

    pub async fn remove_main_chain_tx(&self, tx_hash: &str, genesis_block_address: &str) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        sqlx::query("DELETE FROM main_chain_txs WHERE tx_hash = ? AND genesis_block_address = ?")
            .bind(tx_hash)
            .bind(genesis_block_address)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    /// Removes `(tx_hash, genesis_block_address)` pairs in one transaction.
    pub async fn remove_main_chain_txs(&self, keys: &[(String, String)]) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;
        for (tx_hash, genesis_block_address) in keys {
            sqlx::query("DELETE FROM main_chain_txs WHERE tx_hash = ? AND genesis_block_address = ?")
                .bind(tx_hash)
                .bind(genesis_block_address)
                .execute(&mut *dbtx)
                .await?;
        }
        dbtx.commit().await?;
        Ok(())
    }

    /// `(tx_hash, genesis_block_address)` of every pending deposit.
    pub async fn get_all_main_chain_tx_hashes(&self) -> Result<Vec<(String, String)>> {
        let mut conn = self.handle.lock().await?;
        let rows = sqlx::query("SELECT tx_hash, genesis_block_address FROM main_chain_txs ORDER BY id")
            .fetch_all(&mut *conn)
            .await?;
        rows.iter()
            .map(|row| -> Result<(String, String)> {
                Ok((row.try_get("tx_hash")?, row.try_get("genesis_block_address")?))
            })
            .collect()
    }

    pub async fn get_all_main_chain_txs(&self) -> Result<Vec<MainChainTx>> {
        let mut conn = self.handle.lock().await?;
        let rows = sqlx::query(
            "SELECT tx_hash, genesis_block_address, tx, merkle_proof FROM main_chain_txs ORDER BY id",
        )
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(row_to_tx).collect()
    }

    /// Rows whose hash is in `tx_hashes`, for any genesis address.
    pub async fn get_main_chain_txs_from_hashes(&self, tx_hashes: &[String]) -> Result<Vec<MainChainTx>> {
        let mut conn = self.handle.lock().await?;
        let mut out = Vec::new();
        for tx_hash in tx_hashes {
            let rows = sqlx::query(
                r#"
                SELECT tx_hash, genesis_block_address, tx, merkle_proof
                FROM main_chain_txs WHERE tx_hash = ? ORDER BY id
                "#,
            )
            .bind(tx_hash)
            .fetch_all(&mut *conn)
            .await?;
            for row in &rows {
                out.push(row_to_tx(row)?);
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl DataStore for MainChainStore {
    async fn reset_data_store(&self) -> Result<()> {
        self.handle.reset().await
    }

    async fn close(&self) -> Result<()> {
        self.handle.close().await
    }
}

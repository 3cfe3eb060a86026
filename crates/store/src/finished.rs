//! Settled deposits and withdraws.
//!
//! A withdraw batch shares one side-chain transaction blob: the blob is
//! stored once in `side_chain_txs` and every hash row in `withdraw_txs`
//! points at it by id.

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row};
use tracing::debug;

use crate::db::{self, Handle, Schema};
use crate::{DataStore, DepositRecord, DepositTx, Result, ShutdownCoordinator, StoreError, WithdrawRecord};

static SCHEMA: Schema = Schema {
    name: "finished_txs",
    create: &[
        r#"
        CREATE TABLE IF NOT EXISTS deposit_txs (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_hash               TEXT NOT NULL,
            genesis_block_address TEXT NOT NULL,
            succeeded             BOOLEAN NOT NULL,
            recorded_at           TEXT NOT NULL,
            UNIQUE (tx_hash, genesis_block_address)
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS side_chain_txs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            tx BLOB NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS withdraw_txs (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_hash          TEXT NOT NULL UNIQUE,
            side_chain_tx_id INTEGER NOT NULL REFERENCES side_chain_txs (id),
            succeeded        BOOLEAN NOT NULL,
            recorded_at      TEXT NOT NULL
        )
        "#,
    ],
    tables: &["withdraw_txs", "side_chain_txs", "deposit_txs"],
};

const INSERT_DEPOSIT: &str = r#"
    INSERT INTO deposit_txs (tx_hash, genesis_block_address, succeeded, recorded_at)
    VALUES (?, ?, ?, ?)
"#;

const SELECT_WITHDRAW: &str = r#"
    SELECT w.tx_hash, s.tx, w.succeeded, w.recorded_at
    FROM withdraw_txs w JOIN side_chain_txs s ON s.id = w.side_chain_tx_id
"#;

const PRUNE_BLOBS: &str = r#"
    DELETE FROM side_chain_txs
    WHERE id NOT IN (SELECT side_chain_tx_id FROM withdraw_txs)
"#;

#[derive(Clone)]
pub struct FinishedTxStore {
    handle: Handle,
}

fn row_to_deposit(row: &SqliteRow) -> Result<DepositRecord> {
    Ok(DepositRecord {
        tx_hash: row.try_get("tx_hash")?,
        genesis_block_address: row.try_get("genesis_block_address")?,
        succeeded: row.try_get("succeeded")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

fn row_to_withdraw(row: &SqliteRow) -> Result<WithdrawRecord> {
    Ok(WithdrawRecord {
        tx_hash: row.try_get("tx_hash")?,
        side_chain_tx: row.try_get("tx")?,
        succeeded: row.try_get("succeeded")?,
        recorded_at: row.try_get("recorded_at")?,
    })
}

impl FinishedTxStore {
    pub async fn open(path: &Path, shutdown: &ShutdownCoordinator) -> Result<Self> {
        Ok(Self { handle: Handle::open(&SCHEMA, path, shutdown).await? })
    }

    pub async fn open_in_memory(shutdown: &ShutdownCoordinator) -> Result<Self> {
        Ok(Self { handle: Handle::open_in_memory(&SCHEMA, shutdown).await? })
    }

    // ---------------- Deposits ---------------- //

    pub async fn add_deposit_tx(&self, deposit: &DepositTx) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        let res = sqlx::query(INSERT_DEPOSIT)
            .bind(&deposit.tx_hash)
            .bind(&deposit.genesis_block_address)
            .bind(deposit.succeeded)
            .bind(Utc::now())
            .execute(&mut *conn)
            .await;

        if db::inserted(res)? {
            Ok(())
        } else {
            Err(StoreError::Duplicate(format!("{} ({})", deposit.tx_hash, deposit.genesis_block_address)))
        }
    }

    pub async fn add_deposit_txs(&self, deposits: &[DepositTx]) -> Result<Vec<bool>> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;
        let now = Utc::now();

        let mut results = Vec::with_capacity(deposits.len());
        for deposit in deposits {
            let res = sqlx::query(INSERT_DEPOSIT)
                .bind(&deposit.tx_hash)
                .bind(&deposit.genesis_block_address)
                .bind(deposit.succeeded)
                .bind(now)
                .execute(&mut *dbtx)
                .await;
            results.push(db::inserted(res)?);
        }

        dbtx.commit().await?;
        debug!(total = deposits.len(), added = results.iter().filter(|ok| **ok).count(), "finished: deposit batch");
        Ok(results)
    }

    pub async fn has_deposit_tx(&self, tx_hash: &str, genesis_block_address: &str) -> Result<bool> {
        let mut conn = self.handle.lock().await?;
        let found: Option<i64> =
            sqlx::query_scalar("SELECT id FROM deposit_txs WHERE tx_hash = ? AND genesis_block_address = ?")
                .bind(tx_hash)
                .bind(genesis_block_address)
                .fetch_optional(&mut *conn)
                .await?;
        Ok(found.is_some())
    }

    /// One record per genesis address the deposit was delivered to.
    pub async fn get_deposit_txs_by_hash(&self, tx_hash: &str) -> Result<Vec<DepositRecord>> {
        let mut conn = self.handle.lock().await?;
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, genesis_block_address, succeeded, recorded_at
            FROM deposit_txs WHERE tx_hash = ? ORDER BY id
            "#,
        )
        .bind(tx_hash)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(row_to_deposit).collect()
    }

    pub async fn get_deposit_txs(&self, succeeded: bool) -> Result<Vec<DepositRecord>> {
        let mut conn = self.handle.lock().await?;
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, genesis_block_address, succeeded, recorded_at
            FROM deposit_txs WHERE succeeded = ? ORDER BY id
            "#,
        )
        .bind(succeeded)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(row_to_deposit).collect()
    }

    pub async fn remove_deposit_tx(&self, tx_hash: &str, genesis_block_address: &str) -> Result<()> {
        self.remove_deposit_txs(&[(tx_hash.to_string(), genesis_block_address.to_string())])
            .await
    }

    pub async fn remove_deposit_txs(&self, keys: &[(String, String)]) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;
        for (tx_hash, genesis_block_address) in keys {
            sqlx::query("DELETE FROM deposit_txs WHERE tx_hash = ? AND genesis_block_address = ?")
                .bind(tx_hash)
                .bind(genesis_block_address)
                .execute(&mut *dbtx)
                .await?;
        }
        dbtx.commit().await?;
        Ok(())
    }

    // ---------------- Withdraws ---------------- //

    pub async fn add_withdraw_tx(&self, tx_hash: &str, side_chain_tx: &[u8], succeeded: bool) -> Result<()> {
        let results = self
            .add_withdraw_txs(&[tx_hash.to_string()], side_chain_tx, succeeded)
            .await?;
        if results.first().copied().unwrap_or(false) {
            Ok(())
        } else {
            Err(StoreError::Duplicate(tx_hash.to_string()))
        }
    }

    /// Records every hash in `tx_hashes` as settled by `side_chain_tx`. The
    /// blob is stored once; hashes already recorded come back as `false`.
    pub async fn add_withdraw_txs(
        &self,
        tx_hashes: &[String],
        side_chain_tx: &[u8],
        succeeded: bool,
    ) -> Result<Vec<bool>> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;

        let blob_id = sqlx::query("INSERT INTO side_chain_txs (tx) VALUES (?)")
            .bind(side_chain_tx)
            .execute(&mut *dbtx)
            .await?
            .last_insert_rowid();

        let now = Utc::now();
        let mut results = Vec::with_capacity(tx_hashes.len());
        for tx_hash in tx_hashes {
            let res = sqlx::query(
                r#"
                INSERT INTO withdraw_txs (tx_hash, side_chain_tx_id, succeeded, recorded_at)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(tx_hash)
            .bind(blob_id)
            .bind(succeeded)
            .bind(now)
            .execute(&mut *dbtx)
            .await;
            results.push(db::inserted(res)?);
        }

        if !results.iter().any(|ok| *ok) {
            sqlx::query("DELETE FROM side_chain_txs WHERE id = ?")
                .bind(blob_id)
                .execute(&mut *dbtx)
                .await?;
        }

        dbtx.commit().await?;
        debug!(total = tx_hashes.len(), added = results.iter().filter(|ok| **ok).count(), "finished: withdraw batch");
        Ok(results)
    }

    pub async fn has_withdraw_tx(&self, tx_hash: &str) -> Result<bool> {
        let mut conn = self.handle.lock().await?;
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM withdraw_txs WHERE tx_hash = ?")
            .bind(tx_hash)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(found.is_some())
    }

    pub async fn get_withdraw_tx_by_hash(&self, tx_hash: &str) -> Result<Option<WithdrawRecord>> {
        let mut conn = self.handle.lock().await?;
        let sql = format!("{SELECT_WITHDRAW} WHERE w.tx_hash = ?");
        let row = sqlx::query(&sql)
            .bind(tx_hash)
            .fetch_optional(&mut *conn)
            .await?;
        row.as_ref().map(row_to_withdraw).transpose()
    }

    pub async fn get_withdraw_txs(&self, succeeded: bool) -> Result<Vec<WithdrawRecord>> {
        let mut conn = self.handle.lock().await?;
        let sql = format!("{SELECT_WITHDRAW} WHERE w.succeeded = ? ORDER BY w.id");
        let rows = sqlx::query(&sql)
            .bind(succeeded)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(row_to_withdraw).collect()
    }

    pub async fn remove_withdraw_tx(&self, tx_hash: &str) -> Result<()> {
        self.remove_withdraw_txs(&[tx_hash.to_string()]).await
    }

    /// Removes the hash rows and any blob no longer referenced.
    pub async fn remove_withdraw_txs(&self, tx_hashes: &[String]) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;
        for tx_hash in tx_hashes {
            sqlx::query("DELETE FROM withdraw_txs WHERE tx_hash = ?")
                .bind(tx_hash)
                .execute(&mut *dbtx)
                .await?;
        }
        sqlx::query(PRUNE_BLOBS).execute(&mut *dbtx).await?;
        dbtx.commit().await?;
        Ok(())
    }

    #[cfg(test)]
    async fn blob_count(&self) -> Result<i64> {
        let mut conn = self.handle.lock().await?;
        Ok(sqlx::query_scalar("SELECT COUNT(*) FROM side_chain_txs")
            .fetch_one(&mut *conn)
            .await?)
    }
}

#[async_trait]
impl DataStore for FinishedTxStore {
    async fn reset_data_store(&self) -> Result<()> {
        self.handle.reset().await
    }

    async fn close(&self) -> Result<()> {
        self.handle.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn withdraw_batch_shares_one_blob() {
        let shutdown = ShutdownCoordinator::new();
        let store = FinishedTxStore::open_in_memory(&shutdown).await.unwrap();

        let hashes: Vec<String> = (0..3).map(|i| format!("w{i}")).collect();
        let results = store.add_withdraw_txs(&hashes, b"side-tx", true).await.unwrap();
        assert_eq!(results, vec![true, true, true]);
        assert_eq!(store.blob_count().await.unwrap(), 1);

        // a batch made only of known hashes leaves no orphan blob behind
        let again = store.add_withdraw_txs(&hashes[..1], b"other", false).await.unwrap();
        assert_eq!(again, vec![false]);
        assert_eq!(store.blob_count().await.unwrap(), 1);

        store.remove_withdraw_txs(&hashes[..2]).await.unwrap();
        assert_eq!(store.blob_count().await.unwrap(), 1);
        store.remove_withdraw_tx("w2").await.unwrap();
        assert_eq!(store.blob_count().await.unwrap(), 0);
    }
}

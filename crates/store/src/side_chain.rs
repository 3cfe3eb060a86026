use std::path::Path;

use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::{Connection, Row};
use tracing::debug;

use crate::db::{self, Handle, Schema};
use crate::{AddressUtxo, DataStore, Result, ShutdownCoordinator, SideChainTx, StoreError, UtxoInput};

static SCHEMA: Schema = Schema {
    name: "side_chain",
    create: &[
        db::CREATE_HEIGHTS,
        r#"
        CREATE TABLE IF NOT EXISTS side_chain_txs (
            id                    INTEGER PRIMARY KEY AUTOINCREMENT,
            tx_hash               TEXT NOT NULL UNIQUE,
            genesis_block_address TEXT NOT NULL,
            tx                    BLOB NOT NULL,
            block_height          INTEGER NOT NULL
        )
        "#,
        r#"
        CREATE TABLE IF NOT EXISTS address_utxos (
            input_tx_id           TEXT NOT NULL,
            input_index           INTEGER NOT NULL,
            input_sequence        INTEGER NOT NULL,
            amount                INTEGER NOT NULL,
            genesis_block_address TEXT NOT NULL,
            destroy_address       TEXT NOT NULL,
            PRIMARY KEY (input_tx_id, input_index, genesis_block_address)
        )
        "#,
    ],
    tables: &["side_chain_txs", "address_utxos", "heights"],
};

const INSERT_UTXO: &str = r#"
    INSERT OR IGNORE INTO address_utxos
        (input_tx_id, input_index, input_sequence, amount, genesis_block_address, destroy_address)
    VALUES (?, ?, ?, ?, ?, ?)
"#;

const DELETE_UTXO: &str = r#"
    DELETE FROM address_utxos
    WHERE input_tx_id = ? AND input_index = ? AND genesis_block_address = ?
"#;

const SELECT_UTXO: &str = r#"
    SELECT input_tx_id, input_index, input_sequence, amount, genesis_block_address, destroy_address
    FROM address_utxos
"#;

/// Side-chain withdraws, per-chain cursors and UTXOs paid to monitored
/// addresses.
#[derive(Clone)]
pub struct SideChainStore {
    handle: Handle,
}

fn row_to_tx(row: &SqliteRow) -> Result<SideChainTx> {
    Ok(SideChainTx {
        tx_hash: row.try_get("tx_hash")?,
        genesis_block_address: row.try_get("genesis_block_address")?,
        tx: row.try_get("tx")?,
        block_height: db::get_u32(row, "block_height")?,
    })
}

fn row_to_utxo(row: &SqliteRow) -> Result<AddressUtxo> {
    let index: i64 = row.try_get("input_index")?;
    Ok(AddressUtxo {
        input: UtxoInput {
            tx_id: row.try_get("input_tx_id")?,
            index: u16::try_from(index).map_err(|_| StoreError::Corrupt("input_index", index.to_string()))?,
            sequence: db::get_u32(row, "input_sequence")?,
        },
        amount: row.try_get("amount")?,
        genesis_block_address: row.try_get("genesis_block_address")?,
        destroy_address: row.try_get("destroy_address")?,
    })
}

impl SideChainStore {
    pub async fn open(path: &Path, shutdown: &ShutdownCoordinator) -> Result<Self> {
        Ok(Self { handle: Handle::open(&SCHEMA, path, shutdown).await? })
    }

    pub async fn open_in_memory(shutdown: &ShutdownCoordinator) -> Result<Self> {
        Ok(Self { handle: Handle::open_in_memory(&SCHEMA, shutdown).await? })
    }

    /// Advances the cursor of the chain identified by its genesis block
    /// address; see [`crate::RESET_HEIGHT`].
    pub async fn current_side_height(&self, genesis_block_address: &str, height: u32) -> Result<u32> {
        let mut conn = self.handle.lock().await?;
        db::advance_height(&mut conn, genesis_block_address, height).await
    }

    pub async fn add_side_chain_tx(&self, tx: &SideChainTx) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        let res = sqlx::query(
            r#"
            INSERT INTO side_chain_txs (tx_hash, genesis_block_address, tx, block_height)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&tx.tx_hash)
        .bind(&tx.genesis_block_address)
        .bind(&tx.tx)
        .bind(i64::from(tx.block_height))
        .execute(&mut *conn)
        .await;

        if db::inserted(res)? {
            Ok(())
        } else {
            Err(StoreError::Duplicate(tx.tx_hash.clone()))
        }
    }

    pub async fn add_side_chain_txs(&self, txs: &[SideChainTx]) -> Result<Vec<bool>> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;

        let mut results = Vec::with_capacity(txs.len());
        for tx in txs {
            let res = sqlx::query(
                r#"
                INSERT INTO side_chain_txs (tx_hash, genesis_block_address, tx, block_height)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(&tx.tx_hash)
            .bind(&tx.genesis_block_address)
            .bind(&tx.tx)
            .bind(i64::from(tx.block_height))
            .execute(&mut *dbtx)
            .await;
            results.push(db::inserted(res)?);
        }

        dbtx.commit().await?;
        debug!(total = txs.len(), added = results.iter().filter(|ok| **ok).count(), "side_chain: batch insert");
        Ok(results)
    }

    pub async fn has_side_chain_tx(&self, tx_hash: &str) -> Result<bool> {
        let mut conn = self.handle.lock().await?;
        let found: Option<i64> = sqlx::query_scalar("SELECT id FROM side_chain_txs WHERE tx_hash = ?")
            .bind(tx_hash)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(found.is_some())
    }

    pub async fn remove_side_chain_tx(&self, tx_hash: &str) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        sqlx::query("DELETE FROM side_chain_txs WHERE tx_hash = ?")
            .bind(tx_hash)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn remove_side_chain_txs(&self, tx_hashes: &[String]) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;
        for tx_hash in tx_hashes {
            sqlx::query("DELETE FROM side_chain_txs WHERE tx_hash = ?")
                .bind(tx_hash)
                .execute(&mut *dbtx)
                .await?;
        }
        dbtx.commit().await?;
        Ok(())
    }

    pub async fn get_side_chain_txs_from_hashes(&self, tx_hashes: &[String]) -> Result<Vec<SideChainTx>> {
        let mut conn = self.handle.lock().await?;
        let mut out = Vec::with_capacity(tx_hashes.len());
        for tx_hash in tx_hashes {
            let row = sqlx::query(
                r#"
                SELECT tx_hash, genesis_block_address, tx, block_height
                FROM side_chain_txs WHERE tx_hash = ?
                "#,
            )
            .bind(tx_hash)
            .fetch_optional(&mut *conn)
            .await?;
            if let Some(row) = row {
                out.push(row_to_tx(&row)?);
            }
        }
        Ok(out)
    }

    pub async fn get_side_chain_txs_from_genesis_block_address(
        &self,
        genesis_block_address: &str,
    ) -> Result<Vec<SideChainTx>> {
        let mut conn = self.handle.lock().await?;
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, genesis_block_address, tx, block_height
            FROM side_chain_txs WHERE genesis_block_address = ? ORDER BY block_height, id
            "#,
        )
        .bind(genesis_block_address)
        .fetch_all(&mut *conn)
        .await?;
        rows.iter().map(row_to_tx).collect()
    }

    /// Records an output paid to a monitored address. Re-adding a known
    /// outpoint leaves the existing row untouched.
    pub async fn add_address_utxo(&self, utxo: &AddressUtxo) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        sqlx::query(INSERT_UTXO)
            .bind(&utxo.input.tx_id)
            .bind(i64::from(utxo.input.index))
            .bind(i64::from(utxo.input.sequence))
            .bind(utxo.amount)
            .bind(&utxo.genesis_block_address)
            .bind(&utxo.destroy_address)
            .execute(&mut *conn)
            .await?;
        Ok(())
    }

    pub async fn add_address_utxos(&self, utxos: &[AddressUtxo]) -> Result<()> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;
        for utxo in utxos {
            sqlx::query(INSERT_UTXO)
                .bind(&utxo.input.tx_id)
                .bind(i64::from(utxo.input.index))
                .bind(i64::from(utxo.input.sequence))
                .bind(utxo.amount)
                .bind(&utxo.genesis_block_address)
                .bind(&utxo.destroy_address)
                .execute(&mut *dbtx)
                .await?;
        }
        dbtx.commit().await?;
        Ok(())
    }

    /// Deletes the UTXO spent by `(tx_id, index)` on the given chain.
    /// Returns whether a row was removed; a missing outpoint is not an error.
    pub async fn remove_address_utxo(&self, tx_id: &str, index: u16, genesis_block_address: &str) -> Result<bool> {
        let mut conn = self.handle.lock().await?;
        let res = sqlx::query(DELETE_UTXO)
            .bind(tx_id)
            .bind(i64::from(index))
            .bind(genesis_block_address)
            .execute(&mut *conn)
            .await?;
        Ok(res.rows_affected() > 0)
    }

    /// Deletes every `(tx_id, index)` outpoint on the given chain in one
    /// transaction. The result says, per outpoint, whether a row was removed.
    pub async fn remove_address_utxos(
        &self,
        outpoints: &[(String, u16)],
        genesis_block_address: &str,
    ) -> Result<Vec<bool>> {
        let mut conn = self.handle.lock().await?;
        let mut dbtx = conn.begin().await?;
        let mut removed = Vec::with_capacity(outpoints.len());
        for (tx_id, index) in outpoints {
            let res = sqlx::query(DELETE_UTXO)
                .bind(tx_id)
                .bind(i64::from(*index))
                .bind(genesis_block_address)
                .execute(&mut *dbtx)
                .await?;
            removed.push(res.rows_affected() > 0);
        }
        dbtx.commit().await?;
        Ok(removed)
    }

    pub async fn get_address_utxos_from_genesis_block_address(
        &self,
        genesis_block_address: &str,
    ) -> Result<Vec<AddressUtxo>> {
        let mut conn = self.handle.lock().await?;
        let sql = format!("{SELECT_UTXO} WHERE genesis_block_address = ? ORDER BY input_tx_id, input_index");
        let rows = sqlx::query(&sql)
            .bind(genesis_block_address)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(row_to_utxo).collect()
    }

    pub async fn get_address_utxos_from_destroy_address(&self, destroy_address: &str) -> Result<Vec<AddressUtxo>> {
        let mut conn = self.handle.lock().await?;
        let sql = format!("{SELECT_UTXO} WHERE destroy_address = ? ORDER BY input_tx_id, input_index");
        let rows = sqlx::query(&sql)
            .bind(destroy_address)
            .fetch_all(&mut *conn)
            .await?;
        rows.iter().map(row_to_utxo).collect()
    }
}

#[async_trait]
impl DataStore for SideChainStore {
    async fn reset_data_store(&self) -> Result<()> {
        self.handle.reset().await
    }

    async fn close(&self) -> Result<()> {
        self.handle.close().await
    }
}

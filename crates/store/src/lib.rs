//! Durable cross-chain transaction state.
//!
//! Four independent SQLite-backed stores, one database file each. Every
//! store serializes its operations behind its own mutex and registers a
//! release callback with the [`ShutdownCoordinator`] when it is opened.

mod db;
pub mod finished;
pub mod main_chain;
pub mod registered;
pub mod schema;
pub mod shutdown;
pub mod side_chain;

pub use finished::FinishedTxStore;
pub use main_chain::MainChainStore;
pub use registered::RegisteredSideChainStore;
pub use schema::*;
pub use shutdown::ShutdownCoordinator;
pub use side_chain::SideChainStore;

use async_trait::async_trait;
use thiserror::Error;

/// Passed as a height, forces the cursor back to zero.
pub const RESET_HEIGHT: u32 = u32::MAX;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("cannot open store: {0}")]
    Open(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("record already exists: {0}")]
    Duplicate(String),

    #[error("store {0} is closed")]
    Closed(&'static str),

    #[error("corrupt value in column {0}: {1}")]
    Corrupt(&'static str, String),
}

impl StoreError {
    /// Callers treat an already-recorded row as success.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, StoreError::Duplicate(_))
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Duplicate(db.message().to_string()),
            other => StoreError::Database(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Capabilities every store shares.
#[async_trait]
pub trait DataStore: Send + Sync {
    /// Drops and recreates the backing tables.
    async fn reset_data_store(&self) -> Result<()>;

    /// Closes the handle once any in-flight operation has released the
    /// store's mutex. Later operations fail with [`StoreError::Closed`].
    async fn close(&self) -> Result<()>;
}

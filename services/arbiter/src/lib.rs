//! Arbiter node: side chain sync loops, the main-chain watcher and the aux
//! block submission pipeline, sharing the transaction stores.

pub mod config;
pub mod main_watch;
pub mod rpc;
pub mod spv;
pub mod state;
pub mod submission;
pub mod sync_loop;

use tokio::task::JoinHandle;
use tracing::error;

/// Awaits every task, logging the ones that panicked or were aborted.
/// Returns how many failed.
pub async fn join_tasks(tasks: Vec<JoinHandle<()>>) -> usize {
    let mut failed = 0;
    for task in tasks {
        if let Err(e) = task.await {
            error!("task failed: {e}");
            failed += 1;
        }
    }
    failed
}

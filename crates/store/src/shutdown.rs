//! Process-wide release hooks for open stores.

use std::future::Future;
use std::pin::Pin;

use tokio::sync::Mutex;
use tracing::info;

type ReleaseFuture = Pin<Box<dyn Future<Output = ()> + Send>>;
type ReleaseFn = Box<dyn FnOnce() -> ReleaseFuture + Send>;

/// Stores register a release callback here when they are opened. On
/// termination the callbacks run once each, in registration order.
#[derive(Default)]
pub struct ShutdownCoordinator {
    callbacks: Mutex<Vec<(String, ReleaseFn)>>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register<F, Fut>(&self, name: impl Into<String>, release: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let boxed: ReleaseFn = Box::new(move || Box::pin(release()));
        self.callbacks.lock().await.push((name.into(), boxed));
    }

    pub async fn registered(&self) -> usize {
        self.callbacks.lock().await.len()
    }

    /// Runs every pending callback. Later calls find nothing left to run.
    pub async fn shutdown(&self) {
        let callbacks = std::mem::take(&mut *self.callbacks.lock().await);
        for (name, release) in callbacks {
            info!(store=%name, "shutdown: releasing");
            release().await;
        }
    }
}

//! Shutdown lifecycle for the event delivery pipeline.
//!
//! Components that must be closed before the process exits register a
//! [`ShutdownHook`] with a [`ShutdownManager`]. Hooks are owned by the
//! manager instance that the host creates and passes around; there is no
//! process-global registry. OS signals are wired in separately through
//! [`install_signal_handler`].

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Errors from lifecycle management.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("Shutdown has already run")]
    AlreadyShutDown,
}

/// Result type alias using LifecycleError.
pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Work to perform once when the process shuts down.
#[async_trait]
pub trait ShutdownHook: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    async fn shutdown(&self);
}

/// Handle returned by [`ShutdownManager::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookRegistration(u64);

/// Ordered set of shutdown hooks.
///
/// Hooks run newest first, so a component registered after its
/// dependencies is closed before them.
#[derive(Default)]
pub struct ShutdownManager {
    hooks: Mutex<Vec<(HookRegistration, Arc<dyn ShutdownHook>)>>,
    next_id: AtomicU64,
    shut_down: AtomicBool,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook to run at shutdown.
    pub fn register(&self, hook: Arc<dyn ShutdownHook>) -> LifecycleResult<HookRegistration> {
        let mut hooks = self.hooks.lock();
        if self.is_shut_down() {
            return Err(LifecycleError::AlreadyShutDown);
        }
        let registration = HookRegistration(self.next_id.fetch_add(1, Ordering::SeqCst));
        debug!(hook = hook.name(), "Shutdown hook registered");
        hooks.push((registration, hook));
        Ok(registration)
    }

    /// Remove a hook. Returns whether it was still registered.
    pub fn deregister(&self, registration: HookRegistration) -> bool {
        let mut hooks = self.hooks.lock();
        let before = hooks.len();
        hooks.retain(|(id, _)| *id != registration);
        hooks.len() != before
    }

    pub fn hook_count(&self) -> usize {
        self.hooks.lock().len()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Run every registered hook, newest first.
    ///
    /// Only the first call runs anything; later calls return 0.
    pub async fn run(&self) -> usize {
        let hooks = {
            let mut hooks = self.hooks.lock();
            if self.shut_down.swap(true, Ordering::SeqCst) {
                return 0;
            }
            std::mem::take(&mut *hooks)
        };

        info!(hooks = hooks.len(), "Running shutdown hooks");
        let count = hooks.len();
        for (_, hook) in hooks.into_iter().rev() {
            debug!(hook = hook.name(), "Running shutdown hook");
            hook.shutdown().await;
        }
        count
    }
}

impl std::fmt::Debug for ShutdownManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownManager")
            .field("hooks", &self.hook_count())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}

/// Resolves on Ctrl-C, or on SIGTERM on Unix.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl-C"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Run `manager`'s hooks when the process receives a shutdown signal.
pub fn install_signal_handler(manager: Arc<ShutdownManager>) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        manager.run().await;
    })
}

use anyhow::Result;
use futures::future::join_all;
use std::future::Future;
use std::pin::Pin;

/// Container for embedder-owned resources that need explicit shutdown
/// alongside the connection engine (e.g. a backing datastore, a metrics
/// exporter) — the engine itself only owns the state spec §5 names.
#[derive(Default)]
pub struct Managers {
    shutdown_hooks: Vec<Box<dyn ShutdownHook>>,
}

/// Trait for components an embedder registers with [`Managers`] for
/// graceful shutdown, e.g. a connection pool or a background exporter task.
pub trait ShutdownHook: Send + Sync {
    fn shutdown(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

impl Managers {
    pub fn new() -> Self {
        Self {
            shutdown_hooks: Vec::new(),
        }
    }

    /// Register a component that needs shutdown.
    ///
    /// ```
    /// use redfish_core::{Managers, ShutdownHook};
    /// use std::future::Future;
    /// use std::pin::Pin;
    ///
    /// struct NoopHook;
    /// impl ShutdownHook for NoopHook {
    ///     fn shutdown(&self) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + '_>> {
    ///         Box::pin(async { Ok(()) })
    ///     }
    /// }
    ///
    /// let mut managers = Managers::new();
    /// managers.register(NoopHook);
    /// ```
    pub fn register<H: ShutdownHook + 'static>(&mut self, hook: H) {
        self.shutdown_hooks.push(Box::new(hook));
    }

    /// Shuts down all registered managers in parallel. Continues through
    /// every hook even if some fail (fail-slow), then reports whether any
    /// did.
    pub async fn shutdown(&self) -> Result<()> {
        log::info!("Shutting down {} managers in parallel", self.shutdown_hooks.len());

        let results: Vec<_> = join_all(
            self.shutdown_hooks
                .iter()
                .enumerate()
                .map(|(i, hook)| async move {
                    hook.shutdown().await.map_err(|e| (i, e))
                })
        )
        .await;

        let errors: Vec<_> = results.into_iter().filter_map(|r| r.err()).collect();

        if !errors.is_empty() {
            for (i, e) in &errors {
                log::error!("Failed to shutdown manager {}: {}", i, e);
            }
            return Err(anyhow::anyhow!(
                "{} out of {} managers failed to shutdown",
                errors.len(),
                self.shutdown_hooks.len()
            ));
        }

        log::info!("All managers shut down successfully");
        Ok(())
    }
}

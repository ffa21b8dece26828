pub mod manager;
pub mod node;
pub mod scheduler;
pub mod store;
pub mod task;
pub mod worker;

/// Resolves when the process receives SIGINT. Both HTTP servers use this to
/// stop accepting new work while in-flight loop iterations finish.
pub(crate) async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install shutdown signal handler");
    }
}

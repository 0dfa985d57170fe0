use crate::transport::SessionRegistry;

/// Resolves on SIGINT or SIGTERM, after every MCP session was closed.
pub async fn shutdown_signal(sessions: SessionRegistry) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!(
        active_sessions = sessions.len(),
        "Shutdown signal received, closing MCP sessions"
    );
    let report = sessions.close_all().await;
    tracing::info!(
        closed = report.closed,
        failed = report.failed,
        "Server shutdown complete"
    );
}

use std::sync::Arc;

use clap::Parser;
use kintone_core::{KintoneArgs, KintoneClientConfig, KintoneClientHolder};
use kintone_mcp_runtime::McpServerFactory;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod middleware;
mod routes;
mod shutdown;
mod state;
#[cfg(test)]
mod testing;
mod transport;

#[derive(Parser)]
#[command(
    name = "kintone-api",
    version,
    about = "kintone MCP server over streamable HTTP"
)]
struct Cli {
    #[command(flatten)]
    server: config::ServerArgs,
    #[command(flatten)]
    kintone: KintoneArgs,
}

#[tokio::main]
async fn main() {
    // Load .env if present (dev only)
    let _ = dotenvy::dotenv();

    // Structured JSON logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kintone_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let cli = Cli::parse();

    // Configuration problems stop the process before it listens.
    let kintone_config = match KintoneClientConfig::try_from(cli.kintone) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "Invalid kintone configuration");
            std::process::exit(1);
        }
    };
    let holder = Arc::new(KintoneClientHolder::new(kintone_config));
    if let Err(err) = holder.get() {
        tracing::error!(error = %err, "Failed to build kintone client");
        std::process::exit(1);
    }

    let server = cli.server;
    let sessions = transport::SessionRegistry::new(
        Arc::new(McpServerFactory::new(holder)),
        server.event_buffer,
    );
    let origin_patterns = server.origin_patterns();
    let app_state = state::AppState {
        sessions: sessions.clone(),
        origin_policy: Arc::new(middleware::origin::OriginPolicy::new(
            server.origin_policy,
            origin_patterns.clone(),
        )),
        sse_keep_alive: server.sse_keep_alive(),
    };
    let app = routes::app(
        app_state,
        middleware::cors::build_cors_layer(&origin_patterns),
    );

    let listener = match tokio::net::TcpListener::bind((server.host.as_str(), server.port)).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(
                host = %server.host,
                port = server.port,
                error = %err,
                "Failed to bind listener"
            );
            std::process::exit(1);
        }
    };
    tracing::info!(
        host = %server.host,
        port = server.port,
        cors_origin = %server.cors_origin,
        origin_policy = ?server.origin_policy,
        "kintone MCP server listening on http://{}:{}/mcp",
        server.host,
        server.port
    );

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal(sessions))
        .await
    {
        tracing::error!(error = %err, "Server error");
        std::process::exit(1);
    }
}

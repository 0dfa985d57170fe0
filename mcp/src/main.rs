use clap::Parser;
use tracing_subscriber::EnvFilter;

use kintone_mcp_runtime::{McpCommands, run as run_mcp};

#[derive(Parser)]
#[command(
    name = "kintone-mcp",
    version,
    about = "kintone MCP server over stdio"
)]
struct Cli {
    #[command(subcommand)]
    command: McpCommands,
}

#[tokio::main]
async fn main() {
    let _ = dotenvy::dotenv();

    // stdout carries the protocol, so logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kintone_mcp_runtime=info,kintone_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    let code = run_mcp(cli.command).await;
    std::process::exit(code);
}

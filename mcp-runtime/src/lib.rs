//! MCP protocol engine and kintone tool surface.
//!
//! The engine is transport-agnostic: the HTTP server in `kintone-api` hosts one
//! engine per session, the `kintone-mcp` binary hosts a single one on stdio.

use std::sync::Arc;

use clap::{Args, Subcommand};
use kintone_core::{KintoneArgs, KintoneClientConfig, KintoneClientHolder};
use serde_json::{Value, json};

pub mod engine;
pub mod server;
pub mod stdio;
pub mod tools;

#[cfg(test)]
mod testing;

pub use engine::{
    DispatchContext, EngineError, EngineFactory, NullOutbound, Outbound, ProtocolEngine, Reply,
    is_initialize_request,
};
pub use server::{McpServer, McpServerFactory, RpcError, error_response, success_response};
pub use tools::{ToolError, ToolRegistry};

#[derive(Subcommand)]
pub enum McpCommands {
    /// Run the kintone MCP server over stdio
    Serve(McpServeArgs),
    /// Print the tool catalog as JSON and exit
    Tools,
}

#[derive(Args, Clone, Debug)]
pub struct McpServeArgs {
    #[command(flatten)]
    pub kintone: KintoneArgs,
}

pub async fn run(command: McpCommands) -> i32 {
    match command {
        McpCommands::Serve(args) => {
            let config = match KintoneClientConfig::try_from(args.kintone) {
                Ok(config) => config,
                Err(err) => {
                    eprintln!(
                        "{}",
                        to_pretty_json(&json!({
                            "error": kintone_core::error::codes::CLIENT_CONFIG_ERROR,
                            "message": err.to_string(),
                        }))
                    );
                    return 1;
                }
            };
            let holder = Arc::new(KintoneClientHolder::new(config));
            if let Err(err) = holder.get() {
                eprintln!(
                    "{}",
                    to_pretty_json(&json!({
                        "error": kintone_core::error::codes::CLIENT_CONFIG_ERROR,
                        "message": err.to_string(),
                    }))
                );
                return 1;
            }

            let factory = McpServerFactory::new(holder);
            match stdio::serve_stdio(&factory).await {
                Ok(()) => 0,
                Err(err) => {
                    let payload = json!({
                        "error": "mcp_server_error",
                        "message": err.to_string(),
                    });
                    eprintln!("{}", to_pretty_json(&payload));
                    1
                }
            }
        }
        McpCommands::Tools => {
            println!("{}", to_pretty_json(&ToolRegistry::kintone().list()));
            0
        }
    }
}

fn to_pretty_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| "{}".to_string())
}

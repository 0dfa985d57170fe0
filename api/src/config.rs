use std::time::Duration;

use clap::Args;

use crate::middleware::origin::{OriginMode, OriginPattern, parse_patterns};

/// HTTP listener and transport flags.
#[derive(Args, Clone, Debug)]
pub struct ServerArgs {
    /// Port to listen on
    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,
    /// Interface to bind
    #[arg(long, env = "HOST", default_value = "localhost")]
    pub host: String,
    /// Allowed CORS origins, comma separated. `*` allows any origin,
    /// `scheme://host:*` any port of that host.
    #[arg(long, env = "CORS_ORIGIN", default_value = "http://localhost:*")]
    pub cors_origin: String,
    /// Handling of requests from origins outside the allow-list
    #[arg(
        long,
        env = "KINTONE_MCP_ORIGIN_POLICY",
        value_enum,
        default_value_t = OriginMode::Warn
    )]
    pub origin_policy: OriginMode,
    /// Keep-alive interval for SSE streams, in seconds
    #[arg(long, env = "KINTONE_MCP_SSE_KEEP_ALIVE_SECS", default_value_t = 15)]
    pub sse_keep_alive_secs: u64,
    /// Standalone-stream events kept per session for resumption
    #[arg(long, env = "KINTONE_MCP_EVENT_BUFFER", default_value_t = 256)]
    pub event_buffer: usize,
}

impl ServerArgs {
    pub fn origin_patterns(&self) -> Vec<OriginPattern> {
        parse_patterns(&self.cors_origin)
    }

    pub fn sse_keep_alive(&self) -> Duration {
        Duration::from_secs(self.sse_keep_alive_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        server: ServerArgs,
    }

    #[test]
    fn defaults_use_warn_policy() {
        let cli = TestCli::try_parse_from(["kintone-api"]).expect("parse");
        let server = cli.server;
        assert_eq!(server.origin_policy, OriginMode::Warn);
        assert_eq!(server.sse_keep_alive(), Duration::from_secs(15));
        assert!(server.event_buffer > 0);
        assert!(!server.origin_patterns().is_empty());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::try_parse_from([
            "kintone-api",
            "--port",
            "8080",
            "--origin-policy",
            "reject",
            "--cors-origin",
            "*",
            "--sse-keep-alive-secs",
            "0",
        ])
        .expect("parse");
        let server = cli.server;
        assert_eq!(server.port, 8080);
        assert_eq!(server.origin_policy, OriginMode::Reject);
        assert_eq!(server.origin_patterns(), vec![OriginPattern::Any]);
        assert_eq!(server.sse_keep_alive(), Duration::from_secs(1));
    }
}

use std::sync::Arc;

use serde_json::Value;
use tokio::io::{self, AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;

use crate::engine::{DispatchContext, EngineFactory, Reply};
use crate::server::{RpcError, error_response};

/// Serves one MCP session over newline-delimited JSON on stdin/stdout.
pub async fn serve_stdio(factory: &dyn EngineFactory) -> io::Result<()> {
    serve_lines(factory, io::stdin(), io::stdout()).await?;
    Ok(())
}

/// Every message, reply or notification, goes through one writer task so
/// lines never interleave. Returns the writer once the reader hits EOF.
pub(crate) async fn serve_lines<R, W>(factory: &dyn EngineFactory, reader: R, writer: W) -> io::Result<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel::<Value>();
    let writer_task = tokio::spawn(write_lines(rx, writer));
    let engine = factory.create(Arc::new(tx.clone()));
    let ctx = DispatchContext::default();

    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let incoming: Value = match serde_json::from_str(line) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(error = %err, "Discarding unparseable MCP message");
                let _ = tx.send(error_response(Value::Null, RpcError::parse_error()));
                continue;
            }
        };

        match engine.handle_message(incoming, &ctx).await {
            Ok(Reply::Accepted) => {}
            Ok(Reply::Message(message)) => {
                let _ = tx.send(message);
            }
            Ok(Reply::Stream(mut stream)) => {
                while let Some(message) = stream.recv().await {
                    let _ = tx.send(message);
                }
            }
            Err(err) => {
                tracing::error!(error = %err, "MCP dispatch failed");
                let _ = tx.send(error_response(Value::Null, RpcError::internal(err.to_string())));
            }
        }
    }

    if let Err(err) = engine.close().await {
        tracing::warn!(error = %err, "Failed to close MCP engine");
    }
    drop(engine);
    drop(tx);

    writer_task
        .await
        .map_err(|err| io::Error::other(format!("stdout writer task failed: {err}")))?
}

async fn write_lines<W>(mut rx: mpsc::UnboundedReceiver<Value>, mut writer: W) -> io::Result<W>
where
    W: AsyncWrite + Unpin,
{
    while let Some(message) = rx.recv().await {
        let mut line = serde_json::to_vec(&message).map_err(io::Error::other)?;
        line.push(b'\n');
        writer.write_all(&line).await?;
        writer.flush().await?;
    }
    Ok(writer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::McpServerFactory;
    use crate::testing::fake_kintone_config;
    use kintone_core::KintoneClientHolder;
    use serde_json::json;

    fn factory() -> McpServerFactory {
        McpServerFactory::new(Arc::new(KintoneClientHolder::new(fake_kintone_config(
            "http://127.0.0.1:9",
        ))))
    }

    fn parse_output(bytes: &[u8]) -> Vec<Value> {
        String::from_utf8_lossy(bytes)
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn answers_each_request_on_its_own_line() {
        let input = [
            json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {"protocolVersion": "2025-06-18"}}),
            json!({"jsonrpc": "2.0", "method": "notifications/initialized"}),
            json!({"jsonrpc": "2.0", "id": 2, "method": "tools/list"}),
        ]
        .iter()
        .map(|v| format!("{v}\n"))
        .collect::<String>();

        let output = serve_lines(&factory(), input.as_bytes(), Vec::new())
            .await
            .unwrap();
        let messages = parse_output(&output);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["id"], 1);
        assert_eq!(messages[0]["result"]["protocolVersion"], "2025-06-18");
        assert_eq!(messages[1]["id"], 2);
        assert_eq!(messages[1]["result"]["tools"].as_array().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn garbage_line_gets_parse_error_and_loop_continues() {
        let input = "{not json\n\n{\"jsonrpc\":\"2.0\",\"id\":5,\"method\":\"ping\"}\n";
        let output = serve_lines(&factory(), input.as_bytes(), Vec::new())
            .await
            .unwrap();
        let messages = parse_output(&output);

        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0]["error"]["code"], -32700);
        assert_eq!(messages[1]["id"], 5);
    }
}

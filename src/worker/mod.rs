//! Stdio-native transport: the worker side of the pipe.
//!
//! Reads one JSON message per line from stdin, answers on stdout, and
//! exits when stdin closes. Request handling is sequential in arrival
//! order; the engine's correlation ids make that an implementation
//! detail rather than a contract.

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::Result;
use crate::protocol::{WireError, WireMessage};
use crate::store::DocStore;
use crate::tools;

/// Serve the documentation tools over this process's own stdio until
/// stdin closes.
pub async fn run(config: &Config) -> Result<()> {
    let store = DocStore::from_config(config)?;
    info!("worker serving on stdio");

    let reader = BufReader::new(tokio::io::stdin());
    let mut writer = tokio::io::stdout();
    serve(&store, reader, &mut writer).await
}

/// The worker loop, generic over its pipe ends.
async fn serve<R, W>(store: &DocStore, reader: R, writer: &mut W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let msg = match serde_json::from_str::<WireMessage>(trimmed) {
            Ok(msg) => msg,
            Err(e) => {
                warn!(raw = trimmed, "skipping malformed protocol line: {}", e);
                continue;
            }
        };

        if let Some(reply) = handle(store, msg).await {
            write_line(writer, &reply).await?;
        }
    }

    info!("stdin closed; worker exiting");
    Ok(())
}

/// Map one inbound message to its reply, if the kind warrants one.
async fn handle(store: &DocStore, msg: WireMessage) -> Option<WireMessage> {
    match msg {
        WireMessage::Init => Some(WireMessage::Ready),
        WireMessage::ListTools { id } => Some(WireMessage::Tools {
            id,
            tools: tools::descriptors(),
        }),
        WireMessage::InvokeTool { id, tool, params } => {
            debug!(id = %id, tool = %tool, "invoking tool");
            match tools::dispatch(store, &tool, params).await {
                Ok(result) => Some(WireMessage::ToolResult { id, result }),
                Err(e) => {
                    warn!(id = %id, tool = %tool, "tool invocation failed: {}", e);
                    Some(WireMessage::ToolError {
                        id,
                        error: WireError::from(&e),
                    })
                }
            }
        }
        WireMessage::Ping { id } => {
            debug!(id = %id, "ping received");
            None
        }
        other => {
            warn!(?other, "ignoring response-shaped message on worker stdin");
            None
        }
    }
}

async fn write_line<W>(writer: &mut W, msg: &WireMessage) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let line = serde_json::to_string(msg)?;
    writer.write_all(line.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}

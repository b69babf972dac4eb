//! Line-oriented gateway server: one JSON request per input line, one JSON
//! response per output line, in order.

use anyhow::Context;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio_util::sync::CancellationToken;

use super::Gateway;
use super::handlers::handle_line;

/// Serve requests from `reader` until EOF or until `shutdown` fires.
/// Blank lines are skipped.
pub async fn serve<R, W>(
    gateway: &Gateway,
    reader: R,
    mut writer: W,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    let mut handled: u64 = 0;

    loop {
        let line = tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::info!(handled, "Gateway shutting down");
                break;
            }
            line = lines.next_line() => line.context("failed to read request")?,
        };
        let Some(line) = line else {
            tracing::info!(handled, "Gateway input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(gateway, &line).await;
        let mut encoded = serde_json::to_string(&response).context("failed to encode response")?;
        encoded.push('\n');
        writer
            .write_all(encoded.as_bytes())
            .await
            .context("failed to write response")?;
        writer.flush().await.context("failed to flush response")?;
        handled += 1;
    }

    Ok(())
}

/// Serve over the process's stdin and stdout.
pub async fn serve_stdio(gateway: &Gateway, shutdown: CancellationToken) -> anyhow::Result<()> {
    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    serve(gateway, stdin, stdout, shutdown).await
}

//! Native-messaging host: the browser extension talks to the wallet over
//! stdin/stdout using 4-byte little-endian length-prefixed JSON frames.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use extension_wallet_lib::{BackgroundMessage, MessageResponse, SharedWalletContext, WalletContext};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const HOME_VAR: &str = "EXTWALLET_HOME";
const DEFAULT_DIR_NAME: &str = ".extension-wallet";
/// Browsers cap host-to-extension messages at 1 MiB.
const MAX_OUTGOING_FRAME: usize = 1024 * 1024;
const MAX_INCOMING_FRAME: u32 = 4 * 1024 * 1024;

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol, so logs go to stderr.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    let root_dir = wallet_root()?;
    let context = WalletContext::initialize(root_dir.clone())
        .with_context(|| format!("failed to open wallet at {}", root_dir.display()))?;
    let shared = SharedWalletContext::new(context);
    log::info!("Native messaging host started");

    let mut stdin = tokio::io::stdin();
    let mut stdout = tokio::io::stdout();

    while let Some(frame) = read_frame(&mut stdin).await? {
        let response = match serde_json::from_slice::<BackgroundMessage>(&frame) {
            Ok(message) => shared.provider().handle_message(message).await,
            Err(err) => {
                log::warn!("Rejected malformed message: {}", err);
                MessageResponse::failure(format!("Invalid message: {}", err))
            }
        };
        write_frame(&mut stdout, &response).await?;
    }

    log::info!("Extension closed the channel, shutting down");
    Ok(())
}

fn wallet_root() -> Result<PathBuf> {
    resolve_root(std::env::var(HOME_VAR).ok(), dirs::home_dir())
}

/// `EXTWALLET_HOME` wins; otherwise a dot directory under the user's home.
fn resolve_root(explicit: Option<String>, home: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = explicit.filter(|dir| !dir.trim().is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    let home = home.context("no home directory; set EXTWALLET_HOME")?;
    Ok(home.join(DEFAULT_DIR_NAME))
}

/// `None` on a clean EOF between frames.
async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Option<Vec<u8>>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err).context("failed to read frame header"),
    }

    let len = u32::from_le_bytes(header);
    if len > MAX_INCOMING_FRAME {
        bail!("incoming frame of {} bytes exceeds limit", len);
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .await
        .context("truncated frame body")?;
    Ok(Some(body))
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, response: &MessageResponse) -> Result<()> {
    let mut body = serde_json::to_vec(response)?;
    if body.len() > MAX_OUTGOING_FRAME {
        log::warn!("Response of {} bytes too large, replacing with error", body.len());
        body = serde_json::to_vec(&MessageResponse::failure("Response too large"))?;
    }

    let len = u32::try_from(body.len()).context("frame length overflow")?;
    writer.write_all(&len.to_le_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

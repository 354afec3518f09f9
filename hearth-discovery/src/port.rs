// SPDX-License-Identifier: MIT OR Apache-2.0

//! Persisted server port.
//!
//! The node serves its peers on one TCP port which should survive restarts
//! so already-discovered `ip:port` pairs stay valid. The port is stored as
//! plain text under `drpc/server/port` below the repo root.
use std::path::Path;

use thiserror::Error;
use tokio::net::TcpListener;
use tracing::debug;

const PORT_FILE: &str = "drpc/server/port";

#[derive(Debug, Error)]
pub enum PortError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Returns the server port for this repo, reusing the persisted one when it
/// is still bindable. A missing, unparsable or stale file falls back to a
/// fresh ephemeral port and rewrites the file.
pub async fn server_port(repo_path: &Path) -> Result<u16, PortError> {
    let path = repo_path.join(PORT_FILE);

    if let Ok(contents) = tokio::fs::read_to_string(&path).await {
        match contents.trim().parse::<u16>() {
            Ok(port) if port != 0 => {
                if TcpListener::bind(("127.0.0.1", port)).await.is_ok() {
                    return Ok(port);
                }
                debug!(port, "persisted port is taken, picking a fresh one");
            }
            _ => debug!("persisted port file is unparsable, picking a fresh one"),
        }
    }

    let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
    let port = listener.local_addr()?.port();
    drop(listener);

    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, port.to_string()).await?;
    Ok(port)
}

//! Polling-based config file watcher.
//!
//! The core only needs a `reload(new_config)` entry point (see
//! `core::GatewayCore::reload`); this module is the minimal concrete
//! implementation of the hot-reload collaborator the core doesn't own.
//! It polls the file's mtime rather than depending on a filesystem-event
//! crate, since nothing else in this workspace already depends on one.

use crate::config::GatewayConfig;
use crate::core::GatewayCore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Spawns a background task that reloads `core` whenever `path`'s mtime
/// changes. Returns immediately; the task runs until the process exits.
pub fn spawn(path: PathBuf, core: Arc<GatewayCore>, poll_interval: Duration) {
    tokio::spawn(async move {
        let mut last_modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
        let mut interval = tokio::time::interval(poll_interval);
        loop {
            interval.tick().await;
            let modified = match std::fs::metadata(&path).and_then(|m| m.modified()) {
                Ok(m) => m,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "config watcher: stat failed");
                    continue;
                }
            };
            if Some(modified) == last_modified {
                continue;
            }
            last_modified = Some(modified);
            match GatewayConfig::from_file(&path) {
                Ok(new_config) => {
                    info!(path = %path.display(), "config changed, reloading");
                    core.reload(new_config);
                }
                Err(err) => {
                    error!(path = %path.display(), error = %err, "config reload failed, keeping previous config");
                }
            }
        }
    });
}


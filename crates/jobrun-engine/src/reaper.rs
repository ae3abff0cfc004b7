//! Background reaper: periodically evicts expired results and stale tasks.

use std::io::ErrorKind;
use std::path::PathBuf;

use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::engine::JobEngine;

/// Spawn the reaper loop for `engine`.
///
/// The loop holds only a weak handle, so it ends when the engine is shut
/// down or every engine handle has been dropped. The interval is re-read
/// before each pass.
pub(crate) fn spawn(engine: &JobEngine) -> JoinHandle<()> {
    let weak = engine.downgrade();
    let shutdown = engine.shutdown_token();

    engine.runtime().spawn(async move {
        loop {
            let Some(interval) = weak.upgrade().map(|e| e.config().sweep_interval()) else {
                break;
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            let Some(engine) = weak.upgrade() else {
                break;
            };
            engine.sweep_now().await;
        }
        debug!("Reaper stopped");
    })
}

/// Delete artifact files or directories. Paths that are already gone are
/// skipped; other failures are logged and do not stop the pass.
pub(crate) async fn purge_artifacts(locations: Vec<PathBuf>) {
    for path in locations {
        let removed = match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(&path).await,
            Ok(_) => tokio::fs::remove_file(&path).await,
            Err(err) => Err(err),
        };
        match removed {
            Ok(()) => debug!(path = %path.display(), "Artifact removed"),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "Failed to remove artifact"),
        }
    }
}

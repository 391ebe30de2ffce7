//! Rebuilds the FAQ index when the dataset file changes on disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::responder::Responder;

pub const DEBOUNCE: Duration = Duration::from_millis(500);

/// True when `event` creates or modifies the file at `dataset`.
pub fn touches_dataset(event: &Event, dataset: &Path) -> bool {
    if !matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_)) {
        return false;
    }
    let Some(name) = dataset.file_name() else {
        return false;
    };
    event.paths.iter().any(|p| p.file_name() == Some(name))
}

/// Watch the responder's dataset file and reload it after each burst of
/// changes. The returned watcher must be kept alive for as long as reloads
/// are wanted.
pub fn spawn_reloader(responder: Arc<Responder>) -> Result<RecommendedWatcher> {
    let dataset: PathBuf = responder
        .dataset_path()
        .ok_or_else(|| anyhow!("--watch needs a FAQ dataset path"))?
        .to_path_buf();
    let dir = match dataset.parent() {
        Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (tx, mut rx) = mpsc::channel::<()>(16);
    let target = dataset.clone();
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) if touches_dataset(&event, &target) => {
                let _ = tx.try_send(());
            }
            Ok(_) => {}
            Err(e) => tracing::warn!("Dataset watcher error: {}", e),
        },
        Config::default(),
    )?;
    watcher.watch(&dir, RecursiveMode::NonRecursive)?;
    tracing::info!("Watching {} for changes", dataset.display());

    tokio::spawn(async move {
        while rx.recv().await.is_some() {
            tokio::time::sleep(DEBOUNCE).await;
            while rx.try_recv().is_ok() {}
            // Failures are logged by reload and leave the old index live.
            let _ = responder.reload().await;
        }
    });

    Ok(watcher)
}

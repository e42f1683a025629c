use super::TailError;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

/// Filesystem change notifications for one buffer file.
///
/// Events are coalesced: a burst of writes wakes the reader once, and the
/// reader then picks up everything written since its offset.
pub struct BufferWatch {
    _watcher: RecommendedWatcher,
    rx: mpsc::Receiver<()>,
}

impl BufferWatch {
    pub fn new(path: &Path) -> Result<Self, TailError> {
        let (tx, rx) = mpsc::channel::<()>(16);
        let target: PathBuf = path.to_path_buf();

        let mut watcher = RecommendedWatcher::new(
            move |res: Result<Event, notify::Error>| {
                let Ok(event) = res else { return };
                if !matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_)) {
                    return;
                }
                if event.paths.is_empty() || event.paths.iter().any(|p| p == &target) {
                    let _ = tx.try_send(());
                }
            },
            Config::default(),
        )?;

        // Watch the directory so the file may be created after the watch.
        let dir = path.parent().unwrap_or(path);
        watcher.watch(dir, RecursiveMode::NonRecursive)?;

        Ok(Self {
            _watcher: watcher,
            rx,
        })
    }

    /// Wait for the next change. Returns None once the watcher is gone.
    pub async fn changed(&mut self) -> Option<()> {
        self.rx.recv().await?;
        while self.rx.try_recv().is_ok() {}
        Some(())
    }
}

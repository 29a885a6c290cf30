//! Input-directory watcher that feeds landed files into the pipeline.

use std::path::{Path, PathBuf};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

/// Watches the input directory and yields every newly created `.csv` path.
pub struct InputWatcher {
    /// Kept alive for the watch duration; dropping it stops the watch.
    _watcher: RecommendedWatcher,
    receiver: UnboundedReceiver<PathBuf>,
}

impl InputWatcher {
    /// Start watching `input_dir` (non-recursive).
    pub fn start(input_dir: &Path) -> notify::Result<Self> {
        let (tx, receiver) = mpsc::unbounded_channel();
        let mut watcher = notify::recommended_watcher(move |result: notify::Result<Event>| {
            forward_event(&tx, result);
        })?;
        watcher.watch(input_dir, RecursiveMode::NonRecursive)?;
        info!(input_dir = %input_dir.display(), "watching for landed files");
        Ok(Self {
            _watcher: watcher,
            receiver,
        })
    }

    /// Next landed file, or `None` once the watcher has shut down.
    pub async fn next(&mut self) -> Option<PathBuf> {
        self.receiver.recv().await
    }
}

fn forward_event(tx: &UnboundedSender<PathBuf>, result: notify::Result<Event>) {
    match result {
        Ok(event) => {
            if !matches!(event.kind, EventKind::Create(_)) {
                return;
            }
            for path in event.paths {
                if is_csv(&path) {
                    debug!(file = %path.display(), "file landed");
                    // receiver dropped means shutdown; nothing to do
                    let _ = tx.send(path);
                }
            }
        }
        Err(e) => warn!(error = %e, "file watcher error"),
    }
}

fn is_csv(path: &Path) -> bool {
    path.extension()
        .map_or(false, |ext| ext.eq_ignore_ascii_case("csv"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_csv_files_are_forwarded() {
        assert!(is_csv(Path::new("/input/tx_001.csv")));
        assert!(is_csv(Path::new("/input/TX.CSV")));
        assert!(!is_csv(Path::new("/input/tx_001.csv.tmp")));
        assert!(!is_csv(Path::new("/input/notes.txt")));
        assert!(!is_csv(Path::new("/input/csv")));
    }
}

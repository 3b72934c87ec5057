use std::collections::{HashSet, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use log::{info, warn};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::events::{EventPublisher, TransferEvent};
use crate::transfer::{TransferError, send_file};
use crate::utils::ensure_dir;

struct WatcherHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// The outbound side: polls the base directory on a fixed interval, stages
/// every qualifying file into `sent/`, and hands it to the sender. Staging
/// happens before the network attempt, so a failed send leaves the file in
/// `sent/` and nothing re-queues it.
pub struct DirectoryWatcher {
    config: Arc<AppConfig>,
    target: SocketAddr,
    events: Arc<dyn EventPublisher>,
    running: Arc<AtomicBool>,
    inner: Mutex<Option<WatcherHandle>>,
}

impl DirectoryWatcher {
    pub fn new(
        config: Arc<AppConfig>,
        target: SocketAddr,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            config,
            target,
            events,
            running: Arc::new(AtomicBool::new(false)),
            inner: Mutex::new(None),
        }
    }

    pub async fn start(&self) -> Result<(), TransferError> {
        let mut guard = self.inner.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let sent_dir = self.config.sent_dir_path();
        ensure_dir(&sent_dir)
            .await
            .map_err(|source| TransferError::filesystem(&sent_dir, source))?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        self.running.store(true, Ordering::SeqCst);
        let _ = self
            .events
            .publish(TransferEvent::WatcherStarted {
                dir: self.config.base_dir_path(),
                target: self.target,
            })
            .await;

        let task = tokio::spawn(watch_loop(
            self.config.clone(),
            self.target,
            self.events.clone(),
            shutdown_rx,
        ));

        *guard = Some(WatcherHandle {
            shutdown: shutdown_tx,
            task,
        });
        Ok(())
    }

    /// Signal the loop to stop and wait for it. The current poll cycle
    /// finishes before the loop observes the signal.
    pub async fn stop(&self) {
        let handle = self.inner.lock().await.take();
        if let Some(handle) = handle {
            let _ = handle.shutdown.send(true);
            let _ = handle.task.await;
            self.running.store(false, Ordering::SeqCst);
            let _ = self.events.publish(TransferEvent::WatcherStopped).await;
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

async fn watch_loop(
    config: Arc<AppConfig>,
    target: SocketAddr,
    events: Arc<dyn EventPublisher>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut processed = ProcessedSet::new(
        config.watcher.processed_cap,
        config.watcher.processed_keep,
    );
    let interval = config.scan_interval();

    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        if let Err(err) = scan_cycle(&config, target, events.as_ref(), &mut processed).await {
            warn!("Directory watch error: {}", err);
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => break,
        }
    }
}

/// One poll: list regular files in the watched directory, stage each new
/// qualifying one into `sent/`, send it, and remember the name.
async fn scan_cycle(
    config: &AppConfig,
    target: SocketAddr,
    events: &dyn EventPublisher,
    processed: &mut ProcessedSet,
) -> Result<(), TransferError> {
    let watch_dir = config.base_dir_path();
    let sent_dir = config.sent_dir_path();

    let mut entries = tokio::fs::read_dir(&watch_dir)
        .await
        .map_err(|source| TransferError::filesystem(&watch_dir, source))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|source| TransferError::filesystem(&watch_dir, source))?
    {
        match entry.file_type().await {
            Ok(file_type) if file_type.is_file() => {}
            _ => continue,
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !eligible(&name, &config.watcher.excluded_extensions) {
            continue;
        }
        if processed.contains(&name) {
            continue;
        }

        let staged = sent_dir.join(&name);
        if tokio::fs::try_exists(&staged).await.unwrap_or(false) {
            info!("File {} already exists in sent folder - will overwrite", name);
        }
        if let Err(err) = tokio::fs::rename(entry.path(), &staged).await {
            // Still in the watched directory; retried next cycle.
            warn!("Error staging file {}: {}", name, err);
            continue;
        }
        let _ = events
            .publish(TransferEvent::FileQueued {
                filename: name.clone(),
                staged_to: staged.clone(),
            })
            .await;

        // Outcome already reported by the sender; the file stays staged
        // either way, and the name is remembered so a problem file is not
        // retried forever.
        let _ = send_file(&staged, target, config, events).await;
        processed.insert(name);
    }

    Ok(())
}

fn eligible(name: &str, excluded: &[String]) -> bool {
    if name.starts_with('.') {
        return false;
    }
    match name.rsplit_once('.') {
        Some((_, ext)) => !excluded.iter().any(|e| e.eq_ignore_ascii_case(ext)),
        None => true,
    }
}

/// Names already handed to the sender. Bounded: past `cap` entries, only
/// the most recent `keep` are retained - an approximation, not an exact
/// LRU, so a pruned name can be re-sent if it reappears.
struct ProcessedSet {
    seen: HashSet<String>,
    order: VecDeque<String>,
    cap: usize,
    keep: usize,
}

impl ProcessedSet {
    fn new(cap: usize, keep: usize) -> Self {
        Self {
            seen: HashSet::new(),
            order: VecDeque::new(),
            cap,
            keep,
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.seen.contains(name)
    }

    fn insert(&mut self, name: String) {
        if self.seen.insert(name.clone()) {
            self.order.push_back(name);
            if self.order.len() > self.cap {
                while self.order.len() > self.keep {
                    if let Some(old) = self.order.pop_front() {
                        self.seen.remove(&old);
                    }
                }
            }
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.seen.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eligible_filters() {
        let excluded: Vec<String> = ["exe", "log"].into_iter().map(String::from).collect();
        assert!(eligible("report.pdf", &excluded));
        assert!(eligible("README", &excluded));
        assert!(!eligible(".hidden", &excluded));
        assert!(!eligible("setup.exe", &excluded));
        assert!(!eligible("debug.LOG", &excluded));
    }

    #[test]
    fn test_processed_set_dedup() {
        let mut set = ProcessedSet::new(10, 5);
        set.insert("a.txt".to_string());
        set.insert("a.txt".to_string());
        assert_eq!(set.len(), 1);
        assert!(set.contains("a.txt"));
        assert!(!set.contains("b.txt"));
    }

    #[test]
    fn test_processed_set_prunes_oldest() {
        let mut set = ProcessedSet::new(10, 5);
        for i in 0..11 {
            set.insert(format!("file{i}.txt"));
        }
        // Past the cap of 10, only the 5 most recent names survive.
        assert_eq!(set.len(), 5);
        assert!(!set.contains("file0.txt"));
        assert!(!set.contains("file5.txt"));
        assert!(set.contains("file6.txt"));
        assert!(set.contains("file10.txt"));
    }
}

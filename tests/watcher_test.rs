use std::net::{IpAddr, Ipv4Addr};
use std::sync::Arc;
use std::time::Duration;

use streamsend::config::AppConfig;
use streamsend::events::{InMemoryEventPublisher, TransferEvent};
use streamsend::server::FileServer;
use streamsend::watcher::DirectoryWatcher;

struct Rig {
    server: FileServer,
    watcher: DirectoryWatcher,
    events: Arc<InMemoryEventPublisher>,
    receiver_config: Arc<AppConfig>,
    watcher_config: Arc<AppConfig>,
}

/// A receiver plus a watcher pointed at it, polling every second, sharing
/// one event log so tests can observe both sides.
async fn start_rig(
    watch_base: &std::path::Path,
    receive_base: &std::path::Path,
) -> anyhow::Result<Rig> {
    let events = Arc::new(InMemoryEventPublisher::new());

    let receiver_config = Arc::new(AppConfig::with_base_dir(receive_base));
    receiver_config.ensure_directories()?;
    let server = FileServer::new(receiver_config.clone(), events.clone());
    let addr = server.start(IpAddr::V4(Ipv4Addr::LOCALHOST), 0).await?;

    let mut config = AppConfig::with_base_dir(watch_base);
    config.watcher.scan_interval_seconds = 1;
    let watcher_config = Arc::new(config);
    watcher_config.ensure_directories()?;

    let watcher = DirectoryWatcher::new(watcher_config.clone(), addr, events.clone());
    watcher.start().await?;

    Ok(Rig {
        server,
        watcher,
        events,
        receiver_config,
        watcher_config,
    })
}

impl Rig {
    async fn shutdown(&self) {
        self.watcher.stop().await;
        self.server.stop().await;
    }

    async fn completions_of(&self, filename: &str) -> usize {
        self.events
            .get_events()
            .await
            .iter()
            .filter(|e| {
                matches!(e, TransferEvent::ReceiveCompleted { filename: f, .. }
                    if f.as_str() == filename)
            })
            .count()
    }

    async fn wait_for_completion(&self, filename: &str) -> bool {
        for _ in 0..200 {
            if self.completions_of(filename).await >= 1 {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        false
    }
}

#[tokio::test]
async fn test_watcher_stages_then_delivers() -> anyhow::Result<()> {
    let watch_dir = tempfile::tempdir()?;
    let receive_dir = tempfile::tempdir()?;
    let rig = start_rig(watch_dir.path(), receive_dir.path()).await?;
    assert!(rig.watcher.is_running());

    let content = b"quarterly numbers";
    std::fs::write(watch_dir.path().join("report.pdf"), content)?;

    assert!(rig.wait_for_completion("report.pdf").await);

    // Gone from the watched directory, staged in sent/, delivered to
    // received/ - all three with the same bytes.
    assert!(!watch_dir.path().join("report.pdf").exists());
    assert_eq!(
        std::fs::read(rig.watcher_config.sent_dir_path().join("report.pdf"))?,
        content
    );
    assert_eq!(
        std::fs::read(rig.receiver_config.received_dir_path().join("report.pdf"))?,
        content
    );

    rig.shutdown().await;
    assert!(!rig.watcher.is_running());
    Ok(())
}

#[tokio::test]
async fn test_watcher_skips_hidden_and_excluded() -> anyhow::Result<()> {
    let watch_dir = tempfile::tempdir()?;
    let receive_dir = tempfile::tempdir()?;
    let rig = start_rig(watch_dir.path(), receive_dir.path()).await?;

    std::fs::write(watch_dir.path().join(".hidden"), b"dotfile")?;
    std::fs::write(watch_dir.path().join("setup.exe"), b"artifact")?;
    std::fs::write(watch_dir.path().join("notes.txt"), b"real payload")?;

    assert!(rig.wait_for_completion("notes.txt").await);

    // The qualifying file moved on; the filtered ones never left.
    assert!(!watch_dir.path().join("notes.txt").exists());
    assert!(watch_dir.path().join(".hidden").exists());
    assert!(watch_dir.path().join("setup.exe").exists());
    assert_eq!(rig.completions_of(".hidden").await, 0);
    assert_eq!(rig.completions_of("setup.exe").await, 0);

    rig.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_watcher_does_not_resend_processed_name() -> anyhow::Result<()> {
    let watch_dir = tempfile::tempdir()?;
    let receive_dir = tempfile::tempdir()?;
    let rig = start_rig(watch_dir.path(), receive_dir.path()).await?;

    std::fs::write(watch_dir.path().join("once.txt"), b"v1")?;
    assert!(rig.wait_for_completion("once.txt").await);

    // The same name reappearing is remembered and left alone.
    std::fs::write(watch_dir.path().join("once.txt"), b"v2")?;
    tokio::time::sleep(Duration::from_millis(2500)).await;

    assert!(watch_dir.path().join("once.txt").exists());
    assert_eq!(rig.completions_of("once.txt").await, 1);
    assert!(!rig
        .receiver_config
        .received_dir_path()
        .join("once_1.txt")
        .exists());

    rig.shutdown().await;
    Ok(())
}

#[tokio::test]
async fn test_watcher_stages_even_when_nobody_listens() -> anyhow::Result<()> {
    let watch_dir = tempfile::tempdir()?;
    let receive_dir = tempfile::tempdir()?;
    let rig = start_rig(watch_dir.path(), receive_dir.path()).await?;

    // Kill the receiver; the watcher keeps staging regardless of send
    // outcome - the move is the durability marker.
    rig.server.stop().await;

    std::fs::write(watch_dir.path().join("stranded.txt"), b"no receiver")?;

    let mut failed = false;
    for _ in 0..200 {
        failed = rig
            .events
            .get_events()
            .await
            .iter()
            .any(|e| matches!(e, TransferEvent::SendFailed { .. }));
        if failed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(failed);

    assert!(!watch_dir.path().join("stranded.txt").exists());
    assert!(rig
        .watcher_config
        .sent_dir_path()
        .join("stranded.txt")
        .exists());
    assert_eq!(rig.completions_of("stranded.txt").await, 0);

    rig.watcher.stop().await;
    Ok(())
}

use std::error::Error;
use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};

use async_trait::async_trait;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use streamsend::config::AppConfig;
use streamsend::events::{
    ChannelEventPublisher, EventHandler, EventPublisher, EventResult, InMemoryEventPublisher,
    LoggingEventHandler, TransferEvent,
};
use streamsend::protocol::DEFAULT_PORT;
use streamsend::server::FileServer;
use streamsend::utils::parse_server_addr;
use streamsend::watcher::DirectoryWatcher;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Listen for incoming files and store them under received/
    Receive {
        /// IP address to bind
        #[arg(short, long, default_value = "0.0.0.0")]
        bind: IpAddr,

        /// Port to listen on
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Base directory (received/ is created underneath)
        #[arg(long, default_value = ".")]
        dir: String,
    },
    /// Watch a directory and send every new file to the server
    Watch {
        /// Server address as ip or ip:port
        server: String,

        /// Port used when the address does not carry one
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,

        /// Directory to watch (sent/ is created underneath)
        #[arg(long, default_value = ".")]
        dir: String,
    },
    /// Send a single file and exit
    Send {
        /// Path to the file to send
        #[arg(short, long)]
        file: PathBuf,

        /// Server address as ip or ip:port
        server: String,

        /// Port used when the address does not carry one
        #[arg(short, long, default_value_t = DEFAULT_PORT)]
        port: u16,
    },
}

// Function to initialize tracing and file logging
// Returns a WorkerGuard that must be kept alive for logs to be written
fn init_logging(log_file_prefix: &str) -> Result<WorkerGuard, Box<dyn Error>> {
    // Create a directory for logs if it doesn't exist
    std::fs::create_dir_all("logs")?;

    let file_appender = tracing_appender::rolling::daily("logs", log_file_prefix);
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    let file_layer = fmt::layer()
        .with_writer(non_blocking_appender)
        .with_ansi(false); // Don't use ANSI codes in files

    let console_layer = fmt::layer().with_writer(std::io::stdout);

    // Use RUST_LOG env var, default to info
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(guard)
}

/// Channel publisher with the logging handler attached and its fan-out loop
/// running.
fn logging_publisher() -> anyhow::Result<Arc<ChannelEventPublisher>> {
    let (publisher, event_rx) = ChannelEventPublisher::new();
    publisher
        .subscribe(Box::new(LoggingEventHandler))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    tokio::spawn(ChannelEventPublisher::start_processing(
        event_rx,
        publisher.handlers(),
    ));
    Ok(Arc::new(publisher))
}

/// Renders send progress on the console for the one-shot send command
struct ProgressBarHandler {
    bar: ProgressBar,
}

impl ProgressBarHandler {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
            .unwrap());
        Self { bar }
    }
}

#[async_trait]
impl EventHandler for ProgressBarHandler {
    async fn handle_event(&self, event: TransferEvent) -> EventResult<()> {
        match event {
            TransferEvent::SendStarted { size, .. } => self.bar.set_length(size),
            TransferEvent::SendProgress { sent, .. } => self.bar.set_position(sent),
            TransferEvent::SendCompleted { bytes, .. } => {
                self.bar.set_position(bytes);
                self.bar.finish_with_message("Transfer complete");
            }
            TransferEvent::SendFailed { .. } => self.bar.abandon(),
            _ => {}
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // This guard needs to stay in scope, otherwise logs stop writing.
    let _guard = init_logging("streamsend").map_err(|e| anyhow::anyhow!("{e}"))?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Receive { bind, port, dir } => {
            let config = Arc::new(AppConfig::with_base_dir(&dir));
            config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;
            config.ensure_directories()?;

            let server = FileServer::new(config.clone(), logging_publisher()?);
            server.start(bind, port).await?;
            info!(
                "Received files will be saved to {}",
                config.received_dir_path().display()
            );
            info!("Press Ctrl+C to stop");

            tokio::signal::ctrl_c().await?;
            server.stop().await;
        }
        Commands::Watch { server, port, dir } => {
            let target = parse_server_addr(&server, port).map_err(|e| anyhow::anyhow!("{e}"))?;

            let config = Arc::new(AppConfig::with_base_dir(&dir));
            config.validate().map_err(|e| anyhow::anyhow!("{e}"))?;
            config.ensure_directories()?;

            let watcher = DirectoryWatcher::new(config.clone(), target, logging_publisher()?);
            watcher.start().await?;
            info!("Place files in {} to send them automatically", dir);
            info!("Press Ctrl+C to stop");

            tokio::signal::ctrl_c().await?;
            watcher.stop().await;
        }
        Commands::Send { file, server, port } => {
            if !file.exists() {
                error!("File does not exist: {:?}", file);
                return Err(anyhow::anyhow!("File not found"));
            }
            let target = parse_server_addr(&server, port).map_err(|e| anyhow::anyhow!("{e}"))?;

            let config = AppConfig::default();

            // The in-memory publisher dispatches inline, so the bar is
            // fully drawn before the command exits.
            let events = InMemoryEventPublisher::new();
            events
                .subscribe(Box::new(ProgressBarHandler::new()))
                .map_err(|e| anyhow::anyhow!("{e}"))?;

            let report = streamsend::send_file(&file, target, &config, &events).await?;
            info!(
                "File {} sent successfully ({} bytes)",
                report.filename, report.bytes
            );
        }
    }

    Ok(())
}

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::protocol::{DEFAULT_CHUNK_SIZE, DEFAULT_PORT};

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory watched for outgoing files; `sent/` and `received/` live
    /// underneath it.
    pub base_directory: String,
    pub port: u16,
    pub chunk_size: usize,
    pub connect_timeout_seconds: u64,
    pub read_timeout_seconds: u64,
    /// Extensions that trigger the post-receive hook (when one is installed)
    pub print_extensions: Vec<String>,
    pub watcher: WatcherConfig,
}

/// Watcher-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatcherConfig {
    pub scan_interval_seconds: u64,
    /// Extensions never picked up from the watched directory
    pub excluded_extensions: Vec<String>,
    /// Prune the processed-name set once it grows past this
    pub processed_cap: usize,
    /// Names kept after a prune (the most recent ones)
    pub processed_keep: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            base_directory: ".".to_string(),
            port: DEFAULT_PORT,
            chunk_size: DEFAULT_CHUNK_SIZE,
            connect_timeout_seconds: 30,
            read_timeout_seconds: 30,
            print_extensions: vec!["pdf".to_string(), "png".to_string()],
            watcher: WatcherConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            scan_interval_seconds: 3,
            excluded_extensions: ["exe", "dll", "so", "pyc", "pyd", "bat", "log", "tmp"]
                .into_iter()
                .map(String::from)
                .collect(),
            processed_cap: 1000,
            processed_keep: 500,
        }
    }
}

impl AppConfig {
    /// A default configuration rooted at the given directory
    pub fn with_base_dir<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            base_directory: dir.as_ref().to_string_lossy().to_string(),
            ..Self::default()
        }
    }

    /// Load configuration from file or create default
    pub fn load_or_default(config_path: Option<&str>) -> Self {
        if let Some(config) = config_path
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|content| serde_json::from_str(&content).ok())
        {
            return config;
        }
        Self::default()
    }

    /// Save configuration to file
    pub fn save_to_file(&self, config_path: &str) -> Result<(), Box<dyn std::error::Error>> {
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    /// The watched directory as PathBuf
    pub fn base_dir_path(&self) -> PathBuf {
        PathBuf::from(&self.base_directory)
    }

    /// Staging directory for files picked up by the watcher
    pub fn sent_dir_path(&self) -> PathBuf {
        self.base_dir_path().join("sent")
    }

    /// Destination directory for inbound files
    pub fn received_dir_path(&self) -> PathBuf {
        self.base_dir_path().join("received")
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_seconds)
    }

    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.watcher.scan_interval_seconds)
    }

    /// Ensure the sent/received directories exist
    pub fn ensure_directories(&self) -> Result<(), std::io::Error> {
        std::fs::create_dir_all(self.sent_dir_path())?;
        std::fs::create_dir_all(self.received_dir_path())?;
        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), Box<dyn std::error::Error>> {
        if self.base_directory.is_empty() {
            return Err("Base directory must not be empty".into());
        }

        if self.chunk_size == 0 {
            return Err("Chunk size must be greater than 0".into());
        }

        if self.port == 0 {
            return Err("Port must be greater than 0".into());
        }

        if self.connect_timeout_seconds == 0 || self.read_timeout_seconds == 0 {
            return Err("Timeouts must be greater than 0".into());
        }

        // Validate watcher config
        if self.watcher.scan_interval_seconds == 0 {
            return Err("Scan interval must be greater than 0".into());
        }

        if self.watcher.processed_keep == 0
            || self.watcher.processed_keep >= self.watcher.processed_cap
        {
            return Err("Processed-set keep must be nonzero and below the cap".into());
        }

        Ok(())
    }
}

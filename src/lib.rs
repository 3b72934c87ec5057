pub mod config;
pub mod events;
pub mod protocol;
pub mod server;
pub mod transfer;
pub mod utils;
pub mod watcher;

// Re-export key types for easier access in integration tests
pub use config::AppConfig;
pub use server::{FileServer, ServerError};
pub use transfer::{ReceiveHook, TransferError, send_file};
pub use watcher::DirectoryWatcher;

use std::error::Error;
use std::net::{IpAddr, SocketAddr};
use std::path::Path;

use uuid::Uuid;

/// Generate a random unique ID for transfers and other operations
pub fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a file size in human-readable form
pub fn format_size(size: u64) -> String {
    let units = ["B", "KB", "MB", "GB", "TB"];
    let mut size = size as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < units.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", size as u64, units[unit_index])
    } else {
        format!("{:.2} {}", size, units[unit_index])
    }
}

/// Get the filename from a path
pub fn get_filename(path: &Path) -> Option<String> {
    path.file_name()
        .and_then(|os_str| os_str.to_str())
        .map(String::from)
}

/// Check if a file exists and get its size
pub async fn check_file(path: &Path) -> Result<u64, std::io::Error> {
    let metadata = tokio::fs::metadata(path).await?;
    if !metadata.is_file() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "not a regular file",
        ));
    }
    Ok(metadata.len())
}

/// Create directory if it doesn't exist
pub async fn ensure_dir(path: &Path) -> std::io::Result<()> {
    if !path.exists() {
        tokio::fs::create_dir_all(path).await?;
    }
    Ok(())
}

/// Parse a server target given as `ip` or `ip:port`, falling back to
/// `default_port` when none is given.
pub fn parse_server_addr(
    input: &str,
    default_port: u16,
) -> Result<SocketAddr, Box<dyn Error + Send + Sync>> {
    let input = input.trim();
    if let Ok(addr) = input.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = input.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    Err(format!("invalid server address: {input:?} (expected ip or ip:port)").into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(0), "0 B");
        assert_eq!(format_size(1023), "1023 B");
        assert_eq!(format_size(1024), "1.00 KB");
        assert_eq!(format_size(1024 * 1024), "1.00 MB");
        assert_eq!(format_size(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_generate_id() {
        let id1 = generate_id();
        let id2 = generate_id();
        assert_ne!(id1, id2);
        assert_eq!(id1.len(), 36); // UUID length
    }

    #[test]
    fn test_parse_server_addr_with_and_without_port() {
        let addr = parse_server_addr("192.168.1.20", 25565).unwrap();
        assert_eq!(addr.to_string(), "192.168.1.20:25565");

        let addr = parse_server_addr("192.168.1.20:9000", 25565).unwrap();
        assert_eq!(addr.port(), 9000);

        assert!(parse_server_addr("not-an-ip", 25565).is_err());
        assert!(parse_server_addr("10.0.0.1:notaport", 25565).is_err());
    }
}

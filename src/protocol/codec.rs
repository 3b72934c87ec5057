use std::path::{Component, Path};

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

use super::{FILE_SIZE_FIELD, NAME_LEN_FIELD};

/// Errors raised while decoding an inbound frame header
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("peer closed the connection after {got} of {expected} header bytes")]
    ShortRead { expected: usize, got: usize },

    #[error("header field is not ASCII decimal: {raw:?}")]
    InvalidDigits { raw: Vec<u8> },

    #[error("filename is not valid UTF-8")]
    InvalidUtf8(#[from] std::str::Utf8Error),

    #[error("filename {0:?} escapes the destination directory")]
    UnsafeFilename(String),
}

/// Errors raised while encoding an outbound frame header
#[derive(Error, Debug)]
pub enum EncodingError {
    #[error("filename of {0} bytes does not fit an 8-digit length field")]
    NameTooLong(usize),

    #[error("file size {0} does not fit a 16-digit size field")]
    SizeTooLarge(u64),
}

/// Encode the transfer header: zero-padded name length, the UTF-8 name
/// itself, then the zero-padded payload size. The payload follows as raw
/// bytes and is not part of the header.
pub fn encode_header(filename: &str, file_size: u64) -> Result<Vec<u8>, EncodingError> {
    let name = filename.as_bytes();
    if name.len() >= 10usize.pow(NAME_LEN_FIELD as u32) {
        return Err(EncodingError::NameTooLong(name.len()));
    }
    if file_size >= 10u64.pow(FILE_SIZE_FIELD as u32) {
        return Err(EncodingError::SizeTooLarge(file_size));
    }

    let mut header = Vec::with_capacity(NAME_LEN_FIELD + name.len() + FILE_SIZE_FIELD);
    header.extend_from_slice(format!("{:0width$}", name.len(), width = NAME_LEN_FIELD).as_bytes());
    header.extend_from_slice(name);
    header.extend_from_slice(format!("{:0width$}", file_size, width = FILE_SIZE_FIELD).as_bytes());
    Ok(header)
}

/// Parse the 8-byte filename-length field.
pub fn decode_name_len(raw: &[u8]) -> Result<usize, FrameError> {
    if raw.len() != NAME_LEN_FIELD {
        return Err(FrameError::ShortRead {
            expected: NAME_LEN_FIELD,
            got: raw.len(),
        });
    }
    parse_decimal(raw).map(|n| n as usize)
}

/// Parse the 16-byte file-size field.
pub fn decode_file_size(raw: &[u8]) -> Result<u64, FrameError> {
    if raw.len() != FILE_SIZE_FIELD {
        return Err(FrameError::ShortRead {
            expected: FILE_SIZE_FIELD,
            got: raw.len(),
        });
    }
    parse_decimal(raw)
}

/// Decode the filename bytes. `expected` is the value of the length field;
/// receiving fewer bytes means the peer closed mid-header.
pub fn decode_filename(raw: &[u8], expected: usize) -> Result<String, FrameError> {
    if raw.len() != expected {
        return Err(FrameError::ShortRead {
            expected,
            got: raw.len(),
        });
    }
    Ok(std::str::from_utf8(raw)?.to_string())
}

/// Reject filenames that would resolve outside the destination directory.
///
/// A wire filename must be a single normal path component: no separators
/// (either flavor), no `.`/`..`, no root, no NUL. Checked before any path is
/// built or any byte is written.
pub fn sanitize_filename(name: &str) -> Result<(), FrameError> {
    if name.contains('\\') || name.contains('\0') {
        return Err(FrameError::UnsafeFilename(name.to_string()));
    }
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => Err(FrameError::UnsafeFilename(name.to_string())),
    }
}

/// Read exactly `buf.len()` bytes, looping over short reads. Returns the
/// number of bytes actually obtained; anything less than `buf.len()` means
/// the peer closed the stream. A single read on a stream socket is not
/// guaranteed to fill the field.
pub async fn read_field<R>(stream: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = stream.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

fn parse_decimal(raw: &[u8]) -> Result<u64, FrameError> {
    if raw.is_empty() || !raw.iter().all(u8::is_ascii_digit) {
        return Err(FrameError::InvalidDigits { raw: raw.to_vec() });
    }
    // 16 digits always fit in a u64, so the fold cannot overflow.
    Ok(raw
        .iter()
        .fold(0u64, |acc, b| acc * 10 + u64::from(b - b'0')))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_decimal_zero_padded() {
        assert_eq!(parse_decimal(b"00000042").unwrap(), 42);
        assert_eq!(parse_decimal(b"0000000000000000").unwrap(), 0);
    }

    #[test]
    fn test_parse_decimal_rejects_non_digits() {
        assert!(matches!(
            parse_decimal(b"0000 042"),
            Err(FrameError::InvalidDigits { .. })
        ));
        assert!(matches!(
            parse_decimal(b"-0000042"),
            Err(FrameError::InvalidDigits { .. })
        ));
    }

    #[test]
    fn test_sanitize_accepts_plain_names() {
        sanitize_filename("report.pdf").unwrap();
        sanitize_filename("with spaces.txt").unwrap();
        sanitize_filename("dots..inside.txt").unwrap();
    }

    #[test]
    fn test_sanitize_rejects_traversal() {
        for name in ["../../evil", "..", ".", "", "/etc/passwd", "a/b.txt", "c:\\boot.ini"] {
            assert!(
                matches!(sanitize_filename(name), Err(FrameError::UnsafeFilename(_))),
                "{name:?} should have been rejected"
            );
        }
    }
}

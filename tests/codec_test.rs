use streamsend::protocol::{
    FILE_SIZE_FIELD, NAME_LEN_FIELD, decode_file_size, decode_filename, decode_name_len,
    encode_header, read_field, sanitize_filename,
};
use streamsend::protocol::{EncodingError, FrameError};

#[test]
fn test_header_layout() {
    let header = encode_header("report.pdf", 1_048_576).unwrap();

    assert_eq!(header.len(), NAME_LEN_FIELD + "report.pdf".len() + FILE_SIZE_FIELD);
    assert_eq!(&header[..NAME_LEN_FIELD], b"00000010");
    assert_eq!(&header[NAME_LEN_FIELD..NAME_LEN_FIELD + 10], b"report.pdf");
    assert_eq!(&header[NAME_LEN_FIELD + 10..], b"0000000001048576");
}

#[test]
fn test_header_roundtrip() {
    let filename = "résumé final.pdf"; // multibyte UTF-8
    let file_size = 987_654_321u64;
    let header = encode_header(filename, file_size).unwrap();

    let name_len = decode_name_len(&header[..NAME_LEN_FIELD]).unwrap();
    assert_eq!(name_len, filename.len());

    let name_end = NAME_LEN_FIELD + name_len;
    let decoded = decode_filename(&header[NAME_LEN_FIELD..name_end], name_len).unwrap();
    assert_eq!(decoded, filename);

    let decoded_size = decode_file_size(&header[name_end..]).unwrap();
    assert_eq!(decoded_size, file_size);
}

#[test]
fn test_zero_size_roundtrip() {
    // A zero-byte file is a legal transfer and must decode as size 0, not
    // as "no size received".
    let header = encode_header("empty.txt", 0).unwrap();
    let size = decode_file_size(&header[NAME_LEN_FIELD + 9..]).unwrap();
    assert_eq!(size, 0);
}

#[test]
fn test_encode_rejects_oversized_fields() {
    assert!(matches!(
        encode_header("big.bin", 10_000_000_000_000_000),
        Err(EncodingError::SizeTooLarge(_))
    ));

    let long_name = "x".repeat(100_000_000);
    assert!(matches!(
        encode_header(&long_name, 1),
        Err(EncodingError::NameTooLong(_))
    ));

    // Largest representable values still fit.
    assert!(encode_header("ok.bin", 9_999_999_999_999_999).is_ok());
}

#[test]
fn test_decode_rejects_non_digits() {
    assert!(matches!(
        decode_name_len(b"12a45678"),
        Err(FrameError::InvalidDigits { .. })
    ));
    assert!(matches!(
        decode_file_size(b"00000000 1048576"),
        Err(FrameError::InvalidDigits { .. })
    ));
}

#[test]
fn test_decode_rejects_short_fields() {
    assert!(matches!(
        decode_name_len(b"1234"),
        Err(FrameError::ShortRead { expected: 8, got: 4 })
    ));
    assert!(matches!(
        decode_file_size(b"123"),
        Err(FrameError::ShortRead { expected: 16, got: 3 })
    ));
    assert!(matches!(
        decode_filename(b"abc", 5),
        Err(FrameError::ShortRead { expected: 5, got: 3 })
    ));
}

#[test]
fn test_decode_rejects_invalid_utf8() {
    assert!(matches!(
        decode_filename(&[0xff, 0xfe, 0x41], 3),
        Err(FrameError::InvalidUtf8(_))
    ));
}

#[test]
fn test_sanitize_rejects_traversal_names() {
    for name in [
        "../../evil",
        "..",
        "/etc/passwd",
        "sub/dir.txt",
        "..\\win.ini",
        "",
    ] {
        assert!(
            matches!(sanitize_filename(name), Err(FrameError::UnsafeFilename(_))),
            "{name:?} should have been rejected"
        );
    }
    sanitize_filename("plain-name.txt").unwrap();
}

#[tokio::test]
async fn test_read_field_loops_until_filled() {
    let header = encode_header("notes.txt", 4).unwrap();
    let mut frame = header.clone();
    frame.extend_from_slice(b"data");
    let mut reader: &[u8] = &frame;

    let mut len_buf = [0u8; NAME_LEN_FIELD];
    assert_eq!(read_field(&mut reader, &mut len_buf).await.unwrap(), 8);
    let name_len = decode_name_len(&len_buf).unwrap();

    let mut name_buf = vec![0u8; name_len];
    assert_eq!(
        read_field(&mut reader, &mut name_buf).await.unwrap(),
        name_len
    );
    assert_eq!(decode_filename(&name_buf, name_len).unwrap(), "notes.txt");

    let mut size_buf = [0u8; FILE_SIZE_FIELD];
    assert_eq!(read_field(&mut reader, &mut size_buf).await.unwrap(), 16);
    assert_eq!(decode_file_size(&size_buf).unwrap(), 4);

    let mut payload = [0u8; 4];
    assert_eq!(read_field(&mut reader, &mut payload).await.unwrap(), 4);
    assert_eq!(&payload, b"data");
}

#[tokio::test]
async fn test_read_field_reports_short_stream() {
    // Peer closes after four bytes: the helper reports what it got
    // instead of blocking or erroring.
    let mut reader: &[u8] = b"0000";
    let mut buf = [0u8; NAME_LEN_FIELD];
    assert_eq!(read_field(&mut reader, &mut buf).await.unwrap(), 4);
}

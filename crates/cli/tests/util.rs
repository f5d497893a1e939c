use pathfinder_cli::logging::{resolve_level, LOG_ENV};
use pathfinder_cli::{parse_number, sha256_file};
use tempfile::tempdir;

#[test]
fn parse_number_accepts_hex_and_decimal() {
    assert_eq!(parse_number("0x222004").expect("hex"), 0x222004);
    assert_eq!(parse_number("0X1f").expect("upper hex"), 0x1f);
    assert_eq!(parse_number(" 42 ").expect("decimal"), 42);
    assert!(parse_number("0x").is_err());
    assert!(parse_number("twelve").is_err());
}

#[test]
fn sha256_file_hashes_contents() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("abc.bin");
    std::fs::write(&path, b"abc").expect("write");
    assert_eq!(
        sha256_file(&path).expect("hash"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
    assert!(sha256_file(&dir.path().join("missing")).is_err());
}

/// Verbosity maps to levels when the environment does not override it.
#[test]
fn verbosity_selects_level() {
    if std::env::var(LOG_ENV).is_ok() {
        return;
    }
    assert_eq!(resolve_level(0), tracing::Level::WARN);
    assert_eq!(resolve_level(1), tracing::Level::INFO);
    assert_eq!(resolve_level(2), tracing::Level::DEBUG);
    assert_eq!(resolve_level(9), tracing::Level::TRACE);
}

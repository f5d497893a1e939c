#![cfg(feature = "pe-probe")]

use pathfinder_core::backends::FixtureDatabase;
use pathfinder_core::services::pe::{probe_pe, probe_pe_bytes, PeSummary};
use tempfile::tempdir;

#[test]
fn non_pe_input_is_rejected() {
    assert!(probe_pe_bytes(b"definitely not a portable executable", &[]).is_err());
    assert!(probe_pe_bytes(&[], &[]).is_err());
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempdir().expect("tempdir");
    assert!(probe_pe(&dir.path().join("absent.sys"), &[]).is_err());
}

/// Header facts refine the exported database, but an exported entry point wins.
#[test]
fn summary_refines_fixture_environment() {
    let summary = PeSummary {
        machine: "arm64".into(),
        is_64bit: true,
        image_base: 0x1_4000_0000,
        entry_point: 0x1_4000_5000,
        imports: Vec::new(),
        target_imports: Vec::new(),
    };
    assert_eq!(summary.processor(), "arm");

    let mut db = FixtureDatabase::default();
    summary.apply_to(&mut db);
    assert_eq!(db.processor, "arm");
    assert_eq!(db.entry_point, 0x1_4000_5000);

    let mut exported = FixtureDatabase { entry_point: 0x1000, ..FixtureDatabase::default() };
    summary.apply_to(&mut exported);
    assert_eq!(exported.entry_point, 0x1000);
}

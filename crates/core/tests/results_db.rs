use rusqlite::Connection;
use tempfile::tempdir;

use pathfinder_core::db::{DbError, DriverRunRecord, ResultDb, CURRENT_SCHEMA_VERSION};
use pathfinder_core::model::{AnalysisResult, ComparisonOp, ComparisonRecord, HandlerKind, PathReport};

fn sample_result() -> AnalysisResult {
    AnalysisResult {
        ret_code: 200,
        handler_type: HandlerKind::Wdm,
        handler_addrs: vec![0x2000],
        target_paths: vec![PathReport {
            path: vec![0x2000, 0x2110],
            name: "MmMapIoSpace".into(),
            context: Some(">  MmMapIoSpace(a1, 8);".into()),
        }],
        helper_paths: vec![PathReport { path: vec![0x2000, 0x2120], name: "__outbyte".into(), context: None }],
        ioctl_comp: vec![
            ComparisonRecord::new(ComparisonOp::Eq, 0x222004, "if ( IoControlCode == 0x222004 )"),
            ComparisonRecord::new(ComparisonOp::Gt, 0x222010, "if ( IoControlCode > 0x222010 )"),
        ],
        ..AnalysisResult::default()
    }
}

fn record_for(driver: &str, result: &AnalysisResult) -> DriverRunRecord {
    let mut record = DriverRunRecord::new(driver, result.ret_code);
    record.handler_type = result.handler_type;
    record.handler_count = result.handler_addrs.len();
    record.path_count = result.target_paths.len() + result.helper_paths.len();
    record
}

#[test]
fn runs_insert_and_list_round_trip() {
    let dir = tempdir().expect("tempdir");
    let db = ResultDb::open(&dir.path().join("results.db")).expect("open db");
    let result = sample_result();

    db.insert_run(&record_for("a.sys", &result), &result).expect("insert a");
    db.insert_run(&record_for("b.sys", &AnalysisResult::failed(-3)), &AnalysisResult::failed(-3))
        .expect("insert b");

    let all = db.list_runs(None).expect("list runs");
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].driver, "a.sys");
    assert_eq!(all[0].handler_type, HandlerKind::Wdm);
    assert_eq!(all[0].path_count, 2);
    assert_eq!(all[1].ret_code, -3);

    let only_b = db.list_runs(Some("b.sys")).expect("filter runs");
    assert_eq!(only_b.len(), 1);
    assert_eq!(only_b[0].handler_type, HandlerKind::Unknown);
}

/// The stored JSON is the full result, and the latest run wins.
#[test]
fn latest_result_is_loaded_back() {
    let db = ResultDb::open_in_memory().expect("open db");
    let first = AnalysisResult::failed(0);
    let second = sample_result();
    db.insert_run(&record_for("drv.sys", &first), &first).expect("insert first");
    db.insert_run(&record_for("drv.sys", &second), &second).expect("insert second");

    let loaded = db.load_result("drv.sys").expect("load").expect("present");
    assert_eq!(loaded, second);
    assert!(db.load_result("other.sys").expect("load").is_none());
}

/// Paths and comparisons land in their own tables.
#[test]
fn paths_and_comparisons_are_normalized() {
    let db = ResultDb::open_in_memory().expect("open db");
    let result = sample_result();
    let run_id = db.insert_run(&record_for("drv.sys", &result), &result).expect("insert");

    let conn = db.connection();
    let paths: i64 = conn
        .query_row("SELECT COUNT(*) FROM driver_paths WHERE run_id = ?1", [run_id], |row| row.get(0))
        .expect("count paths");
    assert_eq!(paths, 2);
    let stored_path: String = conn
        .query_row("SELECT path FROM driver_paths WHERE kind = 'target'", [], |row| row.get(0))
        .expect("target path");
    assert_eq!(stored_path, "0x2000,0x2110");

    assert_eq!(db.comparison_values("drv.sys").expect("values"), vec![0x222004, 0x222010]);
}

#[test]
fn fresh_database_is_migrated_to_current_version() {
    let db = ResultDb::open_in_memory().expect("open db");
    let version: i32 = db
        .connection()
        .query_row("PRAGMA user_version;", [], |row| row.get(0))
        .expect("user_version");
    assert_eq!(version, CURRENT_SCHEMA_VERSION);
}

/// Reopening an existing file keeps its data.
#[test]
fn reopening_keeps_runs() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("results.db");
    {
        let db = ResultDb::open(&path).expect("open db");
        let result = sample_result();
        db.insert_run(&record_for("drv.sys", &result), &result).expect("insert");
    }
    let db = ResultDb::open(&path).expect("reopen db");
    assert_eq!(db.list_runs(None).expect("list").len(), 1);
}

#[test]
fn newer_schema_is_rejected() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("future.db");
    {
        let conn = Connection::open(&path).expect("open raw");
        conn.execute_batch("PRAGMA user_version = 99;").expect("bump version");
    }
    match ResultDb::open(&path) {
        Err(DbError::UnsupportedSchemaVersion { found, .. }) => assert_eq!(found, 99),
        other => panic!("expected unsupported schema version, got {other:?}"),
    }
}

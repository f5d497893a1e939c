mod common;

use predicates::prelude::*;
use tempfile::tempdir;

use pathfinder_core::backends::FixtureDatabase;
use pathfinder_core::db::{ResultDb, WorkLayout};
use pathfinder_core::model::HandlerKind;
use pathfinder_core::services::analysis::read_result_file;

/// A handler reaching MmMapIoSpace exits with 200, writes the result file and records the run.
#[test]
fn analyze_finds_path_and_records_run() {
    let dir = tempdir().expect("tempdir");
    let db = common::write_database(dir.path(), "mapper.json", &common::wdm_database());

    assert_cmd::cargo::cargo_bin_cmd!("pathfinder")
        .arg("analyze")
        .arg(&db)
        .arg("--work-dir")
        .arg(dir.path())
        .assert()
        .code(200)
        .stdout(predicate::str::contains("Handler type: WDM"))
        .stdout(predicate::str::contains("MmMapIoSpace via 0x2000 -> 0x2010"));

    let result = read_result_file(&dir.path().join("mapper_ioctl_res.json")).expect("result file");
    assert_eq!(result.ret_code, 200);
    assert_eq!(result.handler_type, HandlerKind::Wdm);
    assert_eq!(result.handler_addrs, vec![common::HANDLER]);
    assert_eq!(result.target_paths[0].path, vec![common::HANDLER, 0x2010]);
    assert!(result.ioctl_comp.iter().any(|c| c.val == 0x222004));

    let layout = WorkLayout::new(dir.path());
    let store = ResultDb::open(&layout.db_path).expect("open results db");
    let runs = store.list_runs(Some("mapper.json")).expect("list runs");
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].ret_code, 200);
    assert_eq!(runs[0].path_count, 1);
    assert!(runs[0].driver_hash.is_some());

    assert_cmd::cargo::cargo_bin_cmd!("pathfinder")
        .arg("history")
        .arg("--work-dir")
        .arg(dir.path())
        .arg("--driver")
        .arg("mapper.json")
        .assert()
        .success()
        .stdout(predicate::str::contains("- mapper.json status=200"));
}

/// --output and --no-db write only the requested file.
#[test]
fn analyze_honours_output_and_no_db() {
    let dir = tempdir().expect("tempdir");
    let db = common::write_database(dir.path(), "mapper.json", &common::wdm_database());
    let out = dir.path().join("custom/out.json");

    assert_cmd::cargo::cargo_bin_cmd!("pathfinder")
        .arg("analyze")
        .arg(&db)
        .arg("--work-dir")
        .arg(dir.path())
        .arg("--output")
        .arg(&out)
        .arg("--no-db")
        .arg("--json")
        .assert()
        .code(200)
        .stdout(predicate::str::contains("\"ret_code\": 200"));

    assert!(out.exists());
    assert!(!WorkLayout::new(dir.path()).db_path.exists());
}

/// In batch mode a missing decompiler plugin is reported through the result file.
#[cfg(unix)]
#[test]
fn analyze_batch_without_plugin_reports_unavailable() {
    let dir = tempdir().expect("tempdir");
    let mut database = common::wdm_database();
    database.plugins.clear();
    let db = common::write_database(dir.path(), "mapper.json", &database);

    assert_cmd::cargo::cargo_bin_cmd!("pathfinder")
        .arg("analyze")
        .arg(&db)
        .arg("--work-dir")
        .arg(dir.path())
        .arg("--batch")
        .arg("--no-db")
        .assert()
        .code(255);

    let result = read_result_file(&dir.path().join("mapper_ioctl_res.json")).expect("result file");
    assert_eq!(result.ret_code, -1);
}

/// batch drives one child per driver and reports each status.
#[test]
fn batch_runs_each_driver() {
    let dir = tempdir().expect("tempdir");
    let mapper = common::write_database(dir.path(), "mapper.json", &common::wdm_database());
    let empty = common::write_database(dir.path(), "empty.json", &FixtureDatabase::default());
    let weights = dir.path().join("weights.csv");
    std::fs::write(&weights, "MmMapIoSpace,40\n").expect("write weights");

    assert_cmd::cargo::cargo_bin_cmd!("pathfinder")
        .arg("batch")
        .arg(&mapper)
        .arg(&empty)
        .arg("--work-dir")
        .arg(dir.path())
        .arg("--instance")
        .arg("0")
        .arg("--weights")
        .arg(&weights)
        .assert()
        .success()
        .stdout(predicate::str::contains("Batch results:"))
        .stdout(predicate::str::contains("mapper.json: 240 (bonus 40)"))
        .stdout(predicate::str::contains("empty.json: 0 (bonus 0)"));

    let store = ResultDb::open(&WorkLayout::new(dir.path()).db_path).expect("open results db");
    let runs = store.list_runs(Some("mapper.json")).expect("list runs");
    assert_eq!(runs.last().map(|r| r.weight_bonus), Some(40));
}

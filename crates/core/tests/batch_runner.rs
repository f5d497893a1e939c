use std::path::Path;
use std::time::Duration;

use tempfile::tempdir;

use pathfinder_core::db::WorkLayout;
use pathfinder_core::model::AnalysisResult;
use pathfinder_core::services::analysis::{read_result_file, write_result_file};
use pathfinder_core::services::runner::{decode_exit_code, RunnerError};
use pathfinder_core::services::BatchRunner;

/// Negative sentinels wrap to 253..=255 on exit; legitimate statuses are left alone.
#[test]
fn exit_codes_decode_sentinels_only() {
    assert_eq!(decode_exit_code(255), -1);
    assert_eq!(decode_exit_code(254), -2);
    assert_eq!(decode_exit_code(253), -3);
    assert_eq!(decode_exit_code(200), 200);
    assert_eq!(decode_exit_code(0), 0);
}

#[test]
fn timeout_scales_with_instance() {
    let layout = WorkLayout::new("/tmp/work");
    let runner = BatchRunner::new("pathfinder", layout).timeout_unit(Duration::from_secs(60));
    assert_eq!(runner.timeout(), None);
    assert_eq!(runner.clone().instance(3).timeout(), Some(Duration::from_secs(180)));
}

#[test]
fn result_file_round_trips() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("nested/drv_ioctl_res.json");
    let result = AnalysisResult { ret_code: 100, handler_addrs: vec![0x2000], ..AnalysisResult::default() };
    write_result_file(&path, &result).expect("write");
    assert_eq!(read_result_file(&path).expect("read"), result);
}

#[test]
fn missing_program_is_a_spawn_error() {
    let dir = tempdir().expect("tempdir");
    let runner = BatchRunner::new(dir.path().join("no-such-binary"), WorkLayout::new(dir.path()));
    match runner.run_driver(Path::new("drv.sys")) {
        Err(RunnerError::Spawn { .. }) => {}
        other => panic!("expected spawn error, got {other:?}"),
    }
}

/// A child that writes no result file is scored by its exit status; stale files are not reused.
#[cfg(unix)]
#[test]
fn child_without_result_falls_back_to_exit_status() {
    let dir = tempdir().expect("tempdir");
    let layout = WorkLayout::new(dir.path());
    let driver = Path::new("drv.sys");
    let stale = AnalysisResult { ret_code: 200, ..AnalysisResult::default() };
    write_result_file(&layout.result_path(driver), &stale).expect("stale result");

    let runner = BatchRunner::new("false", layout.clone()).poll_interval(Duration::from_millis(10));
    let outcome = runner.run_driver(driver).expect("run");
    assert!(!outcome.timed_out);
    assert_eq!(outcome.exit_code, Some(1));
    assert_eq!(outcome.result.expect("fallback result").ret_code, 1);
    assert!(!layout.result_path(driver).exists());
}

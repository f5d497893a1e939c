use std::fs;
use std::path::Path;

use tempfile::tempdir;

use pathfinder_core::db::{
    driver_base_name, load_config_or_default, open_result_db, PathfinderConfig, WorkContext, WorkLayout,
};

#[test]
fn layout_names_result_and_log_after_driver() {
    let layout = WorkLayout::new("/work");
    assert_eq!(layout.db_path, Path::new("/work/pathfinder.db"));
    assert_eq!(layout.result_path(Path::new("in/foo.sys")), Path::new("/work/foo_ioctl_res.json"));
    assert_eq!(layout.log_path(Path::new("foo.sys")), Path::new("/work/foo_pathfinder.log"));
    assert_eq!(driver_base_name(Path::new("foo.sys.json")), "foo.sys");
}

#[test]
fn relative_db_path_resolves_against_work_dir() {
    let layout = WorkLayout::new("/work").with_db_path("db/runs.db");
    assert_eq!(layout.db_path, Path::new("/work/db/runs.db"));
    let absolute = WorkLayout::new("/work").with_db_path("/elsewhere/runs.db");
    assert_eq!(absolute.db_path, Path::new("/elsewhere/runs.db"));
}

/// Partial YAML keeps the defaults for everything it does not mention.
#[test]
fn yaml_config_overrides_only_given_fields() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("pathfinder.yaml");
    fs::write(
        &path,
        "instance_timeout_minutes: 5\nengine:\n  target_apis: [MmMapIoSpace]\n  context_lines: 3\n",
    )
    .expect("write config");

    let config = PathfinderConfig::load(&path).expect("load yaml");
    assert_eq!(config.instance_timeout_minutes, 5);
    assert_eq!(config.engine.target_apis, vec!["MmMapIoSpace".to_string()]);
    assert_eq!(config.engine.context_lines, 3);
    assert_eq!(config.engine.rename_retries, 10);
    assert_eq!(config.db.path, "pathfinder.db");
}

#[test]
fn json_config_is_accepted() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("pathfinder.json");
    fs::write(&path, r#"{"work_dir": "out", "db": {"path": "runs.db"}}"#).expect("write config");

    let ctx = WorkContext::load(Some(&path), None).expect("context");
    assert_eq!(ctx.layout.work_dir, Path::new("out"));
    assert_eq!(ctx.layout.db_path, Path::new("out/runs.db"));

    let overridden = WorkContext::load(Some(&path), Some(dir.path())).expect("context");
    assert_eq!(overridden.layout.work_dir, dir.path());
}

#[test]
fn broken_config_is_an_error() {
    let dir = tempdir().expect("tempdir");
    let path = dir.path().join("broken.yaml");
    fs::write(&path, "engine: [not, a, map]\n").expect("write config");
    assert!(PathfinderConfig::load(&path).is_err());
    assert!(load_config_or_default(Some(&path)).is_err());
}

#[test]
fn missing_config_path_means_defaults() {
    let config = load_config_or_default(None).expect("defaults");
    assert_eq!(config, PathfinderConfig::default());
}

/// Opening the result database creates the work directory first.
#[test]
fn open_result_db_creates_work_dir() {
    let dir = tempdir().expect("tempdir");
    let layout = WorkLayout::new(dir.path().join("nested/work"));
    open_result_db(&layout).expect("open");
    assert!(layout.db_path.exists());
}

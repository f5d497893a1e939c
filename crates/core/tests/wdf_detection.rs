mod common;

use common::*;
use pathfinder_core::analysis::wdf::run_queue_finder;
use pathfinder_core::analysis::{AnalysisSession, Arch, EngineConfig, PropagationError};
use pathfinder_core::backends::{FixtureDatabase, FixtureOracle};
use pathfinder_core::model::{CFunc, ComparisonOp, Expr, HandlerKind, LocalVar, Stmt, WdfFunctionUse};
use pathfinder_core::services::analysis::finish_result;
use pathfinder_core::services::{AnalysisError, DriverAnalyzer};

fn queue_create(ea: u64, args: Vec<Expr>) -> Expr {
    let slot = Expr::memptr(ea, Expr::obj(ea, WDF_TABLE).with_type("PWDFFUNCTIONS"), 0x4C0);
    Expr::call(ea, Expr::cast(ea, slot), args)
}

/// Bind info, queue config and handler are recovered for a KMDF 1.15 driver.
#[test]
fn wdf_driver_handler_is_found_through_queue_config() {
    let mut oracle = FixtureOracle::new(wdf_driver());
    let result = DriverAnalyzer::new(&mut oracle, EngineConfig::default())
        .run()
        .expect("analysis should succeed");

    assert_eq!(result.ret_code, 200);
    assert_eq!(result.handler_type, HandlerKind::Wdf);
    assert_eq!(result.handler_addrs, vec![WDF_HANDLER]);
    assert_eq!(result.target_paths.len(), 1);
    assert_eq!(result.target_paths[0].path, vec![WDF_HANDLER, 0x4020]);
    assert_eq!(result.wdf_functions, vec!["pfnWdfIoQueueCreate".to_string()]);
    assert!(!result.wdf_debug_build);

    assert_eq!(result.ioctl_comp.len(), 1);
    assert_eq!(result.ioctl_comp[0].op, ComparisonOp::Eq);
    assert_eq!(result.ioctl_comp[0].val, 0x9C40_2580);
}

/// The table global is named and typed, and buffer arguments in the handler are named.
#[test]
fn wdf_table_and_buffers_are_annotated() {
    let mut oracle = FixtureOracle::new(wdf_driver());
    {
        let mut analyzer = DriverAnalyzer::new(&mut oracle, EngineConfig::default());
        analyzer.run().expect("analysis should succeed");
    }
    let journal = oracle.journal();
    assert!(journal.forced_names.contains(&(WDF_TABLE, "g_WDF_functions".to_string())));
    assert!(journal.applied_types.contains(&(WDF_TABLE, "PWDFFUNCTIONS".to_string())));
    assert!(journal.forced_names.contains(&(WDF_HANDLER, "fn_ioctl_handler_wdf".to_string())));
    assert!(journal.parsed_type_files.iter().any(|p| p.ends_with("WDFStructs.h")));

    let config_vars = oracle.variables(DEVICE_ADD).expect("device add vars");
    assert_eq!(config_vars[1].name, "Config");
    assert_eq!(config_vars[1].ty.as_str(), "WDF_IO_QUEUE_CONFIG");

    let handler_vars = oracle.variables(WDF_HANDLER).expect("handler vars");
    assert_eq!(handler_vars[4].name, "IoControlCode");
    assert_eq!(handler_vars[5].name, "InputBuffer");
    assert_eq!(handler_vars[6].name, "Length");
}

/// A unique typed reference to `_WDF_BIND_INFO` is enough, whatever the bind call looks like.
#[test]
fn typed_bind_info_reference_is_preferred() {
    let mut db = wdf_driver();
    db.type_refs.insert("_WDF_BIND_INFO".to_string(), vec![BIND_INFO]);
    db.functions[0].body = Stmt::block(vec![Stmt::expr(call(
        0x1010,
        WDF_VERSION_BIND,
        vec![Expr::var(0x1010, 0), Expr::var(0x1010, 1)],
    ))]);
    let mut oracle = FixtureOracle::new(db);
    let result = DriverAnalyzer::new(&mut oracle, EngineConfig::default()).run().expect("run");
    assert_eq!(result.handler_addrs, vec![WDF_HANDLER]);
}

/// No way to find the bind info is fatal with status -3.
#[test]
fn missing_bind_info_is_unrecoverable() {
    let mut db = wdf_driver();
    db.functions[0].body = Stmt::block(vec![Stmt::expr(call(
        0x1010,
        WDF_VERSION_BIND,
        vec![Expr::var(0x1010, 0), Expr::var(0x1010, 1), Expr::num(0x1010, 0)],
    ))]);
    let mut oracle = FixtureOracle::new(db);
    let outcome = DriverAnalyzer::new(&mut oracle, EngineConfig::default()).run();

    match &outcome {
        Err(AnalysisError::WdfVersionUnrecoverable(PropagationError::MissingBindInfo)) => {}
        other => panic!("expected missing bind info, got {other:?}"),
    }
    assert_eq!(finish_result(outcome).ret_code, -3);
}

/// A bind argument of an unrelated type does not identify the bind info; that is fatal too.
#[test]
fn mistyped_bind_argument_is_unrecoverable() {
    let mut db = wdf_driver();
    db.type_refs.clear();
    db.functions[0].body = Stmt::block(vec![Stmt::expr(call(
        0x1010,
        WDF_VERSION_BIND,
        vec![
            Expr::var(0x1010, 0),
            Expr::var(0x1010, 1),
            Expr::reference(0x1010, Expr::obj(0x1010, BIND_INFO)).with_type("void *"),
            Expr::obj(0x1010, DRIVER_GLOBALS),
        ],
    ))]);
    let mut oracle = FixtureOracle::new(db);
    let outcome = DriverAnalyzer::new(&mut oracle, EngineConfig::default()).run();

    match &outcome {
        Err(AnalysisError::WdfVersionUnrecoverable(PropagationError::MissingBindInfo)) => {}
        other => panic!("expected missing bind info, got {other:?}"),
    }
    assert_eq!(finish_result(outcome).ret_code, -3);
}

/// Bind info whose fields cannot be read is fatal as well.
#[test]
fn unreadable_bind_info_is_unrecoverable() {
    let mut db = wdf_driver();
    db.data.clear();
    let mut oracle = FixtureOracle::new(db);
    let err = DriverAnalyzer::new(&mut oracle, EngineConfig::default()).run().expect_err("must fail");
    assert_eq!(err.exit_code(), -3);
}

/// Pre-1.15 drivers embed the table; the queue-create slot is found by data reference.
#[test]
fn old_kmdf_table_uses_slot_data_references() {
    let mut db = wdf_driver();
    db.data.insert(BIND_INFO + 0x14, 9);
    db.xrefs.clear();
    db.data_refs.insert(WDF_TABLE + 0x4C0, vec![0x3010]);
    let mut oracle = FixtureOracle::new(db);
    let result = DriverAnalyzer::new(&mut oracle, EngineConfig::default()).run().expect("run");

    assert_eq!(result.handler_addrs, vec![WDF_HANDLER]);
    assert_eq!(result.wdf_functions, vec!["pfnWdfIoQueueCreate".to_string()]);
    assert!(oracle.journal().applied_types.contains(&(WDF_TABLE, "_WDFFUNCTIONS".to_string())));
}

fn wrapper_driver() -> FixtureDatabase {
    let wrapper = CFunc {
        entry: DEVICE_ADD,
        vars: vec![LocalVar::arg("a1", "__int64"), LocalVar::arg("a2", "__int64")],
        body: Stmt::block(vec![Stmt::expr(queue_create(
            0x3010,
            vec![
                Expr::obj(0x3010, DRIVER_GLOBALS),
                Expr::var(0x3010, 0),
                Expr::var(0x3010, 1),
                Expr::num(0x3010, 0),
                Expr::num(0x3010, 0),
            ],
        ))]),
        pseudocode: Vec::new(),
    };
    let caller = CFunc {
        entry: 0x3200,
        vars: vec![LocalVar::new("v1", "WDF_IO_QUEUE_CONFIG")],
        body: Stmt::block(vec![
            Stmt::expr(Expr::asg(
                0x3208,
                Expr::memref(0x3208, Expr::var(0x3208, 0), 0x28),
                Expr::obj(0x3208, WDF_HANDLER),
            )),
            Stmt::expr(call(0x3210, DEVICE_ADD, vec![Expr::num(0x3210, 0), Expr::reference(0x3210, Expr::var(0x3210, 0))])),
        ]),
        pseudocode: Vec::new(),
    };
    let mut db = FixtureDatabase::default();
    db.functions = vec![wrapper, caller];
    db.code_refs.insert(DEVICE_ADD, vec![0x3210]);
    db
}

/// A config that arrives as a parameter turns the function into a wrapper searched via its callers.
#[test]
fn queue_create_wrapper_is_resolved_in_callers() {
    let mut oracle = FixtureOracle::new(wrapper_driver());
    let mut session = AnalysisSession::new(Arch::X64, EngineConfig::default());

    let handler = run_queue_finder(&mut session, &mut oracle, 0x3010);

    assert_eq!(handler, Some(WDF_HANDLER));
    assert_eq!(session.handlers()[0].kind, HandlerKind::Wdf);
    let journal = oracle.journal();
    assert!(journal.forced_names.contains(&(DEVICE_ADD, "fn_WdfIoQueueCreate".to_string())));
    assert!(journal
        .variable_types
        .contains(&(DEVICE_ADD, "Config".to_string(), "PWDF_IO_QUEUE_CONFIG".to_string())));
}

/// A queue-create call with the wrong arity is retyped once, then given up on.
#[test]
fn queue_create_call_is_retyped_only_once() {
    let mut db = wrapper_driver();
    db.functions[0].body = Stmt::block(vec![Stmt::expr(queue_create(
        0x3010,
        vec![Expr::obj(0x3010, DRIVER_GLOBALS), Expr::var(0x3010, 0), Expr::var(0x3010, 1), Expr::num(0x3010, 0)],
    ))]);
    let mut oracle = FixtureOracle::new(db);
    let mut session = AnalysisSession::new(Arch::X64, EngineConfig::default());

    assert_eq!(run_queue_finder(&mut session, &mut oracle, 0x3010), None);

    let journal = oracle.journal();
    assert_eq!(journal.call_types.len(), 1);
    assert_eq!(journal.decompiled.iter().filter(|ea| **ea == DEVICE_ADD).count(), 2);
    assert!(session.queue_create_seen(0x3010));
}

/// The same function is searched only once per walk.
#[test]
fn queue_finder_is_memoized_per_function() {
    let mut oracle = FixtureOracle::new(wrapper_driver());
    let mut session = AnalysisSession::new(Arch::X64, EngineConfig::default());
    assert!(session.begin_queue_search(DEVICE_ADD));
    assert_eq!(run_queue_finder(&mut session, &mut oracle, 0x3010), None);
    assert!(oracle.journal().decompiled.is_empty());
}

/// Debug builds route most table calls through wrappers that forward their parameters.
#[test]
fn debug_build_verdict_needs_majority_of_flagged_uses() {
    let mut session = AnalysisSession::new(Arch::X64, EngineConfig::default());
    let flagged = |ea: u64, debug_wrapper: bool| WdfFunctionUse {
        ea,
        name: format!("pfnWdf{ea:X}"),
        debug_wrapper,
    };
    session.record_wdf_use(flagged(1, true));
    session.record_wdf_use(flagged(2, false));
    assert!(!session.looks_like_debug_build());

    session.record_wdf_use(flagged(3, true));
    assert_eq!(session.debug_wrapper_count(), 2);
    assert!(session.looks_like_debug_build());
    assert_eq!(session.wdf_functions().len(), 3);
}

//! Small driver databases written to disk for the CLI tests.
#![allow(dead_code)]

use std::path::{Path, PathBuf};

use pathfinder_core::backends::FixtureDatabase;
use pathfinder_core::model::{
    AnalysisResult, CFunc, ComparisonOp, ComparisonRecord, Expr, HandlerKind, LocalVar, PathReport,
    PseudocodeLine, Stmt,
};
use pathfinder_core::services::analysis::write_result_file;

pub const ENTRY: u64 = 0x1000;
pub const HANDLER: u64 = 0x2000;
pub const MMMAPIOSPACE: u64 = 0x9000;

fn line(ea: u64, text: &str) -> PseudocodeLine {
    PseudocodeLine { ea: Some(ea), text: text.to_string() }
}

/// WDM driver whose device-control handler maps physical memory directly.
pub fn wdm_database() -> FixtureDatabase {
    let store = Expr::asg(
        0x1010,
        Expr::idx(
            0x1010,
            Expr::memptr(0x1010, Expr::var(0x1010, 0).with_type("PDRIVER_OBJECT"), 0x70)
                .with_type("PDRIVER_DISPATCH[28]"),
            Expr::num(0x1010, 14),
        ),
        Expr::obj(0x1010, HANDLER),
    );
    let entry = CFunc {
        entry: ENTRY,
        vars: vec![
            LocalVar::arg("DriverObject", "PDRIVER_OBJECT"),
            LocalVar::arg("RegistryPath", "PUNICODE_STRING"),
        ],
        body: Stmt::block(vec![Stmt::expr(store)]),
        pseudocode: vec![
            line(0x1000, "NTSTATUS __stdcall DriverEntry(PDRIVER_OBJECT DriverObject, PUNICODE_STRING RegistryPath)"),
            line(0x1010, "  DriverObject->MajorFunction[14] = (PDRIVER_DISPATCH)sub_2000;"),
        ],
    };
    let handler = CFunc {
        entry: HANDLER,
        vars: vec![LocalVar::arg("a1", "__int64"), LocalVar::arg("a2", "__int64")],
        body: Stmt::block(vec![Stmt::expr(Expr::call(
            0x2010,
            Expr::obj(0x2010, MMMAPIOSPACE),
            vec![Expr::var(0x2010, 1), Expr::num(0x2010, 0x1000)],
        ))]),
        pseudocode: vec![
            line(0x2000, "NTSTATUS __stdcall sub_2000(__int64 a1, __int64 a2)"),
            line(0x2004, "  if ( IoControlCode == 0x222004 )"),
            line(0x2010, "    MmMapIoSpace(a2, 4096);"),
        ],
    };

    let mut db = FixtureDatabase { entry_point: ENTRY, file_name: "mapper.sys".into(), ..FixtureDatabase::default() };
    db.names.insert(ENTRY, "DriverEntry".to_string());
    db.names.insert(MMMAPIOSPACE, "MmMapIoSpace".to_string());
    db.functions = vec![entry, handler];
    db
}

pub fn write_database(dir: &Path, name: &str, db: &FixtureDatabase) -> PathBuf {
    let path = dir.join(name);
    let body = serde_json::to_string_pretty(db).expect("serialize database");
    std::fs::write(&path, body).expect("write database");
    path
}

/// A finished WDM result with one path, one tree and a few comparisons.
pub fn write_sample_result(dir: &Path) -> PathBuf {
    let result = AnalysisResult {
        ret_code: 200,
        handler_type: HandlerKind::Wdm,
        handler_addrs: vec![HANDLER],
        target_paths: vec![PathReport {
            path: vec![HANDLER, 0x2010],
            name: "MmMapIoSpace".into(),
            context: None,
        }],
        ioctl_comp: vec![
            ComparisonRecord::new(ComparisonOp::Eq, 0x222004, "  if ( IoControlCode == 0x222004 )"),
            ComparisonRecord::new(ComparisonOp::Gt, 0x222010, "  if ( IoControlCode > 0x222010 )"),
        ],
        function_trees: vec!["0x2000 fn_ioctl_handler_wdm {\n  0x2010 MmMapIoSpace\n}\n".into()],
        ..AnalysisResult::default()
    };
    let path = dir.join("mapper_ioctl_res.json");
    write_result_file(&path, &result).expect("write result");
    path
}

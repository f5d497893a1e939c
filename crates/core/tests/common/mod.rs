//! Hand-built driver databases shared by the integration tests.
#![allow(dead_code)]

use pathfinder_core::backends::FixtureDatabase;
use pathfinder_core::model::{CFunc, Expr, LocalVar, PseudocodeLine, Stmt};

pub const ENTRY: u64 = 0x1000;
pub const WDM_HANDLER: u64 = 0x2000;
pub const SUB_MAP: u64 = 0x2100;
pub const SUB_LOOP: u64 = 0x2200;
pub const MMMAPIOSPACE: u64 = 0x9000;

pub const DEVICE_ADD: u64 = 0x3000;
pub const WDF_HANDLER: u64 = 0x4000;
pub const BIND_INFO: u64 = 0x5000;
pub const DRIVER_GLOBALS: u64 = 0x5100;
pub const WDF_TABLE: u64 = 0x6000;
pub const WDF_VERSION_BIND: u64 = 0x9100;

pub fn line(ea: u64, text: &str) -> PseudocodeLine {
    PseudocodeLine { ea: Some(ea), text: text.to_string() }
}

pub fn call(ea: u64, target: u64, args: Vec<Expr>) -> Expr {
    Expr::call(ea, Expr::obj(ea, target), args)
}

fn handler_function() -> CFunc {
    CFunc {
        entry: WDM_HANDLER,
        vars: vec![
            LocalVar::arg("a1", "__int64"),
            LocalVar::arg("a2", "__int64"),
            LocalVar::new("v3", "__int64"),
        ],
        body: Stmt::block(vec![
            Stmt::expr(call(0x2010, SUB_MAP, vec![Expr::var(0x2010, 2)])),
            Stmt::Return { expr: Some(Expr::num(0x2018, 0)) },
        ]),
        pseudocode: vec![
            line(0x2000, "NTSTATUS __stdcall fn_ioctl_handler_wdm(struct _DEVICE_OBJECT *DeviceObject, struct _IRP *Irp)"),
            line(0x2004, "  if ( IoControlCode == 0x222004 )"),
            line(0x2010, "    fn_2100(v3);"),
            line(0x2018, "  return 0;"),
        ],
    }
}

fn mapping_function() -> CFunc {
    CFunc {
        entry: SUB_MAP,
        vars: vec![LocalVar::arg("a1", "__int64"), LocalVar::new("v2", "__int64")],
        body: Stmt::block(vec![
            Stmt::expr(Expr::asg(
                0x2108,
                Expr::var(0x2108, 1),
                call(0x2110, MMMAPIOSPACE, vec![Expr::var(0x2110, 0), Expr::num(0x2110, 0x1000)]),
            )),
            Stmt::expr(Expr::call(
                0x2120,
                Expr::helper(0x2120, "__outbyte"),
                vec![Expr::num(0x2120, 0x80), Expr::num(0x2120, 1)],
            )),
            Stmt::expr(call(0x2130, SUB_LOOP, vec![])),
        ]),
        pseudocode: vec![
            line(0x2100, "__int64 __fastcall fn_2100(__int64 a1)"),
            line(0x2110, "  v2 = MmMapIoSpace(a1, 4096);"),
            line(0x2120, "  __outbyte(0x80u, 1u);"),
            line(0x2130, "  return fn_2200();"),
        ],
    }
}

/// Calls itself and its caller; the walk must still terminate.
fn looping_function() -> CFunc {
    CFunc {
        entry: SUB_LOOP,
        vars: Vec::new(),
        body: Stmt::block(vec![
            Stmt::expr(call(0x2210, SUB_LOOP, vec![])),
            Stmt::expr(call(0x2220, SUB_MAP, vec![])),
        ]),
        pseudocode: vec![line(0x2200, "void fn_2200()")],
    }
}

/// `DriverEntry` storing its device-control handler into `MajorFunction[14]`.
pub fn wdm_driver() -> FixtureDatabase {
    let store = Expr::asg(
        0x1010,
        Expr::idx(
            0x1010,
            Expr::memptr(0x1010, Expr::var(0x1010, 0).with_type("PDRIVER_OBJECT"), 0x70)
                .with_type("PDRIVER_DISPATCH[28]"),
            Expr::num(0x1010, 14),
        ),
        Expr::obj(0x1010, WDM_HANDLER),
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

    let mut db = FixtureDatabase { entry_point: ENTRY, ..FixtureDatabase::default() };
    db.names.insert(ENTRY, "DriverEntry".to_string());
    db.names.insert(MMMAPIOSPACE, "MmMapIoSpace".to_string());
    db.functions = vec![entry, handler_function(), mapping_function(), looping_function()];
    db
}

fn table_call(ea: u64, slot: u64, args: Vec<Expr>) -> Expr {
    let slot = Expr::memptr(ea, Expr::obj(ea, WDF_TABLE).with_type("PWDFFUNCTIONS"), slot);
    Expr::call(ea, Expr::cast(ea, slot), args)
}

/// KMDF 1.15 driver: `WdfVersionBind` in the entry, queue creation in `EvtDriverDeviceAdd`.
pub fn wdf_driver() -> FixtureDatabase {
    let bind = call(
        0x1010,
        WDF_VERSION_BIND,
        vec![
            Expr::var(0x1010, 0),
            Expr::var(0x1010, 1),
            Expr::reference(0x1010, Expr::obj(0x1010, BIND_INFO)).with_type("PWDF_BIND_INFO"),
            Expr::obj(0x1010, DRIVER_GLOBALS),
        ],
    );
    let entry = CFunc {
        entry: ENTRY,
        vars: vec![
            LocalVar::arg("DriverObject", "PDRIVER_OBJECT"),
            LocalVar::arg("RegistryPath", "PUNICODE_STRING"),
        ],
        body: Stmt::block(vec![Stmt::expr(bind)]),
        pseudocode: vec![line(0x1010, "  WdfVersionBind(DriverObject, RegistryPath, &BindInfo, &Globals);")],
    };

    let device_add = CFunc {
        entry: DEVICE_ADD,
        vars: vec![
            LocalVar::arg("a1", "__int64"),
            LocalVar::new("v1", "_BYTE[0x60]"),
            LocalVar::new("v2", "__int64"),
        ],
        body: Stmt::block(vec![
            Stmt::expr(Expr::asg(
                0x3008,
                Expr::memref(0x3008, Expr::var(0x3008, 1), 0x28),
                Expr::obj(0x3008, WDF_HANDLER),
            )),
            Stmt::expr(table_call(
                0x3010,
                0x4C0,
                vec![
                    Expr::obj(0x3010, DRIVER_GLOBALS),
                    Expr::var(0x3010, 0),
                    Expr::reference(0x3010, Expr::var(0x3010, 1)),
                    Expr::num(0x3010, 0),
                    Expr::reference(0x3010, Expr::var(0x3010, 2)),
                ],
            )),
        ]),
        pseudocode: vec![
            line(0x3008, "  Config.EvtIoDeviceControl = EvtIoDeviceControl;"),
            line(0x3010, "  WdfFunctions->pfnWdfIoQueueCreate(Globals, a1, &Config, 0, &v2);"),
        ],
    };

    let handler = CFunc {
        entry: WDF_HANDLER,
        vars: vec![
            LocalVar::arg("a1", "__int64"),
            LocalVar::arg("a2", "__int64"),
            LocalVar::arg("a3", "size_t"),
            LocalVar::arg("a4", "size_t"),
            LocalVar::arg("a5", "ULONG"),
            LocalVar::new("v6", "__int64"),
            LocalVar::new("v7", "__int64"),
        ],
        body: Stmt::block(vec![
            Stmt::expr(table_call(
                0x4010,
                0x868,
                vec![
                    Expr::obj(0x4010, DRIVER_GLOBALS),
                    Expr::var(0x4010, 1),
                    Expr::num(0x4010, 8),
                    Expr::reference(0x4010, Expr::var(0x4010, 5)),
                    Expr::reference(0x4010, Expr::var(0x4010, 6)),
                ],
            )),
            Stmt::expr(call(0x4020, MMMAPIOSPACE, vec![Expr::var(0x4020, 5), Expr::num(0x4020, 8)])),
        ]),
        pseudocode: vec![
            line(0x4000, "void __fastcall EvtWdfIoQueueIoDeviceControl(PVOID Queue, PVOID Request, size_t OutputBufferLength, size_t InputBufferLength, ULONG IoControlCode)"),
            line(0x4008, "  switch ( IoControlCode )"),
            line(0x400C, "    case 0x9C402580:"),
            line(0x4010, "      WdfFunctions->pfnWdfRequestRetrieveInputBuffer(Globals, Request, 8, &v6, &v7);"),
            line(0x4020, "      MmMapIoSpace(v6, 8);"),
        ],
    };

    let mut db = FixtureDatabase { entry_point: ENTRY, ..FixtureDatabase::default() };
    db.names.insert(ENTRY, "DriverEntry".to_string());
    db.names.insert(WDF_VERSION_BIND, "WdfVersionBind".to_string());
    db.names.insert(MMMAPIOSPACE, "MmMapIoSpace".to_string());
    db.functions = vec![entry, device_add, handler];
    db.data.insert(BIND_INFO + 0x10, 1);
    db.data.insert(BIND_INFO + 0x14, 15);
    db.data.insert(BIND_INFO + 0x18, 0);
    db.data.insert(BIND_INFO + 0x20, WDF_TABLE);
    db.xrefs.insert(WDF_TABLE, vec![0x3010]);
    db
}

//! Layout facts about the KMDF function table and the structures around it.

use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Slot names of `_WDFFUNCTIONS` in declaration order; slot `i` lives at offset `i * 8`.
const KMDF_FUNCTION_NAMES: &str = include_str!("../../resources/wdf_functions.txt");

pub const POINTER_SIZE: u64 = 8;

/// Name given to the function table global once located.
pub const WDF_FUNCTIONS_GLOBAL: &str = "g_WDF_functions";
pub const WDF_FUNCTIONS_STRUCT: &str = "_WDFFUNCTIONS";
pub const WDF_BIND_INFO_STRUCT: &str = "_WDF_BIND_INFO";
pub const WDF_VERSION_BIND: &str = "WdfVersionBind";

/// `_WDF_BIND_INFO` field offsets.
pub const BIND_INFO_VERSION_OFFSET: u64 = 0x10;
pub const BIND_INFO_FUNC_TABLE_OFFSET: u64 = 0x20;

/// `pfnWdfIoQueueCreate` slot.
pub const IO_QUEUE_CREATE_OFFSET: u64 = 0x4C0;
/// Index of the `WDF_IO_QUEUE_CONFIG` argument; argument 0 is the driver globals handle.
pub const IO_QUEUE_CONFIG_ARG: usize = 2;
pub const IO_QUEUE_CREATE_ARGC: usize = 5;
/// `EvtIoDeviceControl` field of `WDF_IO_QUEUE_CONFIG`.
pub const IO_DEVICE_CONTROL_OFFSET: u64 = 0x28;

pub const DECL_WDF_VERSION_BIND: &str = "NTSTATUS __fastcall WdfVersionBind(PDRIVER_OBJECT DriverObject, PUNICODE_STRING RegistryPath, PWDF_BIND_INFO BindInfo, PVOID ComponentGlobals);";
pub const DECL_IO_QUEUE_CREATE_CALL: &str = "__int64 (__fastcall *)(HANDLE, WDFDEVICE, PWDF_IO_QUEUE_CONFIG, PWDF_OBJECT_ATTRIBUTES, WDFQUEUE);";
pub const DECL_IO_QUEUE_CREATE_WRAPPER: &str = "NTSTATUS __fastcall WdfIoQueueCreate(PVOID Device, PWDF_IO_QUEUE_CONFIG Config, PVOID QueueAttributes, PVOID *Queue);";
pub const DECL_EVT_IO_DEVICE_CONTROL: &str = "void __fastcall EvtWdfIoQueueIoDeviceControl(PVOID Queue, PVOID Request, size_t OutputBufferLength, size_t InputBufferLength, ULONG IoControlCode);";

/// A table slot whose call sites hand out request buffers or security-relevant strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferSlot {
    pub offset: u64,
    pub decl: &'static str,
    /// Argument index to variable name for the buffers the slot fills in.
    pub arg_names: &'static [(usize, &'static str)],
}

pub const BUFFER_SLOTS: &[BufferSlot] = &[
    BufferSlot {
        offset: 0x610,
        decl: "PVOID __fastcall WdfMemoryGetBuffer(PVOID ComponentGlobals, WDFMEMORY Memory, size_t *BufferLength);",
        arg_names: &[(2, "Length")],
    },
    BufferSlot {
        offset: 0x868,
        decl: "NTSTATUS __fastcall WdfRequestRetrieveInputBuffer(PVOID ComponentGlobals, PVOID Request, size_t MinimumRequiredLength, PVOID *InputBuffer, size_t *Length);",
        arg_names: &[(3, "InputBuffer"), (4, "Length")],
    },
    BufferSlot {
        offset: 0x870,
        decl: "NTSTATUS __fastcall WdfRequestRetrieveOutputBuffer(PVOID ComponentGlobals, PVOID Request, size_t MinimumRequiredLength, PVOID *OutputBuffer, size_t *Length);",
        arg_names: &[(3, "OutputBuffer"), (4, "Length")],
    },
    BufferSlot {
        offset: 0x878,
        decl: "NTSTATUS __fastcall WdfRequestRetrieveInputWdmMdl(PVOID ComponentGlobals, PVOID Request, PMDL *Mdl);",
        arg_names: &[(2, "Mdl")],
    },
    BufferSlot {
        offset: 0x880,
        decl: "NTSTATUS __fastcall WdfRequestRetrieveOutputWdmMdl(PVOID ComponentGlobals, PVOID Request, PMDL *Mdl);",
        arg_names: &[(2, "Mdl")],
    },
    BufferSlot {
        offset: 0x858,
        decl: "NTSTATUS __fastcall WdfRequestRetrieveInputMemory(PVOID ComponentGlobals, PVOID Request, PVOID *InputMemory);",
        arg_names: &[(2, "Memory")],
    },
    BufferSlot {
        offset: 0x860,
        decl: "NTSTATUS __fastcall WdfRequestRetrieveOutputMemory(PVOID ComponentGlobals, PVOID Request, PVOID *OutputMemory);",
        arg_names: &[(2, "Memory")],
    },
    BufferSlot {
        offset: 0x850,
        decl: "NTSTATUS __fastcall WdfRequestGetParameters(PVOID ComponentGlobals, PVOID Request, PWDF_REQUEST_PARAMETERS Parameters);",
        arg_names: &[(2, "Parameters")],
    },
    BufferSlot {
        offset: 0x888,
        decl: "NTSTATUS __fastcall WdfRequestRetrieveUnsafeUserInputBuffer(PVOID ComponentGlobals, PVOID Request, size_t MinimumRequiredLength, PVOID *InputBuffer, size_t *Length);",
        arg_names: &[(3, "InputBuffer"), (4, "Length")],
    },
    BufferSlot {
        offset: 0x890,
        decl: "NTSTATUS __fastcall WdfRequestRetrieveUnsafeUserOutputBuffer(PVOID ComponentGlobals, PVOID Request, size_t MinimumRequiredLength, PVOID *OutputBuffer, size_t *Length);",
        arg_names: &[(3, "OutputBuffer"), (4, "Length")],
    },
    BufferSlot {
        offset: 0x8b0,
        decl: "NTSTATUS __fastcall WdfRequestProbeAndLockUserBufferForRead(PVOID ComponentGlobals, PVOID Request, PVOID InputBuffer, size_t Length, PVOID *MemoryObject);",
        arg_names: &[(2, "OutputBuffer"), (3, "Length")],
    },
    BufferSlot {
        offset: 0x8b8,
        decl: "NTSTATUS __fastcall WdfRequestProbeAndLockUserBufferForWrite(PVOID ComponentGlobals, PVOID Request, PVOID OutputBuffer, size_t Length, PVOID *MemoryObject);",
        arg_names: &[(2, "InputBuffer"), (3, "Length")],
    },
    BufferSlot {
        offset: 0x268,
        decl: "NTSTATUS __fastcall WdfDeviceCreateDeviceInterface(PVOID Device, PVOID InterfaceClassGUID, PVOID ReferenceString);",
        arg_names: &[(2, "ReferenceString")],
    },
    BufferSlot {
        offset: 0x0c8,
        decl: "NTSTATUS __fastcall WdfControlDeviceInitAllocate(PVOID DriverGlobals, PVOID DeviceInit, PVOID ControlDeviceInit);",
        arg_names: &[(2, "SDDLString")],
    },
];

pub fn buffer_slot(offset: u64) -> Option<&'static BufferSlot> {
    BUFFER_SLOTS.iter().find(|slot| slot.offset == offset)
}

/// How the bound driver stores the function table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum WdfTableLayout {
    /// Before KMDF 1.15 the table struct is embedded in the driver's data.
    Direct,
    /// From KMDF 1.15 on the driver holds a pointer to the table.
    Indirect,
}

impl WdfTableLayout {
    pub fn for_version(version: &WdfVersion) -> Self {
        if version.major >= 1 && version.minor >= 15 {
            WdfTableLayout::Indirect
        } else {
            WdfTableLayout::Direct
        }
    }

    /// Type applied to the table global.
    pub fn decl(self) -> &'static str {
        match self {
            WdfTableLayout::Direct => "_WDFFUNCTIONS;",
            WdfTableLayout::Indirect => "PWDFFUNCTIONS;",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WdfVersion {
    pub major: u32,
    pub minor: u32,
    pub build: u32,
}

impl std::fmt::Display for WdfVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.build)
    }
}

/// Offset to slot-name map of the KMDF function table.
#[derive(Debug, Clone)]
pub struct WdfFunctionTable {
    slots: BTreeMap<u64, &'static str>,
}

impl WdfFunctionTable {
    /// The table shipped with the crate.
    pub fn kmdf() -> &'static WdfFunctionTable {
        static TABLE: OnceLock<WdfFunctionTable> = OnceLock::new();
        TABLE.get_or_init(|| WdfFunctionTable::parse(KMDF_FUNCTION_NAMES))
    }

    /// One slot name per non-empty line; `#` starts a comment line.
    pub fn parse(text: &'static str) -> Self {
        let slots = text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .enumerate()
            .map(|(idx, name)| (idx as u64 * POINTER_SIZE, name))
            .collect();
        Self { slots }
    }

    pub fn name(&self, offset: u64) -> Option<&'static str> {
        self.slots.get(&offset).copied()
    }

    pub fn contains(&self, offset: u64) -> bool {
        self.slots.contains_key(&offset)
    }

    pub fn offsets(&self) -> impl Iterator<Item = u64> + '_ {
        self.slots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}

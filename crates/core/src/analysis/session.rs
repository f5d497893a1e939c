use std::collections::{BTreeMap, BTreeSet, HashSet};

use serde::{Deserialize, Serialize};

use crate::analysis::config::EngineConfig;
use crate::analysis::wdf_table::{WdfTableLayout, WdfVersion};
use crate::model::{HandlerKind, HandlerRecord, PathRecord, WdfFunctionUse};

/// Target architecture families that change how handlers are registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Arch {
    #[default]
    X64,
    Arm64,
}

/// Struct member whose union must be forced to its device-control variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnionTarget {
    pub struct_name: &'static str,
    pub offset: u64,
    pub union_member: u64,
}

const X64_UNION_TARGETS: &[UnionTarget] = &[
    // _IO_STACK_LOCATION.Parameters -> DeviceIoControl
    UnionTarget { struct_name: "IO_STACK_LOCATION", offset: 0x8, union_member: 0x10 },
    // _IRP.AssociatedIrp -> SystemBuffer
    UnionTarget { struct_name: "IRP", offset: 0x18, union_member: 0x2 },
];

const ARM64_UNION_TARGETS: &[UnionTarget] = &[
    UnionTarget { struct_name: "IO_STACK_LOCATION", offset: 0x4, union_member: 0x10 },
    UnionTarget { struct_name: "IRP", offset: 0x18, union_member: 0x2 },
];

impl Arch {
    pub fn union_targets(self) -> &'static [UnionTarget] {
        match self {
            Arch::X64 => X64_UNION_TARGETS,
            Arch::Arm64 => ARM64_UNION_TARGETS,
        }
    }
}

/// WDF table state recovered from `_WDF_BIND_INFO`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WdfBinding {
    pub bind_info: u64,
    pub table: u64,
    pub version: WdfVersion,
    pub layout: WdfTableLayout,
}

/// All mutable state of one driver analysis. Built fresh per driver and dropped afterwards.
#[derive(Debug, Default)]
pub struct AnalysisSession {
    pub arch: Arch,
    pub config: EngineConfig,
    handlers: BTreeMap<u64, HandlerKind>,
    last_handler_kind: HandlerKind,
    target_paths: BTreeSet<PathRecord>,
    helper_paths: BTreeSet<PathRecord>,
    /// Functions typed with an IRP-bearing prototype or with a corrected union access.
    irp_functions: BTreeSet<u64>,
    wdf_functions: BTreeSet<String>,
    wdf_uses: BTreeSet<WdfFunctionUse>,
    /// Function starts already scanned by the usage finder.
    usage_scanned: HashSet<u64>,
    /// Queue-create call sites already handled, and those retyped once.
    queue_create_seen: HashSet<u64>,
    queue_create_retyped: HashSet<u64>,
    /// Functions already searched for the queue-create call.
    queue_finder_visited: HashSet<u64>,
    pub wdf: Option<WdfBinding>,
    /// Direct-layout table seen; the orchestrator retries the walk once if nothing was found.
    pub old_kmdf_version: bool,
}

impl AnalysisSession {
    pub fn new(arch: Arch, config: EngineConfig) -> Self {
        Self { arch, config, ..Self::default() }
    }

    /// Register a handler. The first kind recorded for an address wins.
    pub fn add_handler(&mut self, address: u64, kind: HandlerKind) -> bool {
        match self.handlers.get(&address) {
            Some(existing) if *existing != kind => {
                tracing::warn!(
                    handler = format_args!("{address:#x}"),
                    %existing,
                    rejected = %kind,
                    "handler already registered with another kind"
                );
                false
            }
            Some(_) => false,
            None => {
                self.handlers.insert(address, kind);
                self.last_handler_kind = kind;
                true
            }
        }
    }

    pub fn is_handler(&self, address: u64) -> bool {
        self.handlers.contains_key(&address)
    }

    pub fn handlers(&self) -> Vec<HandlerRecord> {
        self.handlers.iter().map(|(address, kind)| HandlerRecord { address: *address, kind: *kind }).collect()
    }

    pub fn handler_addresses(&self) -> Vec<u64> {
        self.handlers.keys().copied().collect()
    }

    /// Kind of the most recently registered handler.
    pub fn handler_kind(&self) -> HandlerKind {
        self.last_handler_kind
    }

    pub fn add_target_path(&mut self, record: PathRecord) -> bool {
        self.target_paths.insert(record)
    }

    pub fn add_helper_path(&mut self, record: PathRecord) -> bool {
        self.helper_paths.insert(record)
    }

    pub fn target_paths(&self) -> &BTreeSet<PathRecord> {
        &self.target_paths
    }

    pub fn helper_paths(&self) -> &BTreeSet<PathRecord> {
        &self.helper_paths
    }

    pub fn mark_irp_function(&mut self, func: u64) {
        self.irp_functions.insert(func);
    }

    pub fn irp_functions(&self) -> &BTreeSet<u64> {
        &self.irp_functions
    }

    /// Every address worth scanning for IOCTL comparisons.
    pub fn comparison_locations(&self) -> BTreeSet<u64> {
        let mut out: BTreeSet<u64> = self.handlers.keys().copied().collect();
        for record in self.target_paths.iter().chain(self.helper_paths.iter()) {
            out.extend(record.path.iter().copied());
        }
        out.extend(self.irp_functions.iter().copied());
        out
    }

    /// Returns false if the function was scanned before.
    pub fn begin_usage_scan(&mut self, func: u64) -> bool {
        self.usage_scanned.insert(func)
    }

    pub fn record_wdf_function(&mut self, name: &str) {
        self.wdf_functions.insert(name.to_string());
    }

    pub fn record_wdf_use(&mut self, usage: WdfFunctionUse) {
        self.wdf_functions.insert(usage.name.clone());
        self.wdf_uses.insert(usage);
    }

    pub fn wdf_functions(&self) -> &BTreeSet<String> {
        &self.wdf_functions
    }

    pub fn wdf_uses(&self) -> &BTreeSet<WdfFunctionUse> {
        &self.wdf_uses
    }

    pub fn debug_wrapper_count(&self) -> usize {
        self.wdf_uses.iter().filter(|u| u.debug_wrapper).count()
    }

    /// Most table uses forward their caller's parameters unchanged.
    pub fn looks_like_debug_build(&self) -> bool {
        let flagged = self.debug_wrapper_count();
        flagged > self.config.debug_wrapper_min_uses && flagged * 2 > self.wdf_uses.len()
    }

    pub fn queue_create_seen(&self, call_ea: u64) -> bool {
        self.queue_create_seen.contains(&call_ea)
    }

    pub fn mark_queue_create_seen(&mut self, call_ea: u64) {
        self.queue_create_seen.insert(call_ea);
    }

    /// Returns false if the call was retyped before.
    pub fn begin_queue_create_retype(&mut self, call_ea: u64) -> bool {
        self.queue_create_retyped.insert(call_ea)
    }

    pub fn queue_create_retyped(&self, call_ea: u64) -> bool {
        self.queue_create_retyped.contains(&call_ea)
    }

    /// Returns false if the function was searched before.
    pub fn begin_queue_search(&mut self, func: u64) -> bool {
        self.queue_finder_visited.insert(func)
    }

    /// Forget per-walk memo sets before a second full walk; findings stay.
    pub fn reset_for_retry(&mut self) {
        self.queue_create_seen.clear();
        self.queue_create_retyped.clear();
        self.queue_finder_visited.clear();
    }
}

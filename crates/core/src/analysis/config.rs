use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Kernel APIs whose reachability from a handler makes a driver interesting.
pub const DEFAULT_TARGET_APIS: &[&str] = &[
    "MmMapIoSpace",
    "MmMapIoSpaceEx",
    "MmMapMemoryDumpMdl",
    "IoAllocateMdl",
    "ZwMapViewOfSection",
    "ZwMapViewOfSectionEx",
    "ZwOpenSection",
    "MmGetPhysicalAddress",
    "MmInitializeMdl",
    "ProbeForWrite",
    "ProbeForRead",
    "MmCopyMemory",
];

/// Decompiler intrinsics for port I/O, MSR access and raw copies.
pub const DEFAULT_HELPER_NAMES: &[&str] = &[
    "__inbyte",
    "__inword",
    "__indword",
    "__outbyte",
    "__outword",
    "__outdword",
    "_WriteStatusReg",
    "_ReadStatusReg",
    "__readmsr",
    "__writemsr",
    "qmemcpy",
    "memmove",
];

/// Named functions the walk enters even though they are not `sub_` placeholders.
pub const DEFAULT_FOLLOW_NAMES: &[&str] = &["DriverEntry", "_DriverEntry@8", "GsDriverEntry"];

pub const DEFAULT_WDF_HEADER: &str = "kmdf_re/code/WDFStructs.h";

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Tunables of the propagation engine. Every field has a default, so partial config files work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub target_apis: Vec<String>,
    pub helper_names: Vec<String>,
    pub follow_names: Vec<String>,
    /// Do not enter functions whose names came from the remote signature service.
    pub skip_lumina_functions: bool,
    /// Soft budget for the table-reference sweep, in seconds.
    pub wdf_sweep_timeout_secs: u64,
    pub rename_retries: usize,
    pub max_name_len: usize,
    pub context_lines: usize,
    /// Type definitions for the framework structures, parsed when the bind import is seen.
    pub wdf_header_path: String,
    /// Record per-use debug-wrapper flags during the sweep instead of names only.
    pub wdf_call_context: bool,
    /// Flagged uses must exceed this count, on top of being a majority, for a debug-build verdict.
    pub debug_wrapper_min_uses: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            target_apis: strings(DEFAULT_TARGET_APIS),
            helper_names: strings(DEFAULT_HELPER_NAMES),
            follow_names: strings(DEFAULT_FOLLOW_NAMES),
            skip_lumina_functions: false,
            wdf_sweep_timeout_secs: 120,
            rename_retries: 10,
            max_name_len: 64,
            context_lines: 10,
            wdf_header_path: DEFAULT_WDF_HEADER.to_string(),
            wdf_call_context: true,
            debug_wrapper_min_uses: 0,
        }
    }
}

impl EngineConfig {
    pub fn wdf_sweep_timeout(&self) -> Duration {
        Duration::from_secs(self.wdf_sweep_timeout_secs)
    }

    pub fn is_target_api(&self, name: &str) -> bool {
        self.target_apis.iter().any(|t| t == name)
    }

    pub fn is_helper(&self, name: &str) -> bool {
        self.helper_names.iter().any(|h| h == name)
    }

    pub fn is_follow_name(&self, name: &str) -> bool {
        self.follow_names.iter().any(|f| f == name)
    }
}

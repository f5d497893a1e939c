//! Decompiler oracle backends.
//!
//! The analysis never disassembles or decompiles on its own. Everything it knows about a
//! driver comes through [`DecompilerOracle`]: typed expression trees, symbol and type
//! databases, and cross-reference queries for one binary at a time.
//!
//! Backends:
//! - [`fixture::FixtureOracle`]: an exported database held in memory (JSON on disk)

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CFunc, TypeInfo};

pub mod fixture;

pub use fixture::{
    FixtureDatabase, FixtureError, FixtureMember, FixtureOracle, FixtureStruct, OracleJournal,
};

/// Decompilation of a single function failed. Always recoverable for the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("decompilation of {ea:#x} failed: {reason}")]
pub struct DecompileFailure {
    pub ea: u64,
    pub reason: String,
}

impl DecompileFailure {
    pub fn new(ea: u64, reason: impl Into<String>) -> Self {
        Self { ea, reason: reason.into() }
    }
}

/// Function attributes the walk uses to decide whether a callee is worth entering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionFlags {
    #[serde(default)]
    pub library: bool,
    #[serde(default)]
    pub thunk: bool,
    /// Name was recovered from a remote signature service.
    #[serde(default)]
    pub lumina: bool,
}

/// Everything the analysis asks of the host decompiler.
///
/// Mutating calls report success as `bool`; failures are logged by the caller and never
/// abort an analysis.
pub trait DecompilerOracle {
    /// Human-readable backend name.
    fn name(&self) -> &str;

    fn processor_name(&self) -> String;
    fn is_64bit(&self) -> bool;
    fn entry_point(&self) -> u64;
    fn input_file_name(&self) -> String;
    fn load_decompiler_plugin(&mut self, plugin: &str) -> bool;
    fn wait_for_auto_analysis(&mut self) {}
    fn enable_demangled_names(&mut self) {}

    fn decompile(&mut self, ea: u64) -> Result<CFunc, DecompileFailure>;

    fn name_at(&self, ea: u64) -> Option<String>;
    fn demangle(&self, _name: &str) -> Option<String> {
        None
    }
    fn force_name(&mut self, ea: u64, name: &str) -> bool;

    /// Parse `decl` as a C declaration and apply it at `ea`.
    fn apply_type(&mut self, ea: u64, decl: &str) -> bool;
    /// Override the callee type the decompiler assumes for one call site.
    fn set_call_type(&mut self, call_ea: u64, decl: &str) -> bool;
    fn rename_variable(&mut self, func_ea: u64, old_name: &str, new_name: &str) -> bool;
    fn set_variable_type(&mut self, func_ea: u64, var_name: &str, ty: &TypeInfo) -> bool;
    /// Force the active member of the union selected by the expression at `expr_ea`.
    fn set_union_selection(&mut self, func_ea: u64, expr_ea: u64, member: u64) -> bool;

    fn import_type_library(&mut self, name: &str) -> bool;
    fn import_type(&mut self, name: &str) -> bool;
    fn parse_type_file(&mut self, path: &str) -> bool;
    fn member_name(&self, struct_name: &str, offset: u64) -> Option<String>;
    fn member_type(&self, struct_name: &str, offset: u64) -> Option<TypeInfo>;
    fn set_member_type(&mut self, struct_name: &str, offset: u64, decl: &str) -> bool;
    fn type_size(&self, ty: &TypeInfo) -> Option<u64>;
    fn type_at(&self, ea: u64) -> Option<TypeInfo>;
    fn undefine(&mut self, ea: u64);

    fn function_start(&self, ea: u64) -> Option<u64>;
    fn function_flags(&self, ea: u64) -> FunctionFlags;
    fn xrefs_to(&self, ea: u64) -> Vec<u64>;
    fn data_refs_to(&self, ea: u64) -> Vec<u64>;
    fn code_refs_to(&self, ea: u64) -> Vec<u64>;
    /// Data items typed as the named structure.
    fn type_refs(&self, type_name: &str) -> Vec<u64>;
    fn data_at(&self, ea: u64, width: usize) -> Option<u64>;
}

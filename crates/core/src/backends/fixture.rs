use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backends::{DecompileFailure, DecompilerOracle, FunctionFlags};
use crate::model::{CFunc, TypeInfo};

#[derive(Debug, Error)]
pub enum FixtureError {
    #[error("failed to read fixture database {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse fixture database {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureMember {
    pub name: String,
    #[serde(default)]
    pub ty: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixtureStruct {
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub members: BTreeMap<u64, FixtureMember>,
}

/// Exported decompiler database for one driver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FixtureDatabase {
    pub file_name: String,
    pub processor: String,
    pub is_64bit: bool,
    pub entry_point: u64,
    /// Decompiler plugins that load successfully.
    pub plugins: Vec<String>,
    /// Loadable type libraries; empty means every library loads.
    pub type_libraries: Vec<String>,
    pub names: BTreeMap<u64, String>,
    pub demangled: BTreeMap<String, String>,
    pub functions: Vec<CFunc>,
    pub function_flags: BTreeMap<u64, FunctionFlags>,
    pub undecompilable: BTreeSet<u64>,
    pub xrefs: BTreeMap<u64, Vec<u64>>,
    pub data_refs: BTreeMap<u64, Vec<u64>>,
    pub code_refs: BTreeMap<u64, Vec<u64>>,
    pub type_refs: BTreeMap<String, Vec<u64>>,
    pub data: BTreeMap<u64, u64>,
    pub types: BTreeMap<u64, String>,
    pub structs: BTreeMap<String, FixtureStruct>,
}

impl Default for FixtureDatabase {
    fn default() -> Self {
        Self {
            file_name: "driver.sys".to_string(),
            processor: "metapc".to_string(),
            is_64bit: true,
            entry_point: 0,
            plugins: ["hexrays", "hexx64", "hexarm", "hexarm64"]
                .into_iter()
                .map(String::from)
                .collect(),
            type_libraries: Vec::new(),
            names: BTreeMap::new(),
            demangled: BTreeMap::new(),
            functions: Vec::new(),
            function_flags: BTreeMap::new(),
            undecompilable: BTreeSet::new(),
            xrefs: BTreeMap::new(),
            data_refs: BTreeMap::new(),
            code_refs: BTreeMap::new(),
            type_refs: BTreeMap::new(),
            data: BTreeMap::new(),
            types: BTreeMap::new(),
            structs: BTreeMap::new(),
        }
    }
}

impl FixtureDatabase {
    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        let body = fs::read_to_string(path)
            .map_err(|source| FixtureError::Io { path: path.to_path_buf(), source })?;
        serde_json::from_str(&body)
            .map_err(|source| FixtureError::Parse { path: path.to_path_buf(), source })
    }
}

/// Every mutation the analysis asked for, in order of arrival.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OracleJournal {
    pub loaded_plugins: Vec<String>,
    pub forced_names: Vec<(u64, String)>,
    pub applied_types: Vec<(u64, String)>,
    pub call_types: Vec<(u64, String)>,
    pub renames: Vec<(u64, String, String)>,
    pub variable_types: Vec<(u64, String, String)>,
    pub union_selections: Vec<(u64, u64)>,
    pub type_libraries: Vec<String>,
    pub imported_types: Vec<String>,
    pub parsed_type_files: Vec<String>,
    pub member_types: Vec<(String, u64, String)>,
    pub undefined: Vec<u64>,
    pub decompiled: Vec<u64>,
}

/// In-memory oracle over a [`FixtureDatabase`]. Mutations are applied to the database so a
/// later `decompile` observes earlier renames and retypes.
#[derive(Debug, Clone)]
pub struct FixtureOracle {
    db: FixtureDatabase,
    extents: Vec<(u64, u64, usize)>,
    journal: OracleJournal,
}

impl FixtureOracle {
    pub fn new(db: FixtureDatabase) -> Self {
        let extents = db
            .functions
            .iter()
            .enumerate()
            .map(|(idx, func)| {
                let mut addrs = vec![func.entry];
                func.body.addresses(&mut addrs);
                addrs.extend(func.pseudocode.iter().filter_map(|l| l.ea));
                let lo = addrs.iter().copied().min().unwrap_or(func.entry);
                let hi = addrs.iter().copied().max().unwrap_or(func.entry);
                (lo, hi, idx)
            })
            .collect();
        Self { db, extents, journal: OracleJournal::default() }
    }

    pub fn load(path: &Path) -> Result<Self, FixtureError> {
        FixtureDatabase::load(path).map(Self::new)
    }

    pub fn database(&self) -> &FixtureDatabase {
        &self.db
    }

    pub fn journal(&self) -> &OracleJournal {
        &self.journal
    }

    /// Variables of the function starting at `entry`, as currently stored.
    pub fn variables(&self, entry: u64) -> Option<&[crate::model::LocalVar]> {
        self.db.functions.iter().find(|f| f.entry == entry).map(|f| f.vars.as_slice())
    }

    fn function_index(&self, ea: u64) -> Option<usize> {
        if let Some(idx) = self.db.functions.iter().position(|f| f.entry == ea) {
            return Some(idx);
        }
        self.extents
            .iter()
            .filter(|(lo, hi, _)| *lo <= ea && ea <= *hi)
            .min_by_key(|(lo, hi, _)| hi - lo)
            .map(|(_, _, idx)| *idx)
    }

    fn lookup_struct(&self, name: &str) -> Option<&FixtureStruct> {
        let bare = TypeInfo::new(name).type_name();
        let trimmed = bare.trim_start_matches('_');
        self.db
            .structs
            .get(bare.as_str())
            .or_else(|| self.db.structs.get(trimmed))
            .or_else(|| self.db.structs.get(&format!("_{trimmed}")))
    }

    fn apply_prototype_to_args(&mut self, ea: u64, decl: &str) {
        let (Some(open), Some(close)) = (decl.find('('), decl.rfind(')')) else {
            return;
        };
        if close <= open {
            return;
        }
        let Some(idx) = self.db.functions.iter().position(|f| f.entry == ea) else {
            return;
        };
        let params: Vec<&str> = decl[open + 1..close].split(',').map(str::trim).collect();
        let func = &mut self.db.functions[idx];
        let arg_slots: Vec<usize> =
            func.vars.iter().enumerate().filter(|(_, v)| v.is_arg).map(|(i, _)| i).collect();
        for (param, slot) in params.iter().zip(arg_slots) {
            let split = param
                .rfind(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .map(|pos| pos + 1)
                .unwrap_or(0);
            let (ty, name) = param.split_at(split);
            if name.is_empty() || ty.trim().is_empty() {
                continue;
            }
            let clash = func.vars.iter().enumerate().any(|(i, v)| i != slot && v.name == name);
            let var = &mut func.vars[slot];
            var.ty = TypeInfo::new(ty.trim());
            if !clash {
                var.name = name.to_string();
            }
        }
    }
}

fn primitive_size(name: &str, is_64bit: bool) -> Option<u64> {
    let size = match name {
        "char" | "unsigned char" | "_BYTE" | "UCHAR" | "BYTE" | "BOOLEAN" | "__int8"
        | "unsigned __int8" => 1,
        "short" | "unsigned short" | "_WORD" | "USHORT" | "WORD" | "__int16" | "unsigned __int16"
        | "wchar_t" => 2,
        "int" | "unsigned int" | "_DWORD" | "ULONG" | "LONG" | "DWORD" | "NTSTATUS" | "__int32"
        | "unsigned __int32" => 4,
        "__int64" | "unsigned __int64" | "_QWORD" | "ULONG64" | "ULONGLONG" | "LONGLONG"
        | "PHYSICAL_ADDRESS" | "LARGE_INTEGER" => 8,
        "PVOID" | "SIZE_T" | "size_t" | "HANDLE" | "ULONG_PTR" => {
            if is_64bit {
                8
            } else {
                4
            }
        }
        _ => return None,
    };
    Some(size)
}

impl DecompilerOracle for FixtureOracle {
    fn name(&self) -> &str {
        "fixture"
    }

    fn processor_name(&self) -> String {
        self.db.processor.clone()
    }

    fn is_64bit(&self) -> bool {
        self.db.is_64bit
    }

    fn entry_point(&self) -> u64 {
        self.db.entry_point
    }

    fn input_file_name(&self) -> String {
        self.db.file_name.clone()
    }

    fn load_decompiler_plugin(&mut self, plugin: &str) -> bool {
        if self.db.plugins.iter().any(|p| p == plugin) {
            self.journal.loaded_plugins.push(plugin.to_string());
            true
        } else {
            false
        }
    }

    fn decompile(&mut self, ea: u64) -> Result<CFunc, DecompileFailure> {
        let idx = self
            .function_index(ea)
            .ok_or_else(|| DecompileFailure::new(ea, "address is not inside a function"))?;
        let func = &self.db.functions[idx];
        if self.db.undecompilable.contains(&func.entry) {
            return Err(DecompileFailure::new(ea, "decompiler gave up"));
        }
        self.journal.decompiled.push(func.entry);
        Ok(func.clone())
    }

    fn name_at(&self, ea: u64) -> Option<String> {
        if let Some(name) = self.db.names.get(&ea) {
            return Some(name.clone());
        }
        self.db.functions.iter().any(|f| f.entry == ea).then(|| format!("sub_{ea:X}"))
    }

    fn demangle(&self, name: &str) -> Option<String> {
        self.db.demangled.get(name).cloned()
    }

    fn force_name(&mut self, ea: u64, name: &str) -> bool {
        if name.is_empty() {
            return false;
        }
        let taken = |db: &FixtureDatabase, candidate: &str| {
            db.names.iter().any(|(other, n)| *other != ea && n == candidate)
        };
        let mut candidate = name.to_string();
        let mut suffix = 0;
        while taken(&self.db, &candidate) {
            suffix += 1;
            candidate = format!("{name}_{suffix}");
        }
        self.db.names.insert(ea, candidate.clone());
        self.journal.forced_names.push((ea, candidate));
        true
    }

    fn apply_type(&mut self, ea: u64, decl: &str) -> bool {
        let decl = decl.trim().trim_end_matches(';').trim();
        if decl.is_empty() {
            return false;
        }
        self.apply_prototype_to_args(ea, decl);
        self.db.types.insert(ea, decl.to_string());
        self.journal.applied_types.push((ea, decl.to_string()));
        true
    }

    fn set_call_type(&mut self, call_ea: u64, decl: &str) -> bool {
        if decl.trim().is_empty() {
            return false;
        }
        self.journal.call_types.push((call_ea, decl.to_string()));
        true
    }

    fn rename_variable(&mut self, func_ea: u64, old_name: &str, new_name: &str) -> bool {
        let Some(func) = self.db.functions.iter_mut().find(|f| f.entry == func_ea) else {
            return false;
        };
        let Some(slot) = func.vars.iter().position(|v| v.name == old_name) else {
            return false;
        };
        if old_name == new_name {
            return true;
        }
        if func.vars.iter().enumerate().any(|(i, v)| i != slot && v.name == new_name) {
            return false;
        }
        let var = &mut func.vars[slot];
        var.name = new_name.to_string();
        var.has_user_name = true;
        self.journal.renames.push((func_ea, old_name.to_string(), new_name.to_string()));
        true
    }

    fn set_variable_type(&mut self, func_ea: u64, var_name: &str, ty: &TypeInfo) -> bool {
        let Some(func) = self.db.functions.iter_mut().find(|f| f.entry == func_ea) else {
            return false;
        };
        let Some(var) = func.vars.iter_mut().find(|v| v.name == var_name) else {
            return false;
        };
        var.ty = ty.clone();
        self.journal.variable_types.push((func_ea, var_name.to_string(), ty.to_string()));
        true
    }

    fn set_union_selection(&mut self, _func_ea: u64, expr_ea: u64, member: u64) -> bool {
        self.journal.union_selections.push((expr_ea, member));
        true
    }

    fn import_type_library(&mut self, name: &str) -> bool {
        let ok = self.db.type_libraries.is_empty()
            || self.db.type_libraries.iter().any(|l| l.eq_ignore_ascii_case(name));
        if ok {
            self.journal.type_libraries.push(name.to_string());
        }
        ok
    }

    fn import_type(&mut self, name: &str) -> bool {
        let ok = self.lookup_struct(name).is_some();
        if ok {
            self.journal.imported_types.push(name.to_string());
        }
        ok
    }

    fn parse_type_file(&mut self, path: &str) -> bool {
        self.journal.parsed_type_files.push(path.to_string());
        true
    }

    fn member_name(&self, struct_name: &str, offset: u64) -> Option<String> {
        self.lookup_struct(struct_name)?.members.get(&offset).map(|m| m.name.clone())
    }

    fn member_type(&self, struct_name: &str, offset: u64) -> Option<TypeInfo> {
        self.lookup_struct(struct_name)?
            .members
            .get(&offset)
            .filter(|m| !m.ty.is_empty())
            .map(|m| TypeInfo::new(m.ty.clone()))
    }

    fn set_member_type(&mut self, struct_name: &str, offset: u64, decl: &str) -> bool {
        if decl.trim().is_empty() {
            return false;
        }
        let entry = self.db.structs.entry(struct_name.to_string()).or_default();
        let member = entry.members.entry(offset).or_default();
        member.ty = decl.to_string();
        self.journal.member_types.push((struct_name.to_string(), offset, decl.to_string()));
        true
    }

    fn type_size(&self, ty: &TypeInfo) -> Option<u64> {
        if ty.is_pointer() {
            return Some(if self.db.is_64bit { 8 } else { 4 });
        }
        let name = ty.type_name();
        primitive_size(&name, self.db.is_64bit)
            .or_else(|| self.lookup_struct(&name).map(|s| s.size).filter(|s| *s > 0))
    }

    fn type_at(&self, ea: u64) -> Option<TypeInfo> {
        self.db.types.get(&ea).map(|t| TypeInfo::new(t.clone()))
    }

    fn undefine(&mut self, ea: u64) {
        self.journal.undefined.push(ea);
    }

    fn function_start(&self, ea: u64) -> Option<u64> {
        self.function_index(ea).map(|idx| self.db.functions[idx].entry)
    }

    fn function_flags(&self, ea: u64) -> FunctionFlags {
        self.db.function_flags.get(&ea).copied().unwrap_or_default()
    }

    fn xrefs_to(&self, ea: u64) -> Vec<u64> {
        self.db.xrefs.get(&ea).cloned().unwrap_or_default()
    }

    fn data_refs_to(&self, ea: u64) -> Vec<u64> {
        self.db.data_refs.get(&ea).cloned().unwrap_or_default()
    }

    fn code_refs_to(&self, ea: u64) -> Vec<u64> {
        self.db.code_refs.get(&ea).cloned().unwrap_or_default()
    }

    fn type_refs(&self, type_name: &str) -> Vec<u64> {
        self.db.type_refs.get(type_name).cloned().unwrap_or_default()
    }

    fn data_at(&self, ea: u64, width: usize) -> Option<u64> {
        let value = *self.db.data.get(&ea)?;
        Some(match width {
            1 => value & 0xFF,
            2 => value & 0xFFFF,
            4 => value & 0xFFFF_FFFF,
            _ => value,
        })
    }
}

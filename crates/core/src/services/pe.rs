//! Static PE header probe for driver files.

use std::path::Path;

use goblin::{pe, Object};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backends::FixtureDatabase;

#[derive(Debug, Error)]
pub enum PeError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse PE image: {0}")]
    Parse(String),
    #[error("not a PE image")]
    NotPe,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeImport {
    pub dll: String,
    pub name: String,
}

/// What the headers tell about a driver before any decompilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeSummary {
    pub machine: String,
    pub is_64bit: bool,
    pub image_base: u64,
    /// Absolute address of the entry point.
    pub entry_point: u64,
    pub imports: Vec<PeImport>,
    /// Imported names that are also target APIs.
    pub target_imports: Vec<String>,
}

impl PeSummary {
    /// Decompiler processor module name for the machine type.
    pub fn processor(&self) -> &'static str {
        match self.machine.as_str() {
            "arm" | "arm64" => "arm",
            _ => "metapc",
        }
    }

    /// Copy the environment facts into a fixture database.
    pub fn apply_to(&self, db: &mut FixtureDatabase) {
        db.processor = self.processor().to_string();
        db.is_64bit = self.is_64bit;
        if db.entry_point == 0 {
            db.entry_point = self.entry_point;
        }
    }
}

pub fn probe_pe(path: &Path, target_apis: &[String]) -> Result<PeSummary, PeError> {
    let bytes = std::fs::read(path)
        .map_err(|source| PeError::Io { path: path.display().to_string(), source })?;
    probe_pe_bytes(&bytes, target_apis)
}

pub fn probe_pe_bytes(bytes: &[u8], target_apis: &[String]) -> Result<PeSummary, PeError> {
    let pe = match Object::parse(bytes) {
        Ok(Object::PE(pe)) => pe,
        Ok(_) => return Err(PeError::NotPe),
        Err(err) => return Err(PeError::Parse(err.to_string())),
    };

    let machine = match pe.header.coff_header.machine {
        pe::header::COFF_MACHINE_X86 => "x86",
        pe::header::COFF_MACHINE_X86_64 => "x86_64",
        pe::header::COFF_MACHINE_ARM => "arm",
        pe::header::COFF_MACHINE_ARM64 => "arm64",
        _ => "unknown",
    };
    let imports: Vec<PeImport> = pe
        .imports
        .iter()
        .map(|import| PeImport { dll: import.dll.to_string(), name: import.name.to_string() })
        .collect();
    let mut target_imports: Vec<String> = imports
        .iter()
        .filter(|import| target_apis.iter().any(|api| *api == import.name))
        .map(|import| import.name.clone())
        .collect();
    target_imports.sort();
    target_imports.dedup();

    let image_base = pe.image_base as u64;
    Ok(PeSummary {
        machine: machine.to_string(),
        is_64bit: pe.is_64,
        image_base,
        entry_point: image_base + pe.entry as u64,
        imports,
        target_imports,
    })
}

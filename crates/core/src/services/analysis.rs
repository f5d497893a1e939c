use std::collections::HashMap;
use std::path::Path;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::analysis::comparisons::search_all_comparisons;
use crate::analysis::{build_function_tree, walk_cfunc, AnalysisSession, Arch, EngineConfig, PropagationError};
use crate::backends::DecompilerOracle;
use crate::model::{AnalysisResult, CFunc, HandlerKind, PathRecord, PathReport, StatusCode};

const ARM64_TYPE_LIBRARIES: &[&str] = &["NTAPI_win10_ARM64", "NTDDK_win10_ARM64", "NTWDF_win10_ARM64"];
const IRP_STRUCTS: &[&str] = &["IO_STACK_LOCATION", "IRP"];
const GS_DRIVER_ENTRY_DECL: &str =
    "NTSTATUS __fastcall GsDriverEntry(_DRIVER_OBJECT *DriverObject, _UNICODE_STRING *RegistryPath);";

#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error("decompiler unavailable: {0}")]
    EnvironmentFailure(String),
    #[error("unsupported WDF version: {0}")]
    WdfVersionUnsupported(String),
    #[error("WDF internals unrecoverable: {0}")]
    WdfVersionUnrecoverable(#[from] PropagationError),
}

impl AnalysisError {
    pub fn status(&self) -> StatusCode {
        match self {
            AnalysisError::EnvironmentFailure(_) => StatusCode::DecompilerUnavailable,
            AnalysisError::WdfVersionUnsupported(_) => StatusCode::WdfVersionUnsupported,
            AnalysisError::WdfVersionUnrecoverable(_) => StatusCode::WdfVersionUnrecoverable,
        }
    }

    pub fn exit_code(&self) -> i32 {
        self.status().code()
    }
}

/// Decompiler plugin for a processor family, 32- or 64-bit.
pub fn decompiler_plugin(processor: &str, is_64bit: bool) -> Option<&'static str> {
    let processor = processor.to_ascii_lowercase();
    let (plugin32, plugin64) = if processor.contains("arm") {
        ("hexarm", "hexarm64")
    } else if processor.contains("ppc") {
        ("hexppc", "hexppc64")
    } else if processor.contains("mips") {
        ("hexmips", "hexmips64")
    } else if processor.contains("pc") || processor.contains("386") || processor.contains("x86") {
        ("hexrays", "hexx64")
    } else {
        return None;
    };
    Some(if is_64bit { plugin64 } else { plugin32 })
}

/// Runs the whole pipeline for the driver loaded in `oracle`.
pub struct DriverAnalyzer<'a> {
    oracle: &'a mut dyn DecompilerOracle,
    config: EngineConfig,
    batch_mode: bool,
}

impl<'a> DriverAnalyzer<'a> {
    pub fn new(oracle: &'a mut dyn DecompilerOracle, config: EngineConfig) -> Self {
        Self { oracle, config, batch_mode: false }
    }

    /// In batch mode the decompiler plugin has to be loaded explicitly.
    pub fn batch_mode(mut self, enabled: bool) -> Self {
        self.batch_mode = enabled;
        self
    }

    pub fn run(&mut self) -> Result<AnalysisResult, AnalysisError> {
        self.oracle.wait_for_auto_analysis();
        if self.batch_mode {
            self.load_plugin()?;
        }
        self.oracle.enable_demangled_names();

        let arch = self.prepare_architecture();
        for name in IRP_STRUCTS {
            if !self.oracle.import_type(name) {
                tracing::error!(r#struct = name, "failed to import kernel structure");
            }
        }

        let mut session = AnalysisSession::new(arch, self.config.clone());
        let entry = self.oracle.entry_point();
        let Some(mut cfunc) = self.decompile_entry(entry) else {
            return Ok(AnalysisResult::failed(StatusCode::from_findings(0, 0).code()));
        };

        walk_cfunc(&mut session, self.oracle, &mut cfunc, vec![entry])?;
        if session.handlers().is_empty() && session.old_kmdf_version {
            tracing::info!("no handler in an old KMDF driver, walking again");
            session.reset_for_retry();
            if let Some(mut cfunc) = self.decompile_entry(entry) {
                walk_cfunc(&mut session, self.oracle, &mut cfunc, vec![entry])?;
            }
        }

        Ok(self.collect(&session))
    }

    fn load_plugin(&mut self) -> Result<(), AnalysisError> {
        let processor = self.oracle.processor_name();
        let is_64bit = self.oracle.is_64bit();
        let plugin = decompiler_plugin(&processor, is_64bit).ok_or_else(|| {
            AnalysisError::EnvironmentFailure(format!("no decompiler for processor `{processor}`"))
        })?;
        if !self.oracle.load_decompiler_plugin(plugin) {
            return Err(AnalysisError::EnvironmentFailure(format!("failed to load `{plugin}`")));
        }
        tracing::info!(plugin, %processor, "decompiler loaded");
        Ok(())
    }

    fn prepare_architecture(&mut self) -> Arch {
        let processor = self.oracle.processor_name().to_ascii_lowercase();
        // Any ARM processor module takes the ARM64 route; 32-bit ARM drivers share its shapes.
        if !processor.contains("arm") {
            return Arch::X64;
        }
        for library in ARM64_TYPE_LIBRARIES {
            if !self.oracle.import_type_library(library) {
                tracing::error!(library, "failed to load type library");
            }
        }
        let entry = self.oracle.entry_point();
        let entry_name = self.oracle.name_at(entry).unwrap_or_default();
        if entry_name.contains("start") {
            if !self.oracle.force_name(entry, "DriverEntry") {
                tracing::error!(entry = format_args!("{entry:#x}"), "failed to name ARM64 entry stub");
            }
            if !self.oracle.apply_type(entry, GS_DRIVER_ENTRY_DECL) {
                tracing::error!(entry = format_args!("{entry:#x}"), "failed to type ARM64 entry stub");
            }
        }
        Arch::Arm64
    }

    fn decompile_entry(&mut self, entry: u64) -> Option<CFunc> {
        match self.oracle.decompile(entry) {
            Ok(cfunc) => Some(cfunc),
            Err(err) => {
                tracing::error!(%err, "entry point could not be decompiled");
                None
            }
        }
    }

    fn collect(&mut self, session: &AnalysisSession) -> AnalysisResult {
        let handlers = session.handler_addresses();
        let target_paths: Vec<PathRecord> = session.target_paths().iter().cloned().collect();
        let helper_paths: Vec<PathRecord> = session.helper_paths().iter().cloned().collect();
        let status = StatusCode::from_findings(handlers.len(), target_paths.len() + helper_paths.len());

        let ioctl_comp = search_all_comparisons(self.oracle, session.comparison_locations());
        let mut contexts = ContextCache::default();
        let target_paths = target_paths
            .into_iter()
            .map(|p| contexts.report(self.oracle, p, self.config.context_lines))
            .collect();
        let helper_paths = helper_paths
            .into_iter()
            .map(|p| contexts.report(self.oracle, p, self.config.context_lines))
            .collect::<Vec<_>>();

        let mut function_trees = Vec::with_capacity(handlers.len());
        let mut combined_sub_functions = 0;
        let all_paths: Vec<&PathRecord> =
            session.target_paths().iter().chain(session.helper_paths().iter()).collect();
        for handler in &handlers {
            let name = self.oracle.name_at(*handler);
            let tree = build_function_tree(*handler, all_paths.iter().copied(), name.as_deref());
            combined_sub_functions += tree.combined_subfunctions();
            function_trees.push(tree.to_string());
        }

        let result = AnalysisResult {
            ret_code: status.code(),
            handler_type: if handlers.is_empty() { HandlerKind::Unknown } else { session.handler_kind() },
            handler_addrs: handlers,
            target_paths,
            helper_paths,
            wdf_functions: session.wdf_functions().iter().cloned().collect(),
            wdf_debug_wrapper_count: session.debug_wrapper_count(),
            wdf_debug_build: session.looks_like_debug_build(),
            ioctl_comp: ioctl_comp.into_iter().collect(),
            function_trees,
            combined_sub_functions,
            analysis_log: None,
        };
        tracing::info!(
            ret_code = result.ret_code,
            handlers = result.handler_addrs.len(),
            target_paths = result.target_paths.len(),
            helper_paths = result.helper_paths.len(),
            comparisons = result.ioctl_comp.len(),
            "analysis finished"
        );
        result
    }
}

/// Decompiled functions reused while rendering path contexts.
#[derive(Default)]
struct ContextCache {
    functions: HashMap<u64, Option<CFunc>>,
}

impl ContextCache {
    fn report(&mut self, oracle: &mut dyn DecompilerOracle, record: PathRecord, lines: usize) -> PathReport {
        let context = record.target().and_then(|site| {
            let func = oracle.function_start(site)?;
            let cfunc = self.functions.entry(func).or_insert_with(|| oracle.decompile(func).ok());
            cfunc.as_ref()?.context_window(site, lines)
        });
        PathReport { path: record.path, name: record.name, context }
    }
}

/// Map an analysis outcome to the result that is written to disk.
pub fn finish_result(outcome: Result<AnalysisResult, AnalysisError>) -> AnalysisResult {
    match outcome {
        Ok(result) => result,
        Err(err) => {
            tracing::error!(%err, "analysis aborted");
            AnalysisResult::failed(err.exit_code())
        }
    }
}

pub fn write_result_file(path: &Path, result: &AnalysisResult) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let body = serde_json::to_string_pretty(result).context("Failed to serialize result")?;
    std::fs::write(path, body).with_context(|| format!("Failed to write result file {}", path.display()))
}

pub fn read_result_file(path: &Path) -> Result<AnalysisResult> {
    let body = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read result file {}", path.display()))?;
    serde_json::from_str(&body).with_context(|| format!("Failed to parse result file {}", path.display()))
}

//! KMDF handler discovery.
//!
//! Once `WdfVersionBind` is reached, the bind info names the driver's copy of the framework
//! function table. From there the queue-create slot leads to the `WDF_IO_QUEUE_CONFIG` whose
//! `EvtIoDeviceControl` member is the IOCTL handler. A bounded sweep over every table reference
//! then collects which framework functions the driver uses.

use std::convert::Infallible;
use std::time::Instant;

use crate::analysis::naming::{force_rename_var, search_local_var, set_var_type};
use crate::analysis::propagate::PropagationError;
use crate::analysis::session::{AnalysisSession, WdfBinding};
use crate::analysis::wdf_table::{
    WdfFunctionTable, WdfTableLayout, WdfVersion, BIND_INFO_FUNC_TABLE_OFFSET,
    BIND_INFO_VERSION_OFFSET, BUFFER_SLOTS, DECL_IO_QUEUE_CREATE_CALL,
    DECL_IO_QUEUE_CREATE_WRAPPER, IO_DEVICE_CONTROL_OFFSET, IO_QUEUE_CONFIG_ARG,
    IO_QUEUE_CREATE_ARGC, IO_QUEUE_CREATE_OFFSET, WDF_BIND_INFO_STRUCT, WDF_FUNCTIONS_GLOBAL,
    WDF_FUNCTIONS_STRUCT,
};
use crate::analysis::wdf_usage::{is_wdf_table_expr, run_usage_finder};
use crate::backends::DecompilerOracle;
use crate::model::{
    walk_stmt, CtreeVisitor, Expr, ExprKind, HandlerKind, LocalVar, TypeInfo, VisitAction, BADADDR,
};

const WDF_HANDLER_NAME: &str = "fn_ioctl_handler_wdf";
const QUEUE_CREATE_WRAPPER_NAME: &str = "fn_WdfIoQueueCreate";
const BIND_INFO_ARG: usize = 2;
const BIND_CALL_ARGC: usize = 4;
/// A function is re-decompiled at most this many times while looking for the handler.
const MAX_QUEUE_PASSES: usize = 3;

/// Locate `_WDF_BIND_INFO`, set up the function table and return the IOCTL handler, if any.
///
/// Fails only when no reference to the bind info can be recovered at all.
pub fn detect_wdf_handler(
    session: &mut AnalysisSession,
    oracle: &mut dyn DecompilerOracle,
    bind_call: Option<&Expr>,
) -> Result<Option<u64>, PropagationError> {
    oracle.wait_for_auto_analysis();

    let bind_info = locate_bind_info(&*oracle, bind_call)?;
    let binding = read_binding(&*oracle, bind_info)?;
    tracing::info!(
        bind_info = format_args!("{bind_info:#x}"),
        table = format_args!("{:#x}", binding.table),
        version = %binding.version,
        layout = ?binding.layout,
        "KMDF function table located"
    );
    prepare_table(oracle, &binding);
    session.wdf = Some(binding);

    let handler = find_queue_handler(session, oracle, &binding);
    match handler {
        Some(h) => tracing::info!(handler = format_args!("{h:#x}"), "WDF IOCTL handler found"),
        None => tracing::warn!("no WDF IOCTL handler found"),
    }

    sweep_table_usage(session, oracle, &binding);
    Ok(handler)
}

fn locate_bind_info(
    oracle: &dyn DecompilerOracle,
    bind_call: Option<&Expr>,
) -> Result<u64, PropagationError> {
    let refs = oracle.type_refs(WDF_BIND_INFO_STRUCT);
    if let [only] = refs.as_slice() {
        return Ok(*only);
    }
    tracing::debug!(count = refs.len(), "no unique typed bind info, checking the bind call");

    let arg = bind_call.and_then(|call| match &call.kind {
        ExprKind::Call { args, .. } if args.len() == BIND_CALL_ARGC => args.get(BIND_INFO_ARG),
        _ => None,
    });
    let Some(arg) = arg else {
        return Err(PropagationError::MissingBindInfo);
    };
    if !(arg.ty.contains("PWDF_BIND_INFO") || arg.ty.contains("unknown") || arg.ty.is_empty()) {
        tracing::error!(ty = %arg.ty, "unexpected bind info argument type");
        return Err(PropagationError::MissingBindInfo);
    }
    let inner = match &arg.kind {
        ExprKind::Cast { x } => x.as_ref(),
        _ => arg,
    };
    let bind_info = match &inner.kind {
        ExprKind::Ref { x } => x.obj_ea(),
        _ => None,
    };
    bind_info.filter(|ea| *ea != BADADDR).ok_or(PropagationError::MissingBindInfo)
}

fn read_binding(oracle: &dyn DecompilerOracle, bind_info: u64) -> Result<WdfBinding, PropagationError> {
    let dword = |offset: u64| {
        oracle
            .data_at(bind_info + offset, 4)
            .map(|v| v as u32)
            .ok_or(PropagationError::UnreadableBindInfo(bind_info))
    };
    let version = WdfVersion {
        major: dword(BIND_INFO_VERSION_OFFSET)?,
        minor: dword(BIND_INFO_VERSION_OFFSET + 4)?,
        build: dword(BIND_INFO_VERSION_OFFSET + 8)?,
    };
    let table = oracle
        .data_at(bind_info + BIND_INFO_FUNC_TABLE_OFFSET, 8)
        .ok_or(PropagationError::UnreadableBindInfo(bind_info))?;
    Ok(WdfBinding { bind_info, table, version, layout: WdfTableLayout::for_version(&version) })
}

/// Type and name the table global, then give the buffer-returning slots their prototypes.
fn prepare_table(oracle: &mut dyn DecompilerOracle, binding: &WdfBinding) {
    oracle.undefine(binding.table);
    if !oracle.apply_type(binding.table, binding.layout.decl()) {
        tracing::error!(table = format_args!("{:#x}", binding.table), "failed to type the function table");
    }
    if !oracle.force_name(binding.table, WDF_FUNCTIONS_GLOBAL) {
        tracing::error!(table = format_args!("{:#x}", binding.table), "failed to name the function table");
    }
    if !oracle.import_type(WDF_FUNCTIONS_STRUCT) {
        tracing::error!(r#struct = WDF_FUNCTIONS_STRUCT, "failed to import table struct");
    }
    for slot in BUFFER_SLOTS {
        let pointer_decl = slot.decl.trim_end_matches(';');
        if !oracle.set_member_type(WDF_FUNCTIONS_STRUCT, slot.offset, pointer_decl) {
            tracing::warn!(slot = format_args!("{:#x}", slot.offset), "failed to type table member");
        }
    }
}

fn find_queue_handler(
    session: &mut AnalysisSession,
    oracle: &mut dyn DecompilerOracle,
    binding: &WdfBinding,
) -> Option<u64> {
    if binding.layout == WdfTableLayout::Direct {
        for site in oracle.data_refs_to(binding.table + IO_QUEUE_CREATE_OFFSET) {
            if let Some(handler) = run_queue_finder(session, oracle, site) {
                return Some(handler);
            }
        }
    }
    for site in oracle.xrefs_to(binding.table) {
        if let Some(handler) = run_queue_finder(session, oracle, site) {
            return Some(handler);
        }
    }
    None
}

/// Search the function containing `ea` for the queue-create call and its configuration.
pub fn run_queue_finder(
    session: &mut AnalysisSession,
    oracle: &mut dyn DecompilerOracle,
    ea: u64,
) -> Option<u64> {
    let func = oracle.function_start(ea)?;
    if !session.begin_queue_search(func) {
        return None;
    }

    for pass in 0..MAX_QUEUE_PASSES {
        let mut cfunc = match oracle.decompile(func) {
            Ok(cfunc) => cfunc,
            Err(err) => {
                tracing::debug!(%err, "queue search skipped");
                return None;
            }
        };
        let outcome = {
            let mut finder = QueueCreateFinder {
                session: &mut *session,
                oracle: &mut *oracle,
                func_ea: func,
                vars: &mut cfunc.vars,
                outcome: QueueSearch::default(),
            };
            let _ = walk_stmt(&cfunc.body, &mut finder);
            finder.outcome
        };

        if outcome.handler.is_some() {
            return outcome.handler;
        }
        if outcome.config_is_param {
            return retry_in_callers(session, oracle, func);
        }
        if !outcome.config_typed && !outcome.call_retyped {
            break;
        }
        tracing::debug!(func = format_args!("{func:#x}"), pass, "re-decompiling after retype");
    }
    None
}

/// `func` forwards its caller's config to the queue-create slot: treat it as a wrapper.
fn retry_in_callers(
    session: &mut AnalysisSession,
    oracle: &mut dyn DecompilerOracle,
    func: u64,
) -> Option<u64> {
    tracing::info!(func = format_args!("{func:#x}"), "queue-create wrapper, searching callers");
    if !oracle.force_name(func, QUEUE_CREATE_WRAPPER_NAME) {
        tracing::error!(func = format_args!("{func:#x}"), "failed to name queue-create wrapper");
    }
    if !oracle.apply_type(func, DECL_IO_QUEUE_CREATE_WRAPPER) {
        tracing::error!(func = format_args!("{func:#x}"), "failed to type queue-create wrapper");
    }
    for caller in oracle.code_refs_to(func) {
        if let Some(handler) = run_queue_finder(session, oracle, caller) {
            return Some(handler);
        }
    }
    None
}

#[derive(Debug, Default, Clone, Copy)]
struct QueueSearch {
    handler: Option<u64>,
    /// The config variable was renamed and typed during this pass.
    config_typed: bool,
    /// The config variable is a parameter of the searched function.
    config_is_param: bool,
    /// The queue-create call was given a prototype during this pass.
    call_retyped: bool,
}

struct QueueCreateFinder<'s, 'f> {
    session: &'s mut AnalysisSession,
    oracle: &'s mut dyn DecompilerOracle,
    func_ea: u64,
    vars: &'f mut Vec<LocalVar>,
    outcome: QueueSearch,
}

impl QueueCreateFinder<'_, '_> {
    fn is_queue_create_slot(&self, target: &Expr) -> bool {
        match &target.kind {
            ExprKind::MemPtr { x, offset } | ExprKind::MemRef { x, offset } => {
                *offset == IO_QUEUE_CREATE_OFFSET && is_wdf_table_expr(&*self.oracle, x)
            }
            ExprKind::Add { x, y } => {
                y.num_value() == Some(IO_QUEUE_CREATE_OFFSET) && is_wdf_table_expr(&*self.oracle, x)
            }
            _ => false,
        }
    }

    fn on_queue_create(&mut self, call: &Expr, args: &[Expr]) {
        if self.session.queue_create_seen(call.ea) {
            return;
        }
        if args.len() != IO_QUEUE_CREATE_ARGC {
            if self.session.begin_queue_create_retype(call.ea) {
                if self.oracle.set_call_type(call.ea, DECL_IO_QUEUE_CREATE_CALL) {
                    tracing::info!(call = format_args!("{:#x}", call.ea), "retyped queue-create call");
                    self.outcome.call_retyped = true;
                } else {
                    tracing::error!(call = format_args!("{:#x}", call.ea), "failed to retype queue-create call");
                    self.session.mark_queue_create_seen(call.ea);
                }
            } else {
                tracing::warn!(
                    call = format_args!("{:#x}", call.ea),
                    argc = args.len(),
                    "queue-create call keeps an unexpected argument count"
                );
                self.session.mark_queue_create_seen(call.ea);
            }
            return;
        }
        self.session.mark_queue_create_seen(call.ea);

        let Some((idx, _)) = args.get(IO_QUEUE_CONFIG_ARG).and_then(search_local_var) else {
            tracing::warn!(call = format_args!("{:#x}", call.ea), "queue config is not a local variable");
            return;
        };
        let retries = self.session.config.rename_retries;
        if force_rename_var(self.oracle, self.func_ea, self.vars, idx, "Config", retries).is_err() {
            return;
        }
        let is_param = self.vars.get(idx).is_some_and(|v| v.is_arg);
        let ty = if is_param { "PWDF_IO_QUEUE_CONFIG" } else { "WDF_IO_QUEUE_CONFIG" };
        if set_var_type(self.oracle, self.func_ea, self.vars, idx, &TypeInfo::new(ty)) {
            self.outcome.config_typed = true;
        }
        self.outcome.config_is_param = is_param;
    }

    fn on_config_store(&mut self, lhs: &Expr, rhs: &Expr) {
        let (ExprKind::MemRef { x: config, offset } | ExprKind::MemPtr { x: config, offset }) = &lhs.kind
        else {
            return;
        };
        let config_ty = config
            .var_idx()
            .and_then(|idx| self.vars.get(idx))
            .map_or(&config.ty, |var| &var.ty);
        if *offset != IO_DEVICE_CONTROL_OFFSET || !config_ty.contains("WDF_IO_QUEUE_CONFIG") {
            return;
        }
        let mut target = rhs;
        if let ExprKind::Cast { x } = &target.kind {
            target = x.as_ref();
        }
        if let ExprKind::Ref { x } = &target.kind {
            target = x.as_ref();
        }
        let Some(handler) = target.obj_ea().filter(|ea| *ea != BADADDR) else {
            tracing::debug!(ea = format_args!("{:#x}", lhs.ea), "EvtIoDeviceControl not a function");
            return;
        };
        if self.session.add_handler(handler, HandlerKind::Wdf)
            && !self.oracle.force_name(handler, WDF_HANDLER_NAME)
        {
            tracing::error!(handler = format_args!("{handler:#x}"), "failed to name handler");
        }
        if self.session.handler_addresses().contains(&handler) {
            self.outcome.handler = Some(handler);
        }
    }
}

impl CtreeVisitor for QueueCreateFinder<'_, '_> {
    type Error = Infallible;

    fn leave_expr(&mut self, expr: &Expr, parents: &[&Expr]) -> Result<VisitAction, Infallible> {
        match &expr.kind {
            ExprKind::Cast { .. } | ExprKind::Ptr { .. } => {
                let Some(call) = parents.last().filter(|p| expr.is_call_object_of(p)) else {
                    return Ok(VisitAction::Continue);
                };
                let target = match &expr.kind {
                    ExprKind::Cast { x } => Some(x.as_ref()),
                    ExprKind::Ptr { x } => match &x.kind {
                        ExprKind::Cast { x: inner } => Some(inner.as_ref()),
                        _ => None,
                    },
                    _ => None,
                };
                if let (Some(target), ExprKind::Call { args, .. }) = (target, &call.kind) {
                    if self.is_queue_create_slot(target) {
                        self.on_queue_create(call, args);
                    }
                }
            }
            ExprKind::Asg { x, y } => self.on_config_store(x, y),
            _ => {}
        }
        Ok(VisitAction::Continue)
    }
}

/// Collect framework function usage from every reference to the table, within the time budget.
fn sweep_table_usage(session: &mut AnalysisSession, oracle: &mut dyn DecompilerOracle, binding: &WdfBinding) {
    let started = Instant::now();
    let budget = session.config.wdf_sweep_timeout();
    let table = WdfFunctionTable::kmdf();

    let sites: Vec<u64> = match binding.layout {
        WdfTableLayout::Direct => {
            session.old_kmdf_version = true;
            table.offsets().flat_map(|offset| oracle.data_refs_to(binding.table + offset)).collect()
        }
        WdfTableLayout::Indirect => oracle.xrefs_to(binding.table),
    };

    for site in sites {
        if started.elapsed() > budget {
            tracing::warn!(elapsed = ?started.elapsed(), "WDF usage sweep timed out");
            break;
        }
        run_usage_finder(session, oracle, site);
    }
    tracing::info!(functions = session.wdf_functions().len(), "WDF usage sweep done");
}

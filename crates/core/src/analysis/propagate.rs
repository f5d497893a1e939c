//! Recursive type/name propagation over the call graph.
//!
//! The walk starts at the driver entry point and follows calls into unnamed subroutines.
//! Along the way it:
//! - recognizes WDM dispatch registration (slot 14 stores, ARM64 `memset64` and store loops)
//! - hands over to [`crate::analysis::wdf`] when `WdfVersionBind` is called
//! - forces the device-control variant of the IRP and stack-location unions
//! - names variables after the expressions assigned to them
//! - records call paths from a handler to target APIs and helper intrinsics

use thiserror::Error;

use crate::analysis::naming::{
    force_rename_var, search_local_var, set_var_type, summarize_expr, UnionFix, UnionFixes,
};
use crate::analysis::session::{AnalysisSession, Arch};
use crate::analysis::wdf;
use crate::analysis::wdf_table::{buffer_slot, BufferSlot, DECL_EVT_IO_DEVICE_CONTROL, DECL_WDF_VERSION_BIND, WDF_VERSION_BIND};
use crate::analysis::wdf_usage::is_wdf_table_expr;
use crate::backends::DecompilerOracle;
use crate::model::{
    walk_stmt, CFunc, CtreeVisitor, Expr, ExprKind, HandlerKind, LocalVar, PathRecord,
    UnaryOp, VisitAction, BADADDR,
};

/// `IRP_MJ_DEVICE_CONTROL` index into `DRIVER_OBJECT.MajorFunction`.
pub const IRP_MJ_DEVICE_CONTROL: u64 = 14;

pub const DECL_WDM_HANDLER: &str = "NTSTATUS __stdcall fn_ioctl_handler_wdm(struct _DEVICE_OBJECT *DeviceObject, struct _IRP *Irp);";
const WDM_HANDLER_NAME: &str = "fn_ioctl_handler_wdm";
const DISPATCH_ARRAY_TYPE: &str = "PDRIVER_DISPATCH[28]";
const DISPATCH_POINTER_TYPE: &str = "PDRIVER_DISPATCH *";
const MEMSET64_HELPER: &str = "memset64";

/// Fatal conditions; everything else is logged and skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropagationError {
    #[error("no cross-reference to _WDF_BIND_INFO; the framework version cannot be recovered")]
    MissingBindInfo,
    #[error("_WDF_BIND_INFO at {0:#x} could not be read")]
    UnreadableBindInfo(u64),
}

/// Decompile `func_ea` and walk it with the given call path. Decompilation failures end the
/// subtree quietly.
pub fn walk_function(
    session: &mut AnalysisSession,
    oracle: &mut dyn DecompilerOracle,
    func_ea: u64,
    call_path: Vec<u64>,
) -> Result<(), PropagationError> {
    match oracle.decompile(func_ea) {
        Ok(mut cfunc) => walk_cfunc(session, oracle, &mut cfunc, call_path),
        Err(err) => {
            tracing::debug!(%err, "subtree not explored");
            Ok(())
        }
    }
}

/// Walk an already decompiled function.
pub fn walk_cfunc(
    session: &mut AnalysisSession,
    oracle: &mut dyn DecompilerOracle,
    cfunc: &mut CFunc,
    call_path: Vec<u64>,
) -> Result<(), PropagationError> {
    let mut propagator = Propagator {
        session,
        oracle,
        func_ea: cfunc.entry,
        vars: &mut cfunc.vars,
        call_path,
        union_fixes: UnionFixes::new(),
    };
    walk_stmt(&cfunc.body, &mut propagator)?;
    Ok(())
}

/// Visitor state for one function body.
pub struct Propagator<'s, 'f> {
    session: &'s mut AnalysisSession,
    oracle: &'s mut dyn DecompilerOracle,
    func_ea: u64,
    vars: &'f mut Vec<LocalVar>,
    call_path: Vec<u64>,
    /// Expressions whose union selection was forced, with the selected member.
    union_fixes: UnionFixes,
}

impl Propagator<'_, '_> {
    fn rooted_at_handler(&self) -> bool {
        self.call_path.first().is_some_and(|root| self.session.is_handler(*root))
    }

    fn extended_path(&self, ea: u64) -> Vec<u64> {
        let mut path = self.call_path.clone();
        path.push(ea);
        path
    }

    /// Whether `expr` is a variable named like `needle`, possibly behind member accesses,
    /// dereferences, indexing or increments.
    fn var_with_name(&self, expr: &Expr, needle: &str) -> bool {
        match &expr.kind {
            ExprKind::Var { idx } => self.vars.get(*idx).is_some_and(|v| v.name.contains(needle)),
            ExprKind::MemPtr { x, .. }
            | ExprKind::MemRef { x, .. }
            | ExprKind::Ptr { x }
            | ExprKind::Idx { x, .. } => self.var_with_name(x, needle),
            ExprKind::Unary {
                unop: UnaryOp::PreInc | UnaryOp::PreDec | UnaryOp::PostInc | UnaryOp::PostDec,
                x,
            } => self.var_with_name(x, needle),
            _ => false,
        }
    }

    fn apply_prototype(&mut self, ea: u64, decl: &str) {
        if self.oracle.apply_type(ea, decl) {
            tracing::info!(func = format_args!("{ea:#x}"), decl, "applied prototype");
            if decl.contains("IRP") {
                self.session.mark_irp_function(ea);
            }
        } else {
            tracing::error!(func = format_args!("{ea:#x}"), decl, "failed to apply prototype");
        }
    }

    /// Type `callee` and walk it, unless it is already on the current path.
    fn propagate(
        &mut self,
        callee: u64,
        decl: &str,
        path_start: bool,
        bind_call: Option<&Expr>,
    ) -> Result<(), PropagationError> {
        if self.call_path.contains(&callee) {
            tracing::debug!(func = format_args!("{callee:#x}"), "already on the call path");
            return Ok(());
        }
        self.apply_prototype(callee, decl);

        if self.oracle.name_at(callee).as_deref() == Some(WDF_VERSION_BIND) {
            if let Some(handler) = wdf::detect_wdf_handler(self.session, self.oracle, bind_call)? {
                return self.propagate(handler, DECL_EVT_IO_DEVICE_CONTROL, true, None);
            }
            return Ok(());
        }

        let call_path = if path_start { vec![callee] } else { self.extended_path(callee) };
        walk_function(self.session, self.oracle, callee, call_path)
    }

    fn register_wdm_handler(
        &mut self,
        fptr: &Expr,
        suffix: &str,
    ) -> Result<(), PropagationError> {
        let target = match &fptr.kind {
            ExprKind::Cast { x } => x.as_ref(),
            _ => fptr,
        };
        let target = match &target.kind {
            ExprKind::Ref { x } => x.as_ref(),
            _ => target,
        };
        let Some(handler) = target.obj_ea().filter(|ea| *ea != BADADDR) else {
            tracing::debug!(ea = format_args!("{:#x}", fptr.ea), "dispatch slot not assigned a function");
            return Ok(());
        };

        tracing::info!(handler = format_args!("{handler:#x}"), variant = suffix, "WDM IOCTL handler found");
        if !self.session.add_handler(handler, HandlerKind::Wdm) {
            return Ok(());
        }
        if suffix == "_memset64" {
            self.oracle.undefine(handler);
        }
        let name = format!("{WDM_HANDLER_NAME}{suffix}");
        if !self.oracle.force_name(handler, &name) {
            tracing::error!(handler = format_args!("{handler:#x}"), %name, "failed to name handler");
        }
        self.propagate(handler, DECL_WDM_HANDLER, true, None)
    }

    fn check_dispatch_store(&mut self, lhs: &Expr, rhs: &Expr) -> Result<(), PropagationError> {
        if let ExprKind::Idx { x: array, y: index } = &lhs.kind {
            let is_dispatch_array = array.is_member_access() && array.ty.is(DISPATCH_ARRAY_TYPE);
            if is_dispatch_array && index.num_value() == Some(IRP_MJ_DEVICE_CONTROL) {
                return self.register_wdm_handler(rhs, "");
            }
            return Ok(());
        }

        // ARM64 fills the table with a store loop over a pointer named after the array.
        if self.session.arch == Arch::Arm64
            && self.var_with_name(lhs, "MajorFunction")
        {
            if self.var_with_name(rhs, "DriverObject") {
                tracing::debug!(ea = format_args!("{:#x}", lhs.ea), "MajorFunction loop cursor, not a handler");
                return Ok(());
            }
            return self.register_wdm_handler(rhs, "_arm_loop");
        }
        Ok(())
    }

    fn check_memset_dispatch(&mut self, call: &Expr, args: &[Expr]) -> Result<(), PropagationError> {
        if args.len() != 3 {
            return Ok(());
        }
        let fills_dispatch = matches!(args[0].kind, ExprKind::MemPtr { .. })
            && args[0].ty.is(DISPATCH_POINTER_TYPE)
            && args[2].num_value().is_some();
        if fills_dispatch {
            return self.register_wdm_handler(&args[1], "_memset64");
        }
        tracing::debug!(ea = format_args!("{:#x}", call.ea), "memset64 does not fill the dispatch table");
        Ok(())
    }

    /// Force the device-control member for `expr`, a member access on `IRP`/`IO_STACK_LOCATION`.
    fn fix_union(&mut self, expr: &Expr, inner: &Expr) {
        let ExprKind::MemPtr { x: base, offset } = &inner.kind else {
            return;
        };
        for target in self.session.arch.union_targets() {
            if !base.ty.contains(target.struct_name) || *offset != target.offset {
                continue;
            }
            let Some(union_ty) = self.oracle.member_type(target.struct_name, target.offset) else {
                break;
            };
            let Some(member_ty) = self.oracle.member_type(&union_ty.type_name(), target.union_member)
            else {
                break;
            };
            if self.oracle.set_union_selection(self.func_ea, expr.ea, target.union_member) {
                tracing::debug!(
                    ea = format_args!("{:#x}", expr.ea),
                    r#struct = target.struct_name,
                    member = %member_ty,
                    "forced union member"
                );
                let member = self.oracle.member_name(&union_ty.type_name(), target.union_member);
                self.union_fixes.insert(expr.ea, UnionFix { member, ty: member_ty });
                self.session.mark_irp_function(self.func_ea);
            } else {
                tracing::error!(ea = format_args!("{:#x}", expr.ea), "failed to force union member");
            }
            break;
        }
    }

    /// Name and type the buffer arguments of a call through a known table slot.
    fn name_buffer_args(&mut self, slot_expr: &Expr, slot: &BufferSlot, parents: &[&Expr]) {
        let Some(call) = parents.last().filter(|p| slot_expr.is_call_object_of(p)) else {
            return;
        };
        let ExprKind::Call { args, .. } = &call.kind else {
            return;
        };
        for (arg_idx, name) in slot.arg_names {
            let Some(arg) = args.get(*arg_idx) else {
                tracing::warn!(
                    ea = format_args!("{:#x}", call.ea),
                    slot = format_args!("{:#x}", slot.offset),
                    "table call has fewer arguments than expected"
                );
                continue;
            };
            let Some((var_idx, ty)) = search_local_var(arg) else {
                continue;
            };
            let retries = self.session.config.rename_retries;
            if force_rename_var(self.oracle, self.func_ea, self.vars, var_idx, name, retries).is_err() {
                continue;
            }
            if let Some(ty) = ty {
                set_var_type(self.oracle, self.func_ea, self.vars, var_idx, &ty);
            }
        }
    }

    fn leave_call(&mut self, call: &Expr, callee: &Expr, args: &[Expr]) -> Result<(), PropagationError> {
        let callee_ea = callee.obj_ea();
        let name = callee_ea.and_then(|ea| self.oracle.name_at(ea)).unwrap_or_default();

        if self.session.config.is_target_api(&name) && self.rooted_at_handler() {
            let record = PathRecord::new(self.extended_path(call.ea), name.clone());
            tracing::info!(path = ?record.path, target = %name, "path to target API");
            self.session.add_target_path(record);
        }

        let Some(callee_ea) = callee_ea.filter(|ea| *ea != BADADDR) else {
            return Ok(());
        };
        let is_bind = name == WDF_VERSION_BIND;
        if is_bind {
            tracing::info!(call = format_args!("{:#x}", call.ea), "WdfVersionBind called");
            let header = self.session.config.wdf_header_path.clone();
            if !self.oracle.parse_type_file(&header) {
                tracing::error!(%header, "failed to parse WDF type definitions");
            }
        } else {
            let flags = self.oracle.function_flags(callee_ea);
            if flags.library || flags.thunk {
                return Ok(());
            }
            let config = &self.session.config;
            let followed = name.starts_with("sub_")
                || config.is_follow_name(&name)
                || (flags.lumina && !config.skip_lumina_functions);
            if !followed {
                return Ok(());
            }
        }

        let max_len = self.session.config.max_name_len;
        let params: Vec<String> = args
            .iter()
            .enumerate()
            .map(|(i, arg)| {
                let summary = summarize_expr(&*self.oracle, self.vars, &self.union_fixes, arg, Some(call), max_len);
                let ty = if arg.ty.is_empty() { "__int64".to_string() } else { arg.ty.to_string() };
                if summary.is_empty() {
                    ty
                } else {
                    format!("{ty} {summary}_{i}")
                }
            })
            .collect();

        let new_name = if name.starts_with("sub_") {
            format!("fn_{callee_ea:X}")
        } else if let Some(short) = self
            .oracle
            .demangle(&name)
            .and_then(|d| d.split('(').next().and_then(|h| h.split_whitespace().last()).map(String::from))
        {
            short
        } else {
            name.clone()
        };
        if !self.oracle.force_name(callee_ea, &new_name) {
            tracing::error!(func = format_args!("{callee_ea:#x}"), %new_name, "failed to rename function");
        }

        if is_bind {
            self.propagate(callee_ea, DECL_WDF_VERSION_BIND, false, Some(call))
        } else {
            let decl = format!(
                "{} __fastcall {}({});",
                callee.ty.return_type(),
                new_name,
                params.join(", ")
            );
            self.propagate(callee_ea, &decl, false, None)
        }
    }

    fn leave_assignment(&mut self, asg: &Expr, lhs: &Expr, rhs: &Expr) {
        let Some((idx, _)) = search_local_var(lhs) else {
            return;
        };
        let Some(var) = self.vars.get(idx) else {
            return;
        };
        if var.has_user_name || var.is_arg {
            return;
        }
        let forced = self.union_fixes.contains_key(&asg.ea) || self.union_fixes.contains_key(&rhs.ea);
        if !var.name.starts_with('v') && !forced {
            return;
        }

        let max_len = self.session.config.max_name_len;
        let summary = summarize_expr(&*self.oracle, self.vars, &self.union_fixes, rhs, Some(asg), max_len);
        if summary.is_empty() {
            return;
        }
        let retries = self.session.config.rename_retries;
        if force_rename_var(self.oracle, self.func_ea, self.vars, idx, &summary, retries).is_err() {
            return;
        }
        if let Some(fix) = self.union_fixes.get(&rhs.ea).cloned() {
            set_var_type(self.oracle, self.func_ea, self.vars, idx, &fix.ty);
        }
    }

    fn leave_helper(&mut self, name: &str, parents: &[&Expr]) {
        if !self.session.config.is_helper(name) || !self.rooted_at_handler() {
            return;
        }
        let Some(site) = parents.last() else {
            return;
        };
        let record = PathRecord::new(self.extended_path(site.ea), name);
        tracing::info!(path = ?record.path, helper = name, "path to helper instruction");
        self.session.add_helper_path(record);
    }
}

impl CtreeVisitor for Propagator<'_, '_> {
    type Error = PropagationError;

    fn visit_expr(&mut self, expr: &Expr, parents: &[&Expr]) -> Result<VisitAction, PropagationError> {
        match &expr.kind {
            ExprKind::Asg { x, y } => self.check_dispatch_store(x, y)?,
            ExprKind::Call { callee, args } => {
                if matches!(&callee.kind, ExprKind::Helper { name } if name == MEMSET64_HELPER) {
                    self.check_memset_dispatch(expr, args)?;
                }
            }
            ExprKind::MemPtr { x, offset } | ExprKind::MemRef { x, offset } => {
                if matches!(x.kind, ExprKind::MemPtr { .. }) {
                    self.fix_union(expr, x);
                }
                if let Some(slot) = buffer_slot(*offset) {
                    if is_wdf_table_expr(&*self.oracle, x) {
                        self.name_buffer_args(expr, slot, parents);
                    }
                }
            }
            ExprKind::Cast { x } => {
                if let ExprKind::MemRef { x: table, offset } | ExprKind::MemPtr { x: table, offset } = &x.kind {
                    if let Some(slot) = buffer_slot(*offset) {
                        if is_wdf_table_expr(&*self.oracle, table) {
                            self.name_buffer_args(expr, slot, parents);
                        }
                    }
                }
            }
            _ => {}
        }
        Ok(VisitAction::Continue)
    }

    fn leave_expr(&mut self, expr: &Expr, parents: &[&Expr]) -> Result<VisitAction, PropagationError> {
        match &expr.kind {
            ExprKind::Call { callee, args } => self.leave_call(expr, callee, args)?,
            ExprKind::Asg { x, y } => self.leave_assignment(expr, x, y),
            ExprKind::Helper { name } => self.leave_helper(name, parents),
            _ => {}
        }
        Ok(VisitAction::Continue)
    }
}

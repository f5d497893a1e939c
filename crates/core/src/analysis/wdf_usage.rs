//! Finds calls and references through the KMDF function table by slot offset.

use std::collections::BTreeSet;
use std::convert::Infallible;

use crate::analysis::session::AnalysisSession;
use crate::analysis::wdf_table::{WdfFunctionTable, WDF_FUNCTIONS_GLOBAL};
use crate::backends::DecompilerOracle;
use crate::model::{walk_stmt, CFunc, CtreeVisitor, Expr, ExprKind, LocalVar, VisitAction, WdfFunctionUse};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageMode {
    /// Slot names only; parents are not inspected.
    NamesOnly,
    /// Per use-site records with the debug-wrapper flag.
    CallContext,
}

/// Is `expr` the function table itself, by global name or by type?
pub fn is_wdf_table_expr(oracle: &dyn DecompilerOracle, expr: &Expr) -> bool {
    if expr.ty.contains("WDFFUNCTIONS") {
        return true;
    }
    match expr.obj_ea() {
        Some(ea) => oracle.name_at(ea).as_deref() == Some(WDF_FUNCTIONS_GLOBAL),
        None => false,
    }
}

/// Table slot accessed by `expr`: `table->slot`, `table.slot` or `table + offset`.
pub fn table_slot<'e>(table: &WdfFunctionTable, expr: &'e Expr) -> Option<(&'e Expr, u64)> {
    match &expr.kind {
        ExprKind::MemPtr { x, offset } | ExprKind::MemRef { x, offset } if table.contains(*offset) => {
            Some((x.as_ref(), *offset))
        }
        ExprKind::Add { x, y } => y.num_value().filter(|v| table.contains(*v)).map(|v| (x.as_ref(), v)),
        _ => None,
    }
}

fn local_var<'v>(vars: &'v [LocalVar], expr: &Expr) -> Option<&'v LocalVar> {
    match &expr.kind {
        ExprKind::Var { idx } => vars.get(*idx),
        ExprKind::Ref { x } | ExprKind::Ptr { x } | ExprKind::Cast { x } => local_var(vars, x),
        _ => None,
    }
}

pub struct WdfUsageFinder<'a> {
    oracle: &'a dyn DecompilerOracle,
    table: &'a WdfFunctionTable,
    vars: &'a [LocalVar],
    mode: UsageMode,
    names: BTreeSet<&'static str>,
    uses: BTreeSet<WdfFunctionUse>,
}

impl<'a> WdfUsageFinder<'a> {
    pub fn new(
        oracle: &'a dyn DecompilerOracle,
        table: &'a WdfFunctionTable,
        vars: &'a [LocalVar],
        mode: UsageMode,
    ) -> Self {
        Self { oracle, table, vars, mode, names: BTreeSet::new(), uses: BTreeSet::new() }
    }

    pub fn names(&self) -> BTreeSet<String> {
        self.names.iter().map(|n| n.to_string()).collect()
    }

    pub fn into_uses(self) -> BTreeSet<WdfFunctionUse> {
        self.uses
    }

    /// All non-receiver call arguments resolve to parameters of the enclosing function.
    fn forwards_parameters(&self, expr: &Expr, parents: &[&Expr]) -> bool {
        let Some(call) = parents.last() else {
            return false;
        };
        if !expr.is_call_object_of(call) {
            return false;
        }
        let ExprKind::Call { args, .. } = &call.kind else {
            return false;
        };
        if args.len() <= 1 {
            return false;
        }
        args[1..].iter().filter_map(|arg| local_var(self.vars, arg)).all(|var| var.is_arg)
    }
}

impl CtreeVisitor for WdfUsageFinder<'_> {
    type Error = Infallible;

    fn visit_expr(&mut self, expr: &Expr, parents: &[&Expr]) -> Result<VisitAction, Infallible> {
        let Some((base, offset)) = table_slot(self.table, expr) else {
            return Ok(VisitAction::Continue);
        };
        if !is_wdf_table_expr(self.oracle, base) {
            return Ok(VisitAction::Continue);
        }
        let Some(name) = self.table.name(offset) else {
            return Ok(VisitAction::Continue);
        };
        self.names.insert(name);
        if self.mode == UsageMode::CallContext {
            let debug_wrapper = self.forwards_parameters(expr, parents);
            self.uses.insert(WdfFunctionUse { ea: expr.ea, name: name.to_string(), debug_wrapper });
        }
        Ok(VisitAction::Continue)
    }
}

/// Scan one decompiled function.
pub fn find_wdf_usage(
    oracle: &dyn DecompilerOracle,
    table: &WdfFunctionTable,
    cfunc: &CFunc,
    mode: UsageMode,
) -> (BTreeSet<String>, BTreeSet<WdfFunctionUse>) {
    let mut finder = WdfUsageFinder::new(oracle, table, &cfunc.vars, mode);
    let _ = walk_stmt(&cfunc.body, &mut finder);
    let names = finder.names();
    (names, finder.into_uses())
}

/// Scan the function containing `ea` unless it was scanned before in this session.
pub fn run_usage_finder(session: &mut AnalysisSession, oracle: &mut dyn DecompilerOracle, ea: u64) {
    let Some(func) = oracle.function_start(ea) else {
        tracing::debug!(ea = format_args!("{ea:#x}"), "table reference outside any function");
        return;
    };
    if !session.begin_usage_scan(func) {
        return;
    }
    let cfunc = match oracle.decompile(func) {
        Ok(cfunc) => cfunc,
        Err(err) => {
            tracing::debug!(%err, "skipping WDF usage scan");
            return;
        }
    };
    let mode =
        if session.config.wdf_call_context { UsageMode::CallContext } else { UsageMode::NamesOnly };
    let (names, uses) = find_wdf_usage(&*oracle, WdfFunctionTable::kmdf(), &cfunc, mode);
    for name in &names {
        session.record_wdf_function(name);
    }
    for usage in uses {
        session.record_wdf_use(usage);
    }
}

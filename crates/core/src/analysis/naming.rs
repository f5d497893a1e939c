//! Argument-expression summaries and collision-tolerant variable renaming.

use std::collections::HashMap;
use std::convert::Infallible;

use thiserror::Error;

use crate::backends::DecompilerOracle;
use crate::model::{walk_expr, CtreeVisitor, Expr, ExprKind, LocalVar, TypeInfo, VisitAction};

/// Appended when a summary is cut at the maximum length.
pub const TRUNCATION_MARKER: &str = "_cut";

/// Member names that carry no meaning in a summary.
const IGNORED_MEMBERS: &[&str] = &["LowPart", "anonymous_0"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NamingError {
    #[error("variable `{0}` not found")]
    UnknownVariable(String),
    #[error("could not rename `{old}` to `{new}` after {attempts} attempts")]
    RetriesExhausted { old: String, new: String, attempts: usize },
}

/// Union member forced at one expression, overriding what the decompiler guessed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnionFix {
    pub member: Option<String>,
    pub ty: TypeInfo,
}

/// Forced union members keyed by the address of the member-access expression.
pub type UnionFixes = HashMap<u64, UnionFix>;

struct NameSummarizer<'a> {
    oracle: &'a dyn DecompilerOracle,
    vars: &'a [LocalVar],
    fixes: &'a UnionFixes,
    summed: String,
}

impl NameSummarizer<'_> {
    fn push_member(&mut self, member: &str) -> bool {
        if IGNORED_MEMBERS.contains(&member) {
            return false;
        }
        self.summed.push('_');
        self.summed.push_str(member);
        true
    }
}

impl CtreeVisitor for NameSummarizer<'_> {
    type Error = Infallible;

    fn visit_expr(&mut self, expr: &Expr, parents: &[&Expr]) -> Result<VisitAction, Infallible> {
        match &expr.kind {
            ExprKind::Var { idx } => {
                if let Some(var) = self.vars.get(*idx) {
                    let meaningful =
                        var.has_user_name || var.is_arg || !var.name.starts_with('v');
                    if meaningful && !self.summed.contains(&var.name) {
                        self.summed.push('_');
                        self.summed.push_str(&var.name);
                    }
                }
            }
            ExprKind::MemRef { x, offset } | ExprKind::MemPtr { x, offset } => {
                if let Some(member) = self.fixes.get(&expr.ea).and_then(|fix| fix.member.clone()) {
                    if self.push_member(&member) {
                        return Ok(VisitAction::Stop);
                    }
                }
                let owner = match self.fixes.get(&x.ea) {
                    Some(fix) => fix.ty.type_name(),
                    None => x.ty.type_name(),
                };
                if let Some(member) = self.oracle.member_name(&owner, *offset) {
                    if self.push_member(&member) {
                        return Ok(VisitAction::Stop);
                    }
                }
            }
            ExprKind::Ref { .. } => self.summed.push_str("_ref"),
            ExprKind::Ptr { .. } => self.summed.push_str("_deref"),
            ExprKind::Num { value } => {
                if let Some(ExprKind::Add { x, .. }) = parents.last().map(|p| &p.kind) {
                    let scaled = match (&x.kind, parents.last()) {
                        (ExprKind::Cast { .. }, Some(add)) => {
                            let size = self.oracle.type_size(&add.ty.remove_pointer()).unwrap_or(1);
                            value.wrapping_mul(size)
                        }
                        _ => *value,
                    };
                    self.summed.push_str(&format!("_field_{scaled:x}"));
                }
            }
            ExprKind::Obj { obj_ea } => {
                if let Some(name) = self.oracle.name_at(*obj_ea) {
                    self.summed.push('_');
                    self.summed.push_str(&name);
                }
            }
            ExprKind::Call { .. } => {
                self.summed.clear();
                return Ok(VisitAction::Stop);
            }
            _ => {}
        }
        Ok(VisitAction::Continue)
    }
}

/// Summarize `expr` into an underscore-joined name; empty when nothing meaningful was found.
///
/// `parent` is the expression `expr` hangs off (the call or assignment), so a bare numeric
/// operand under an addition can still be scaled by its pointee size. Member accesses listed
/// in `fixes` are named after the forced union member.
pub fn summarize_expr(
    oracle: &dyn DecompilerOracle,
    vars: &[LocalVar],
    fixes: &UnionFixes,
    expr: &Expr,
    parent: Option<&Expr>,
    max_len: usize,
) -> String {
    let mut summarizer = NameSummarizer { oracle, vars, fixes, summed: String::new() };
    let mut parents: Vec<&Expr> = parent.into_iter().collect();
    let _ = walk_expr(expr, &mut parents, &mut summarizer);
    finish_summary(summarizer.summed, max_len)
}

fn finish_summary(summed: String, max_len: usize) -> String {
    if summed.starts_with("_field_") || summed == "_ref" {
        return String::new();
    }
    if summed.chars().count() > max_len {
        let mut cut: String = summed.chars().take(max_len).collect();
        cut.push_str(TRUNCATION_MARKER);
        return cut;
    }
    summed
}

/// Rename a variable, falling back to `new_name_1`, `new_name_2`, ... on collisions.
///
/// Renaming to the name a variable already has succeeds without touching the oracle.
/// On success the local variable table is updated to match.
pub fn force_rename_var(
    oracle: &mut dyn DecompilerOracle,
    func_ea: u64,
    vars: &mut [LocalVar],
    idx: usize,
    new_name: &str,
    retries: usize,
) -> Result<String, NamingError> {
    let var = vars.get(idx).ok_or_else(|| NamingError::UnknownVariable(format!("#{idx}")))?;
    let old = var.name.clone();
    if old == new_name {
        return Ok(old);
    }

    let mut candidate = new_name.to_string();
    for attempt in 0..=retries {
        if attempt > 0 {
            candidate = format!("{new_name}_{attempt}");
        }
        if candidate == old || oracle.rename_variable(func_ea, &old, &candidate) {
            let var = &mut vars[idx];
            var.name = candidate.clone();
            var.has_user_name = true;
            tracing::debug!(func = format_args!("{func_ea:#x}"), %old, new = %candidate, "renamed variable");
            return Ok(candidate);
        }
    }

    tracing::error!(
        func = format_args!("{func_ea:#x}"),
        %old,
        new = %new_name,
        "variable rename failed after retries"
    );
    Err(NamingError::RetriesExhausted { old, new: new_name.to_string(), attempts: retries + 1 })
}

/// Retype a variable through the oracle and mirror it locally. Failures are logged only.
pub fn set_var_type(
    oracle: &mut dyn DecompilerOracle,
    func_ea: u64,
    vars: &mut [LocalVar],
    idx: usize,
    ty: &TypeInfo,
) -> bool {
    let Some(var) = vars.get_mut(idx) else {
        return false;
    };
    if oracle.set_variable_type(func_ea, &var.name, ty) {
        var.ty = ty.clone();
        tracing::debug!(var = %var.name, %ty, "retyped variable");
        true
    } else {
        tracing::error!(func = format_args!("{func_ea:#x}"), var = %var.name, %ty, "failed to retype variable");
        false
    }
}

/// Resolve the local variable behind `expr`, looking through casts, `&` and `*`.
///
/// The returned type is the pointee of the innermost cast seen on the way, if any.
pub fn search_local_var(expr: &Expr) -> Option<(usize, Option<TypeInfo>)> {
    fn inner(expr: &Expr, ty: Option<&TypeInfo>) -> Option<(usize, Option<TypeInfo>)> {
        match &expr.kind {
            ExprKind::Var { idx } => Some((*idx, ty.map(TypeInfo::remove_pointer))),
            ExprKind::Cast { x } => inner(x, Some(&expr.ty)),
            ExprKind::Ref { x } | ExprKind::Ptr { x } => inner(x, ty),
            _ => None,
        }
    }
    inner(expr, None)
}

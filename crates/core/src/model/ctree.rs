use std::fmt;

use serde::{Deserialize, Serialize};

/// Sentinel the decompiler uses for "no address".
pub const BADADDR: u64 = u64::MAX;

/// Textual C type as reported by the decompiler (e.g. `struct _IRP *`, `PDRIVER_DISPATCH[28]`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeInfo(pub String);

impl TypeInfo {
    pub fn new(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }

    /// Case-sensitive substring test against the printed type.
    pub fn contains(&self, needle: &str) -> bool {
        self.0.contains(needle)
    }

    /// Compare ignoring whitespace, so `PDRIVER_DISPATCH [28]` matches `PDRIVER_DISPATCH[28]`.
    pub fn is(&self, other: &str) -> bool {
        let lhs = self.0.chars().filter(|c| !c.is_whitespace());
        let rhs = other.chars().filter(|c| !c.is_whitespace());
        lhs.eq(rhs)
    }

    pub fn is_pointer(&self) -> bool {
        self.0.trim_end().ends_with('*')
    }

    /// Drop one level of pointer indirection. Non-pointer types are returned unchanged.
    pub fn remove_pointer(&self) -> TypeInfo {
        let trimmed = self.0.trim_end();
        match trimmed.strip_suffix('*') {
            Some(rest) => TypeInfo(rest.trim_end().to_string()),
            None => self.clone(),
        }
    }

    /// Bare type name with qualifiers, `struct`/`union` keywords and pointer stars removed.
    pub fn type_name(&self) -> String {
        let mut name = self.0.as_str();
        if let Some(idx) = name.find('[') {
            name = &name[..idx];
        }
        name.split_whitespace()
            .filter(|tok| !matches!(*tok, "struct" | "union" | "const" | "volatile" | "enum"))
            .collect::<Vec<_>>()
            .join(" ")
            .trim_end_matches(|c: char| c == '*' || c.is_whitespace())
            .to_string()
    }

    /// Return type of a function or function-pointer type, calling convention stripped.
    pub fn return_type(&self) -> String {
        let head = match self.0.find('(') {
            Some(idx) => &self.0[..idx],
            None => self.0.as_str(),
        };
        let ret = head
            .split_whitespace()
            .filter(|tok| !tok.starts_with("__") || tok.starts_with("__int"))
            .collect::<Vec<_>>()
            .join(" ");
        if ret.is_empty() {
            "__int64".to_string()
        } else {
            ret
        }
    }
}

impl fmt::Display for TypeInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TypeInfo {
    fn from(value: &str) -> Self {
        TypeInfo(value.to_string())
    }
}

/// A node of the typed expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Expr {
    #[serde(default = "bad_address")]
    pub ea: u64,
    #[serde(default)]
    pub ty: TypeInfo,
    #[serde(flatten)]
    pub kind: ExprKind,
}

fn bad_address() -> u64 {
    BADADDR
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    Neg,
    LogicalNot,
    BitNot,
    PreInc,
    PreDec,
    PostInc,
    PostDec,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LogicalAnd,
    LogicalOr,
    AsgAdd,
    AsgSub,
    AsgOr,
    AsgAnd,
    Comma,
}

/// Operator kinds of the expression tree. The set is closed so visitors stay exhaustive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ExprKind {
    Var { idx: usize },
    Obj { obj_ea: u64 },
    Num { value: u64 },
    Str { text: String },
    Helper { name: String },
    MemRef { x: Box<Expr>, offset: u64 },
    MemPtr { x: Box<Expr>, offset: u64 },
    Ref { x: Box<Expr> },
    Ptr { x: Box<Expr> },
    Cast { x: Box<Expr> },
    Idx { x: Box<Expr>, y: Box<Expr> },
    Add { x: Box<Expr>, y: Box<Expr> },
    Asg { x: Box<Expr>, y: Box<Expr> },
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Unary { unop: UnaryOp, x: Box<Expr> },
    Binary { binop: BinaryOp, x: Box<Expr>, y: Box<Expr> },
    Ternary { cond: Box<Expr>, then: Box<Expr>, otherwise: Box<Expr> },
}

impl Expr {
    pub fn new(ea: u64, kind: ExprKind) -> Self {
        Self { ea, ty: TypeInfo::default(), kind }
    }

    pub fn with_type(mut self, ty: impl Into<String>) -> Self {
        self.ty = TypeInfo(ty.into());
        self
    }

    pub fn var(ea: u64, idx: usize) -> Self {
        Self::new(ea, ExprKind::Var { idx })
    }

    pub fn obj(ea: u64, obj_ea: u64) -> Self {
        Self::new(ea, ExprKind::Obj { obj_ea })
    }

    pub fn num(ea: u64, value: u64) -> Self {
        Self::new(ea, ExprKind::Num { value })
    }

    pub fn helper(ea: u64, name: impl Into<String>) -> Self {
        Self::new(ea, ExprKind::Helper { name: name.into() })
    }

    pub fn memref(ea: u64, x: Expr, offset: u64) -> Self {
        Self::new(ea, ExprKind::MemRef { x: Box::new(x), offset })
    }

    pub fn memptr(ea: u64, x: Expr, offset: u64) -> Self {
        Self::new(ea, ExprKind::MemPtr { x: Box::new(x), offset })
    }

    pub fn reference(ea: u64, x: Expr) -> Self {
        Self::new(ea, ExprKind::Ref { x: Box::new(x) })
    }

    pub fn deref(ea: u64, x: Expr) -> Self {
        Self::new(ea, ExprKind::Ptr { x: Box::new(x) })
    }

    pub fn cast(ea: u64, x: Expr) -> Self {
        Self::new(ea, ExprKind::Cast { x: Box::new(x) })
    }

    pub fn idx(ea: u64, x: Expr, y: Expr) -> Self {
        Self::new(ea, ExprKind::Idx { x: Box::new(x), y: Box::new(y) })
    }

    pub fn add(ea: u64, x: Expr, y: Expr) -> Self {
        Self::new(ea, ExprKind::Add { x: Box::new(x), y: Box::new(y) })
    }

    pub fn asg(ea: u64, x: Expr, y: Expr) -> Self {
        Self::new(ea, ExprKind::Asg { x: Box::new(x), y: Box::new(y) })
    }

    pub fn call(ea: u64, callee: Expr, args: Vec<Expr>) -> Self {
        Self::new(ea, ExprKind::Call { callee: Box::new(callee), args })
    }

    pub fn unary(ea: u64, unop: UnaryOp, x: Expr) -> Self {
        Self::new(ea, ExprKind::Unary { unop, x: Box::new(x) })
    }

    pub fn binary(ea: u64, binop: BinaryOp, x: Expr, y: Expr) -> Self {
        Self::new(ea, ExprKind::Binary { binop, x: Box::new(x), y: Box::new(y) })
    }

    /// Direct children in evaluation order.
    pub fn children(&self) -> Vec<&Expr> {
        match &self.kind {
            ExprKind::Var { .. }
            | ExprKind::Obj { .. }
            | ExprKind::Num { .. }
            | ExprKind::Str { .. }
            | ExprKind::Helper { .. } => Vec::new(),
            ExprKind::MemRef { x, .. }
            | ExprKind::MemPtr { x, .. }
            | ExprKind::Ref { x }
            | ExprKind::Ptr { x }
            | ExprKind::Cast { x }
            | ExprKind::Unary { x, .. } => vec![x.as_ref()],
            ExprKind::Idx { x, y }
            | ExprKind::Add { x, y }
            | ExprKind::Asg { x, y }
            | ExprKind::Binary { x, y, .. } => vec![x.as_ref(), y.as_ref()],
            ExprKind::Call { callee, args } => {
                let mut out = Vec::with_capacity(args.len() + 1);
                out.push(callee.as_ref());
                out.extend(args.iter());
                out
            }
            ExprKind::Ternary { cond, then, otherwise } => {
                vec![cond.as_ref(), then.as_ref(), otherwise.as_ref()]
            }
        }
    }

    /// First operand of unary-shaped and member-access nodes.
    pub fn operand(&self) -> Option<&Expr> {
        match &self.kind {
            ExprKind::MemRef { x, .. }
            | ExprKind::MemPtr { x, .. }
            | ExprKind::Ref { x }
            | ExprKind::Ptr { x }
            | ExprKind::Cast { x }
            | ExprKind::Idx { x, .. }
            | ExprKind::Add { x, .. }
            | ExprKind::Asg { x, .. }
            | ExprKind::Unary { x, .. }
            | ExprKind::Binary { x, .. } => Some(x),
            _ => None,
        }
    }

    /// Member offset for `.`/`->` accesses.
    pub fn member_offset(&self) -> Option<u64> {
        match &self.kind {
            ExprKind::MemRef { offset, .. } | ExprKind::MemPtr { offset, .. } => Some(*offset),
            _ => None,
        }
    }

    pub fn is_member_access(&self) -> bool {
        matches!(self.kind, ExprKind::MemRef { .. } | ExprKind::MemPtr { .. })
    }

    pub fn obj_ea(&self) -> Option<u64> {
        match self.kind {
            ExprKind::Obj { obj_ea } => Some(obj_ea),
            _ => None,
        }
    }

    pub fn num_value(&self) -> Option<u64> {
        match self.kind {
            ExprKind::Num { value } => Some(value),
            _ => None,
        }
    }

    pub fn var_idx(&self) -> Option<usize> {
        match self.kind {
            ExprKind::Var { idx } => Some(idx),
            _ => None,
        }
    }

    /// True when `self` is the function expression of the call `parent`.
    pub fn is_call_object_of(&self, parent: &Expr) -> bool {
        match &parent.kind {
            ExprKind::Call { callee, .. } => std::ptr::eq(callee.as_ref(), self),
            _ => false,
        }
    }

    /// Every address carried by this expression and its descendants.
    pub fn addresses(&self, out: &mut Vec<u64>) {
        if self.ea != BADADDR {
            out.push(self.ea);
        }
        for child in self.children() {
            child.addresses(out);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchCase {
    #[serde(default)]
    pub values: Vec<u64>,
    pub body: Stmt,
}

/// Statement layer of the tree; only expressions carry analysis-relevant structure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "stmt", rename_all = "snake_case")]
pub enum Stmt {
    Block {
        body: Vec<Stmt>,
    },
    Expr {
        expr: Expr,
    },
    If {
        cond: Expr,
        then: Box<Stmt>,
        #[serde(default)]
        otherwise: Option<Box<Stmt>>,
    },
    Loop {
        #[serde(default)]
        cond: Option<Expr>,
        body: Box<Stmt>,
    },
    Switch {
        expr: Expr,
        cases: Vec<SwitchCase>,
    },
    Return {
        #[serde(default)]
        expr: Option<Expr>,
    },
    Empty,
}

impl Stmt {
    pub fn block(body: Vec<Stmt>) -> Self {
        Stmt::Block { body }
    }

    pub fn expr(expr: Expr) -> Self {
        Stmt::Expr { expr }
    }

    /// Collect every expression address in this statement subtree.
    pub fn addresses(&self, out: &mut Vec<u64>) {
        match self {
            Stmt::Block { body } => body.iter().for_each(|s| s.addresses(out)),
            Stmt::Expr { expr } => expr.addresses(out),
            Stmt::If { cond, then, otherwise } => {
                cond.addresses(out);
                then.addresses(out);
                if let Some(other) = otherwise {
                    other.addresses(out);
                }
            }
            Stmt::Loop { cond, body } => {
                if let Some(cond) = cond {
                    cond.addresses(out);
                }
                body.addresses(out);
            }
            Stmt::Switch { expr, cases } => {
                expr.addresses(out);
                cases.iter().for_each(|c| c.body.addresses(out));
            }
            Stmt::Return { expr } => {
                if let Some(expr) = expr {
                    expr.addresses(out);
                }
            }
            Stmt::Empty => {}
        }
    }
}

/// Local variable or parameter of a decompiled function.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalVar {
    pub name: String,
    #[serde(default)]
    pub ty: TypeInfo,
    #[serde(default)]
    pub is_arg: bool,
    #[serde(default)]
    pub has_user_name: bool,
}

impl LocalVar {
    pub fn new(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self { name: name.into(), ty: TypeInfo(ty.into()), is_arg: false, has_user_name: false }
    }

    pub fn arg(name: impl Into<String>, ty: impl Into<String>) -> Self {
        Self { is_arg: true, ..Self::new(name, ty) }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PseudocodeLine {
    #[serde(default)]
    pub ea: Option<u64>,
    pub text: String,
}

/// One decompiled function: variables, body tree and rendered pseudocode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CFunc {
    pub entry: u64,
    #[serde(default)]
    pub vars: Vec<LocalVar>,
    pub body: Stmt,
    #[serde(default)]
    pub pseudocode: Vec<PseudocodeLine>,
}

impl CFunc {
    pub fn lines(&self) -> Vec<String> {
        self.pseudocode.iter().map(|l| l.text.clone()).collect()
    }

    /// Line index closest to `addr`: exact match, else the nearest preceding address.
    pub fn line_of(&self, addr: u64) -> Option<usize> {
        if let Some(idx) = self.pseudocode.iter().position(|l| l.ea == Some(addr)) {
            return Some(idx);
        }
        self.pseudocode
            .iter()
            .enumerate()
            .filter_map(|(idx, l)| l.ea.filter(|ea| *ea <= addr).map(|ea| (ea, idx)))
            .max()
            .map(|(_, idx)| idx)
    }

    /// Pseudocode window of `context` lines around `addr`; the hit line starts with `>`.
    pub fn context_window(&self, addr: u64, context: usize) -> Option<String> {
        let y = self.line_of(addr)?;
        let start = y.saturating_sub(context);
        let end = (y + context + 1).min(self.pseudocode.len());
        let mut out = Vec::with_capacity(end - start);
        for (idx, line) in self.pseudocode[start..end].iter().enumerate() {
            if start + idx == y {
                let rest: String = line.text.chars().skip(1).collect();
                out.push(format!(">{rest}"));
            } else {
                out.push(line.text.clone());
            }
        }
        Some(out.join("\n"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisitAction {
    Continue,
    SkipChildren,
    Stop,
}

/// Tree visitor with pre-order and post-order hooks. `parents` runs from the statement root
/// down to the direct parent of `expr`.
pub trait CtreeVisitor {
    type Error;

    fn visit_expr(&mut self, _expr: &Expr, _parents: &[&Expr]) -> Result<VisitAction, Self::Error> {
        Ok(VisitAction::Continue)
    }

    fn leave_expr(&mut self, _expr: &Expr, _parents: &[&Expr]) -> Result<VisitAction, Self::Error> {
        Ok(VisitAction::Continue)
    }
}

/// Walk every expression of a statement tree.
pub fn walk_stmt<V: CtreeVisitor>(stmt: &Stmt, visitor: &mut V) -> Result<VisitAction, V::Error> {
    let mut parents = Vec::new();
    walk_stmt_inner(stmt, &mut parents, visitor)
}

fn walk_stmt_inner<'a, V: CtreeVisitor>(
    stmt: &'a Stmt,
    parents: &mut Vec<&'a Expr>,
    visitor: &mut V,
) -> Result<VisitAction, V::Error> {
    let mut exprs: Vec<&'a Expr> = Vec::new();
    let mut stmts: Vec<&'a Stmt> = Vec::new();
    match stmt {
        Stmt::Block { body } => stmts.extend(body.iter()),
        Stmt::Expr { expr } => exprs.push(expr),
        Stmt::If { cond, then, otherwise } => {
            exprs.push(cond);
            stmts.push(then);
            if let Some(other) = otherwise {
                stmts.push(other);
            }
        }
        Stmt::Loop { cond, body } => {
            exprs.extend(cond.iter());
            stmts.push(body);
        }
        Stmt::Switch { expr, cases } => {
            exprs.push(expr);
            stmts.extend(cases.iter().map(|c| &c.body));
        }
        Stmt::Return { expr } => exprs.extend(expr.iter()),
        Stmt::Empty => {}
    }

    for expr in exprs {
        if walk_expr(expr, parents, visitor)? == VisitAction::Stop {
            return Ok(VisitAction::Stop);
        }
    }
    for child in stmts {
        if walk_stmt_inner(child, parents, visitor)? == VisitAction::Stop {
            return Ok(VisitAction::Stop);
        }
    }
    Ok(VisitAction::Continue)
}

/// Walk an expression subtree, with `parents` holding the ancestors of `expr`.
pub fn walk_expr<'a, V: CtreeVisitor>(
    expr: &'a Expr,
    parents: &mut Vec<&'a Expr>,
    visitor: &mut V,
) -> Result<VisitAction, V::Error> {
    match visitor.visit_expr(expr, parents)? {
        VisitAction::Stop => return Ok(VisitAction::Stop),
        VisitAction::SkipChildren => {}
        VisitAction::Continue => {
            parents.push(expr);
            for child in expr.children() {
                if walk_expr(child, parents, visitor)? == VisitAction::Stop {
                    parents.pop();
                    return Ok(VisitAction::Stop);
                }
            }
            parents.pop();
        }
    }
    match visitor.leave_expr(expr, parents)? {
        VisitAction::Stop => Ok(VisitAction::Stop),
        _ => Ok(VisitAction::Continue),
    }
}

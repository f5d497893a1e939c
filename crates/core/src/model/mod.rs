//! Core data model: the decompiler's typed expression tree and the records an analysis produces.
//!
//! The tree types mirror what a decompiler oracle hands back for one function:
//! - `Expr`/`ExprKind`: typed expression nodes over a closed operator set
//! - `Stmt`: the statement skeleton holding those expressions
//! - `LocalVar`/`CFunc`: variable table, body and rendered pseudocode
//!
//! The record types are what crosses the core/orchestrator boundary.

pub mod ctree;
pub mod records;

pub use ctree::*;
pub use records::*;

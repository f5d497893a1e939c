//! The propagation engine and its helpers.
//!
//! [`propagate`] drives the walk; [`wdf`] and [`wdf_usage`] take over for framework drivers;
//! [`comparisons`] and [`tree`] post-process what the walk recorded.

pub mod comparisons;
pub mod config;
pub mod naming;
pub mod propagate;
pub mod session;
pub mod tree;
pub mod wdf;
pub mod wdf_table;
pub mod wdf_usage;

pub use config::EngineConfig;
pub use propagate::{walk_cfunc, walk_function, PropagationError};
pub use session::{AnalysisSession, Arch, WdfBinding};
pub use tree::{build_function_tree, FunctionTreeNode};

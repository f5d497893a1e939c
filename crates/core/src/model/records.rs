use std::fmt;

use serde::{Deserialize, Serialize};

/// Driver framework shape a dispatch handler was discovered through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum HandlerKind {
    #[serde(rename = "WDM")]
    Wdm,
    #[serde(rename = "WDF")]
    Wdf,
    #[default]
    #[serde(rename = "unknown")]
    Unknown,
}

impl HandlerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            HandlerKind::Wdm => "WDM",
            HandlerKind::Wdf => "WDF",
            HandlerKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandlerRecord {
    pub address: u64,
    pub kind: HandlerKind,
}

/// Call-site chain from a handler to a dangerous API or intrinsic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PathRecord {
    pub path: Vec<u64>,
    pub name: String,
}

impl PathRecord {
    pub fn new(path: Vec<u64>, name: impl Into<String>) -> Self {
        Self { path, name: name.into() }
    }

    pub fn root(&self) -> Option<u64> {
        self.path.first().copied()
    }

    pub fn target(&self) -> Option<u64> {
        self.path.last().copied()
    }
}

/// Serialized form of a path: the record plus a pseudocode excerpt around the final call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathReport {
    pub path: Vec<u64>,
    pub name: String,
    #[serde(default)]
    pub context: Option<String>,
}

impl PathReport {
    pub fn record(&self) -> PathRecord {
        PathRecord::new(self.path.clone(), self.name.clone())
    }
}

impl From<PathRecord> for PathReport {
    fn from(value: PathRecord) -> Self {
        Self { path: value.path, name: value.name, context: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ComparisonOp {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = "<=")]
    Le,
    #[serde(rename = ">=")]
    Ge,
}

impl ComparisonOp {
    pub fn parse(token: &str) -> Option<Self> {
        match token {
            "==" => Some(ComparisonOp::Eq),
            "!=" => Some(ComparisonOp::Ne),
            "<" => Some(ComparisonOp::Lt),
            ">" => Some(ComparisonOp::Gt),
            "<=" => Some(ComparisonOp::Le),
            ">=" => Some(ComparisonOp::Ge),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComparisonOp::Eq => "==",
            ComparisonOp::Ne => "!=",
            ComparisonOp::Lt => "<",
            ComparisonOp::Gt => ">",
            ComparisonOp::Le => "<=",
            ComparisonOp::Ge => ">=",
        }
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IOCTL-code comparison scraped from pseudocode text.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ComparisonRecord {
    pub op: ComparisonOp,
    pub val: u64,
    pub line: String,
}

impl ComparisonRecord {
    pub fn new(op: ComparisonOp, val: u64, line: impl Into<String>) -> Self {
        Self { op, val, line: line.into() }
    }
}

/// One reference to a KMDF function-table slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WdfFunctionUse {
    pub ea: u64,
    pub name: String,
    /// All forwarded arguments are parameters of the enclosing function.
    pub debug_wrapper: bool,
}

/// Final status of one driver analysis; doubles as the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    DecompilerUnavailable,
    WdfVersionUnsupported,
    WdfVersionUnrecoverable,
    Completed { handler_found: bool, paths_found: bool },
}

impl StatusCode {
    pub fn from_findings(handlers: usize, paths: usize) -> Self {
        StatusCode::Completed { handler_found: handlers > 0, paths_found: paths > 0 }
    }

    pub fn code(self) -> i32 {
        match self {
            StatusCode::DecompilerUnavailable => -1,
            StatusCode::WdfVersionUnsupported => -2,
            StatusCode::WdfVersionUnrecoverable => -3,
            StatusCode::Completed { handler_found, paths_found } => {
                let mut status = 0;
                if handler_found {
                    status += 100;
                }
                if paths_found {
                    status += 100;
                }
                status
            }
        }
    }
}

/// Everything one driver analysis reports.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub ret_code: i32,
    pub handler_type: HandlerKind,
    pub handler_addrs: Vec<u64>,
    pub target_paths: Vec<PathReport>,
    pub helper_paths: Vec<PathReport>,
    pub wdf_functions: Vec<String>,
    #[serde(default)]
    pub wdf_debug_wrapper_count: usize,
    #[serde(default)]
    pub wdf_debug_build: bool,
    pub ioctl_comp: Vec<ComparisonRecord>,
    #[serde(default)]
    pub function_trees: Vec<String>,
    #[serde(default)]
    pub combined_sub_functions: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analysis_log: Option<String>,
}

impl AnalysisResult {
    /// Placeholder result for an analysis that produced no result file.
    pub fn failed(ret_code: i32) -> Self {
        Self { ret_code, ..Self::default() }
    }

    pub fn all_paths(&self) -> impl Iterator<Item = &PathReport> {
        self.target_paths.iter().chain(self.helper_paths.iter())
    }
}

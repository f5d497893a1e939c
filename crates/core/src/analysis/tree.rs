//! Call trees rooted at a handler, built from the recorded paths.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::PathRecord;

/// One node of a handler's call tree. Leaves carry the target name of the path that ends there.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionTreeNode {
    pub address: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub depth: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<FunctionTreeNode>,
}

impl FunctionTreeNode {
    pub fn new(address: u64, name: Option<String>, depth: usize) -> Self {
        Self { address, name, depth, children: Vec::new() }
    }

    /// Child with `address`, created on first use.
    pub fn get_or_add(&mut self, address: u64) -> &mut FunctionTreeNode {
        let pos = match self.children.iter().position(|c| c.address == address) {
            Some(pos) => pos,
            None => {
                self.children.push(FunctionTreeNode::new(address, None, self.depth + 1));
                self.children.len() - 1
            }
        };
        &mut self.children[pos]
    }

    /// Descendants that branch into more than one child.
    pub fn combined_subfunctions(&self) -> usize {
        self.children
            .iter()
            .map(|child| usize::from(child.children.len() > 1) + child.combined_subfunctions())
            .sum()
    }

    /// Root-to-node paths of every named node below the root, in tree order.
    pub fn flatten(&self) -> Vec<PathRecord> {
        let mut out = Vec::new();
        let mut prefix = vec![self.address];
        for child in &self.children {
            child.collect(&mut prefix, &mut out);
        }
        out
    }

    fn collect(&self, prefix: &mut Vec<u64>, out: &mut Vec<PathRecord>) {
        prefix.push(self.address);
        if let Some(name) = &self.name {
            out.push(PathRecord::new(prefix.clone(), name.clone()));
        }
        for child in &self.children {
            child.collect(prefix, out);
        }
        prefix.pop();
    }
}

impl fmt::Display for FunctionTreeNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let indent = "  ".repeat(self.depth);
        write!(f, "{indent}0x{:02X}", self.address)?;
        if let Some(name) = &self.name {
            write!(f, " {name}")?;
        }
        if self.children.is_empty() {
            return writeln!(f);
        }
        writeln!(f, " {{")?;
        for child in &self.children {
            write!(f, "{child}")?;
        }
        writeln!(f, "{indent}}}")
    }
}

/// Merge every path rooted at `handler` into one tree. Paths with another root are ignored.
pub fn build_function_tree<'a>(
    handler: u64,
    paths: impl IntoIterator<Item = &'a PathRecord>,
    root_name: Option<&str>,
) -> FunctionTreeNode {
    let mut root = FunctionTreeNode::new(handler, root_name.map(String::from), 0);
    for record in paths {
        if record.root() != Some(handler) {
            continue;
        }
        let mut node = &mut root;
        for address in &record.path[1..] {
            node = node.get_or_add(*address);
        }
        if node.depth > 0 && node.name.is_none() {
            node.name = Some(record.name.clone());
        }
    }
    root
}

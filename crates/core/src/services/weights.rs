//! Interest weights for reachable APIs and instructions.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::db::config::is_yaml;
use crate::model::AnalysisResult;

#[derive(Debug, Error)]
pub enum WeightsError {
    #[error("failed to read weights {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse weights {path}: {message}")]
    Parse { path: String, message: String },
}

/// Name-to-weight table. A driver's bonus is the sum over the distinct names its paths reach.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InterestWeights {
    weights: BTreeMap<String, i64>,
}

impl InterestWeights {
    pub fn new(weights: BTreeMap<String, i64>) -> Self {
        Self { weights }
    }

    /// Load from YAML or JSON maps, or from CSV with a `name,weight` header row.
    pub fn load(path: &Path) -> Result<Self, WeightsError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path)
            .map_err(|source| WeightsError::Io { path: display.clone(), source })?;
        let parse_error = |message: String| WeightsError::Parse { path: display.clone(), message };
        let ext = path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase);
        match ext.as_deref() {
            Some("csv") => Self::parse_csv(&text).map_err(parse_error),
            _ if is_yaml(path) => serde_yaml::from_str(&text).map_err(|e| parse_error(e.to_string())),
            _ => serde_json::from_str(&text).map_err(|e| parse_error(e.to_string())),
        }
    }

    /// First line is a header and is skipped.
    pub fn parse_csv(text: &str) -> Result<Self, String> {
        let mut weights = BTreeMap::new();
        for (lineno, line) in text.lines().enumerate().skip(1) {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut fields = line.splitn(2, ',');
            let name = fields.next().unwrap_or_default().trim().trim_matches('"');
            let weight = fields
                .next()
                .map(|w| w.trim().trim_matches('"'))
                .ok_or_else(|| format!("line {}: missing weight", lineno + 1))?;
            let weight: i64 =
                weight.parse().map_err(|e| format!("line {}: bad weight `{weight}`: {e}", lineno + 1))?;
            weights.insert(name.to_string(), weight);
        }
        Ok(Self { weights })
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn weight(&self, name: &str) -> Option<i64> {
        self.weights.get(name).copied()
    }

    pub fn bonus(&self, result: &AnalysisResult) -> i64 {
        let names: BTreeSet<&str> = result.all_paths().map(|p| p.name.as_str()).collect();
        names.into_iter().filter_map(|name| self.weight(name)).sum()
    }

    /// Add the bonus to `ret_code`; returns the bonus applied.
    pub fn apply(&self, result: &mut AnalysisResult) -> i64 {
        let bonus = self.bonus(result);
        let total = i64::from(result.ret_code).saturating_add(bonus);
        result.ret_code = total.clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32;
        bonus
    }
}

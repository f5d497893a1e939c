//! IOCTL-code comparison scraping over rendered pseudocode.
//!
//! Three independent passes run over the lines of one function and their results are unioned:
//! direct comparisons against the IOCTL code variable, `case` labels of a switch, and the
//! subtract-and-test chains compilers emit for dense switch ranges.

use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::backends::DecompilerOracle;
use crate::model::{ComparisonOp, ComparisonRecord};

/// Literals up to this value are loop counters and small flags, never IOCTL codes.
pub const MIN_IOCTL_VALUE: u64 = 16;

/// Literals above this reset the running base of an incremental chain.
const INCREMENTAL_BASE_THRESHOLD: u64 = 0xFF;

fn direct_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"IoControlCode[_a-zA-Z0-9]*\s*(==|!=|<=|>=|<|>)\s*(0[xX][0-9a-fA-F]+|-?\d+)").ok()
    })
    .as_ref()
}

fn case_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"case (0[xX][0-9a-fA-F]+|-?\d+)u?:").ok()).as_ref()
}

fn incremental_pattern() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"IoControlCode\s*=.*IoControlCode\s*([-+])\s*(0[xX][0-9a-fA-F]+|-?\d+)").ok()
    })
    .as_ref()
}

/// Parse a hex or (possibly negative) decimal literal, reduced to 32 bits.
pub fn parse_literal(text: &str) -> Option<u64> {
    let value = if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()?
    } else {
        text.parse::<i64>().ok()? as u64
    };
    Some(value & 0xFFFF_FFFF)
}

fn keep(value: u64) -> bool {
    value > MIN_IOCTL_VALUE
}

pub fn direct_comparisons<S: AsRef<str>>(lines: &[S]) -> BTreeSet<ComparisonRecord> {
    let mut found = BTreeSet::new();
    let Some(pattern) = direct_pattern() else {
        return found;
    };
    for line in lines {
        let line = line.as_ref();
        let Some(caps) = pattern.captures(line) else {
            continue;
        };
        let (Some(op), Some(value)) = (
            caps.get(1).and_then(|m| ComparisonOp::parse(m.as_str())),
            caps.get(2).and_then(|m| parse_literal(m.as_str())),
        ) else {
            continue;
        };
        if keep(value) {
            found.insert(ComparisonRecord::new(op, value, line.trim()));
        }
    }
    found
}

pub fn switch_comparisons<S: AsRef<str>>(lines: &[S]) -> BTreeSet<ComparisonRecord> {
    let mut found = BTreeSet::new();
    let Some(pattern) = case_pattern() else {
        return found;
    };
    if !lines.iter().any(|line| line.as_ref().contains("switch")) {
        return found;
    }
    for line in lines {
        let line = line.as_ref();
        let Some(value) = pattern
            .captures(line)
            .and_then(|caps| caps.get(1))
            .and_then(|m| parse_literal(m.as_str()))
        else {
            continue;
        };
        if keep(value) {
            found.insert(ComparisonRecord::new(ComparisonOp::Eq, value, line.trim()));
        }
    }
    found
}

/// Heuristic: follows `x = IoControlCode - delta` chains with a running base. Not a sound
/// data-flow computation; a large literal restarts the chain.
pub fn incremental_comparisons<S: AsRef<str>>(lines: &[S]) -> BTreeSet<ComparisonRecord> {
    let Some(pattern) = incremental_pattern() else {
        return BTreeSet::new();
    };
    let (_, found) = lines.iter().fold(
        (None::<u64>, BTreeSet::new()),
        |(base, mut found), line| {
            let line = line.as_ref();
            let Some(caps) = pattern.captures(line) else {
                return (base, found);
            };
            let (Some(op), Some(value)) =
                (caps.get(1).map(|m| m.as_str()), caps.get(2).and_then(|m| parse_literal(m.as_str())))
            else {
                return (base, found);
            };
            let base = if value > INCREMENTAL_BASE_THRESHOLD {
                Some(value)
            } else {
                match (op, base) {
                    ("-", Some(b)) => Some(b.wrapping_sub(value) & 0xFFFF_FFFF),
                    ("+", Some(b)) => Some(b.wrapping_add(value) & 0xFFFF_FFFF),
                    _ => {
                        tracing::debug!(op, line, "incremental IOCTL step without a base");
                        base
                    }
                }
            };
            if let Some(current) = base.filter(|v| keep(*v)) {
                found.insert(ComparisonRecord::new(ComparisonOp::Eq, current, line.trim()));
            }
            (base, found)
        },
    );
    found
}

/// Union of all three passes over the lines of one function.
pub fn extract_comparisons<S: AsRef<str>>(lines: &[S]) -> BTreeSet<ComparisonRecord> {
    let mut found = direct_comparisons(lines);
    found.extend(switch_comparisons(lines));
    found.extend(incremental_comparisons(lines));
    found
}

/// Decompile every location (once per containing function) and scrape its comparisons.
pub fn search_all_comparisons(
    oracle: &mut dyn DecompilerOracle,
    locations: impl IntoIterator<Item = u64>,
) -> BTreeSet<ComparisonRecord> {
    let mut functions = BTreeSet::new();
    for loc in locations {
        functions.insert(oracle.function_start(loc).unwrap_or(loc));
    }

    let mut found = BTreeSet::new();
    for func in functions {
        tracing::debug!(func = format_args!("{func:#x}"), "scanning for IOCTL comparisons");
        match oracle.decompile(func) {
            Ok(cfunc) => found.extend(extract_comparisons(&cfunc.lines())),
            Err(err) => tracing::debug!(%err, "skipping comparison scan"),
        }
    }
    found
}

use std::path::Path;

use anyhow::{anyhow, Result};
use pathfinder_core::services::analysis::read_result_file;
use pathfinder_core::services::ioctl::{decode_ioctl, seed_candidates};

use crate::parse_number;

/// Print the IOCTL comparisons stored in a result file.
pub fn comparisons_command(result_path: &Path, json: bool) -> Result<()> {
    let result = read_result_file(result_path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result.ioctl_comp)?);
        return Ok(());
    }
    println!("IOCTL comparisons:");
    if result.ioctl_comp.is_empty() {
        println!("(none)");
    }
    for cmp in &result.ioctl_comp {
        println!("- {} {:#x}  {}", cmp.op, cmp.val, cmp.line.trim());
    }
    Ok(())
}

/// Print the per-handler call trees stored in a result file.
pub fn tree_command(result_path: &Path, json: bool) -> Result<()> {
    let result = read_result_file(result_path)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result.function_trees)?);
        return Ok(());
    }
    if result.function_trees.is_empty() {
        println!("No handler trees.");
    }
    for tree in &result.function_trees {
        print!("{tree}");
    }
    println!("Combined sub-functions: {}", result.combined_sub_functions);
    Ok(())
}

/// Decode an IOCTL code into its `CTL_CODE` fields.
pub fn decode_command(code: &str, json: bool) -> Result<()> {
    let value = parse_number(code)?;
    let decoded = decode_ioctl(value).ok_or_else(|| anyhow!("Invalid IOCTL code: {code}"))?;
    if json {
        println!("{}", serde_json::to_string_pretty(&decoded)?);
    } else {
        println!("{decoded}");
    }
    Ok(())
}

/// Derive fuzzing seed codes from the comparisons in a result file.
pub fn seeds_command(result_path: &Path, json: bool) -> Result<()> {
    let result = read_result_file(result_path)?;
    let seeds: Vec<String> = seed_candidates(&result.ioctl_comp).iter().map(|s| format!("{s:#x}")).collect();
    if json {
        println!("{}", serde_json::to_string_pretty(&seeds)?);
    } else {
        for seed in seeds {
            println!("{seed}");
        }
    }
    Ok(())
}

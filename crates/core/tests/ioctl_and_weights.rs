use std::collections::BTreeMap;
use std::fs;

use tempfile::tempdir;

use pathfinder_core::model::{AnalysisResult, ComparisonOp, ComparisonRecord, PathReport};
use pathfinder_core::services::ioctl::{decode_ioctl, seed_candidates, RequiredAccess, TransferMethod};
use pathfinder_core::services::InterestWeights;

/// `0x9C402580` is a vendor code on a 0x9C40 device with buffered I/O.
#[test]
fn decode_splits_ctl_code_fields() {
    let decoded = decode_ioctl(0x9C40_2580).expect("valid code");
    assert_eq!(decoded.device_type, 0x9C40 & 0xFFF);
    assert_eq!(decoded.function, 0x960);
    assert_eq!(decoded.method, TransferMethod::MethodBuffered);
    assert_eq!(decoded.access, RequiredAccess::FileAnyAccess);
    assert!(decoded.common);
}

#[test]
fn decode_names_well_known_device_types() {
    let decoded = decode_ioctl(0x0022_2004).expect("valid code");
    assert_eq!(decoded.device_type, 0x22);
    assert_eq!(decoded.device_name, Some("UNKNOWN"));
    assert_eq!(decoded.function, 0x801);
    assert!(!decoded.common);

    let rendered = decoded.to_string();
    assert!(rendered.starts_with("Device: UNKNOWN (0x022)"));
    assert!(rendered.contains("Function: 0x801"));
    assert!(rendered.ends_with("Common Bit: 0"));
}

#[test]
fn decode_rejects_zero_and_wide_values() {
    assert!(decode_ioctl(0).is_none());
    assert!(decode_ioctl(0x1_0000_0000).is_none());
}

/// Range comparisons also yield the code one function step past the bound.
#[test]
fn seeds_expand_range_comparisons() {
    let records = [
        ComparisonRecord::new(ComparisonOp::Eq, 0x222004, ""),
        ComparisonRecord::new(ComparisonOp::Gt, 0x222010, ""),
        ComparisonRecord::new(ComparisonOp::Le, 0x222100, ""),
        ComparisonRecord::new(ComparisonOp::Ne, 0x333333, ""),
    ];
    let seeds: Vec<u32> = seed_candidates(&records).into_iter().collect();
    assert_eq!(seeds, vec![0x222004, 0x222010, 0x222014, 0x2220FC, 0x222100]);
}

fn result_with_paths(names: &[&str]) -> AnalysisResult {
    AnalysisResult {
        ret_code: 200,
        target_paths: names
            .iter()
            .enumerate()
            .map(|(i, name)| PathReport { path: vec![0x10, i as u64], name: name.to_string(), context: None })
            .collect(),
        ..AnalysisResult::default()
    }
}

/// Each distinct reached name counts once toward the bonus.
#[test]
fn bonus_sums_distinct_names() {
    let weights = InterestWeights::new(BTreeMap::from([
        ("MmMapIoSpace".to_string(), 50),
        ("__readmsr".to_string(), 20),
    ]));
    let mut result = result_with_paths(&["MmMapIoSpace", "MmMapIoSpace", "__readmsr", "ZwOpenSection"]);
    assert_eq!(weights.bonus(&result), 70);
    assert_eq!(weights.apply(&mut result), 70);
    assert_eq!(result.ret_code, 270);
}

#[test]
fn csv_weights_skip_header() {
    let weights = InterestWeights::parse_csv("name,weight\nMmMapIoSpace,50\n\"__readmsr\", -5\n").expect("csv");
    assert_eq!(weights.len(), 2);
    assert_eq!(weights.weight("__readmsr"), Some(-5));
    assert!(InterestWeights::parse_csv("name,weight\nMmMapIoSpace\n").is_err());
}

#[test]
fn weights_load_by_extension() {
    let dir = tempdir().expect("tempdir");
    let yaml = dir.path().join("weights.yaml");
    fs::write(&yaml, "MmMapIoSpace: 50\nIoAllocateMdl: 10\n").expect("write yaml");
    let json = dir.path().join("weights.json");
    fs::write(&json, r#"{"MmMapIoSpace": 7}"#).expect("write json");
    let csv = dir.path().join("weights.csv");
    fs::write(&csv, "name,weight\nMmMapIoSpace,3\n").expect("write csv");

    assert_eq!(InterestWeights::load(&yaml).expect("yaml").weight("IoAllocateMdl"), Some(10));
    assert_eq!(InterestWeights::load(&json).expect("json").weight("MmMapIoSpace"), Some(7));
    assert_eq!(InterestWeights::load(&csv).expect("csv").weight("MmMapIoSpace"), Some(3));
    assert!(InterestWeights::load(&dir.path().join("missing.csv")).is_err());
}

use serde::{Deserialize, Serialize};

use crate::model::HandlerKind;

/// One analyzed driver as stored in the `driver_runs` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriverRunRecord {
    /// Driver file name as given on the command line.
    pub driver: String,
    /// SHA-256 of the analyzed input, if it could be read.
    pub driver_hash: Option<String>,
    /// Final status, including any weight bonus.
    pub ret_code: i32,
    pub weight_bonus: i64,
    pub handler_type: HandlerKind,
    pub handler_count: usize,
    pub path_count: usize,
    pub started_at: String,
    pub finished_at: String,
}

impl DriverRunRecord {
    pub fn new(driver: impl Into<String>, ret_code: i32) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            driver: driver.into(),
            driver_hash: None,
            ret_code,
            weight_bonus: 0,
            handler_type: HandlerKind::Unknown,
            handler_count: 0,
            path_count: 0,
            started_at: now.clone(),
            finished_at: now,
        }
    }
}

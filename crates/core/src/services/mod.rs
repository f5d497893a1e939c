//! Services that sit on top of the analysis engine: the per-driver orchestrator, batch
//! execution, result scoring and IOCTL code helpers.

pub mod analysis;
pub mod ioctl;
#[cfg(feature = "pe-probe")]
pub mod pe;
pub mod runner;
pub mod weights;

pub use analysis::{AnalysisError, DriverAnalyzer};
pub use runner::{BatchRunner, DriverOutcome};
pub use weights::InterestWeights;

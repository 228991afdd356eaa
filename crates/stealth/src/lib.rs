pub mod detection;
pub mod engine;

pub use detection::{clone_detection_report, CloneReport, CloneRisk};
pub use engine::{StealthEngine, StealthPlan};

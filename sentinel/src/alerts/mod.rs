mod buffer;
mod summary;

pub use buffer::{AlertBuffer, AlertRecord, Snapshot, DEFAULT_CAPACITY};
pub use summary::{total_alerts, Baseline, RuleBreach, Summary};

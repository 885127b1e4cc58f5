pub mod alerts;
pub mod dashboard;
pub mod feed;

pub use alerts::{AlertBuffer, Baseline, Summary};
pub use dashboard::{Dashboard, DashboardOptions, DashboardView};
pub use feed::{AlertEvent, ConnectionManager, ConnectionState};

pub mod health;
pub mod schedule;
pub mod status;
pub mod task;

pub use health::{HealthRecord, HealthStatus};
pub use schedule::{MissedStrategy, ScheduleRecord};
pub use status::StatusReport;
pub use task::{TaskRecord, TaskStatus};

//! Scheduler - cron-driven recurring scans

mod recurrence;
mod scheduler;

pub use recurrence::Recurrence;
pub use scheduler::Scheduler;

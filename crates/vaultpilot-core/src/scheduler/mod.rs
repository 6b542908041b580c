//! Cron-like scheduler with missed-firing recovery.

mod cron;
mod service;

pub use cron::{CronError, CronExpr, ScheduleTimezone};
pub use service::{Decision, FireOutcome, FireResult, Scheduler, SchedulerConfig, TickReport};

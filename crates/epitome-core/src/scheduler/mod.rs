mod service;

pub use service::{LastRun, SchedulerService};

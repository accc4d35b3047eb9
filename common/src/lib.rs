pub mod config;
pub mod error;
pub mod job;
pub mod planner;
pub mod report;
pub mod results;
pub mod stats;
pub mod task;
pub mod worker;

pub use config::{Backoff, RetryPolicy, RunConfig};
pub use error::{AggregationError, ChannelError, ConfigError, DispatchError, RunError};
pub use job::Job;
pub use planner::{normalize_url, plan_jobs, shuffle, JobPlan};
pub use report::Report;
pub use results::ResultStore;
pub use stats::{aggregate, TargetStats};
pub use task::{Ticket, TicketId};
pub use worker::{Outcome, WorkerId, TIMEOUT_ENV};

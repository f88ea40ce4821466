pub mod activity;
pub mod client;
pub mod error;
/// Submit-then-poll protocol for long-running activities: a spawned task per
/// poll, cancelled through the handle it returns.
pub mod poller;
pub mod query;
pub mod service;

pub use activity::{Activity, ActivityId, ActivityStatus, InstanceId, OutputSpec};
pub use client::{Client, ExecutionService};
pub use error::{ClientError, PollError, RunError, SubmissionError};
pub use poller::{CancellationHandle, PollOptions, Poller};
pub use query::build_result_query;
pub use service::{categorize_services, Action, Instance, Service, ServiceId};

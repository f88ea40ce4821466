use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::{
    activity::{Activity, ActivityId, InstanceId, OutputSpec, SubmitActivityRequest},
    client::ExecutionService,
    error::{ClientError, PollError, RunError, SubmissionError},
    service::{Instance, NewInstance, ServiceId},
};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct PollOptions {
    pub poll_interval: Duration,
    /// Measured from the `await_completion` call. `None` polls until terminal.
    pub timeout: Option<Duration>,
    /// Retries allowed after a transport failure before giving up. `None` retries forever.
    pub max_retries: Option<u32>,
    pub max_backoff: Duration,
    /// Randomise each backoff delay within its upper half.
    pub jitter: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
            max_retries: None,
            max_backoff: DEFAULT_MAX_BACKOFF,
            jitter: false,
        }
    }
}

/// Exponential backoff starting at the poll interval, capped at `max`.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
    pub jitter: bool,
}

impl Backoff {
    pub fn new(options: &PollOptions) -> Self {
        Self {
            base: options.poll_interval,
            max: options.max_backoff,
            jitter: options.jitter,
        }
    }

    /// Delay after the `failures`-th consecutive failure (1-based).
    pub fn delay(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        let delay = self
            .base
            .checked_mul(1u32 << exponent)
            .unwrap_or(self.max)
            .min(self.max);
        if !self.jitter {
            return delay;
        }
        let hi = delay.as_millis() as u64;
        let lo = hi / 2;
        Duration::from_millis(rand::rng().random_range(lo..=hi))
    }
}

/// Where a poll stands after observing one snapshot.
#[derive(Debug)]
pub enum PollState {
    Polling { consecutive_failures: u32 },
    Done(Activity),
    Failed(PollError),
}

impl PollState {
    /// Applies one fetch result. `failures` is the count of consecutive
    /// transport failures before this tick.
    pub fn advance(
        activity_id: &ActivityId,
        snapshot: Result<Vec<Activity>, ClientError>,
        failures: u32,
        max_retries: Option<u32>,
    ) -> PollState {
        match snapshot {
            Ok(activities) => {
                match activities
                    .into_iter()
                    .find(|a| &a.activity_id == activity_id)
                {
                    None => PollState::Failed(PollError::NotFound(activity_id.clone())),
                    Some(activity) if activity.is_terminal() => PollState::Done(activity),
                    Some(_) => PollState::Polling {
                        consecutive_failures: 0,
                    },
                }
            }
            Err(err) => {
                let attempts = failures + 1;
                match max_retries {
                    Some(max) if attempts > max => PollState::Failed(PollError::Unreachable {
                        attempts,
                        last_error: err,
                    }),
                    _ => {
                        warn!(%activity_id, attempt = attempts, error = %err, "activity poll failed, backing off");
                        PollState::Polling {
                            consecutive_failures: attempts,
                        }
                    }
                }
            }
        }
    }
}

/// Bookkeeping for one poll: deadline, backoff and the failure streak.
struct PollRun<'a> {
    activity_id: &'a ActivityId,
    options: &'a PollOptions,
    started: Instant,
    backoff: Backoff,
    failures: u32,
}

impl<'a> PollRun<'a> {
    fn new(activity_id: &'a ActivityId, options: &'a PollOptions, started: Instant) -> Self {
        Self {
            activity_id,
            options,
            started,
            backoff: Backoff::new(options),
            failures: 0,
        }
    }

    fn remaining(&self) -> Option<Duration> {
        self.options
            .timeout
            .map(|timeout| timeout.saturating_sub(self.started.elapsed()))
    }

    fn timed_out(&self) -> PollError {
        let elapsed = self.started.elapsed();
        warn!(activity_id = %self.activity_id, ?elapsed, "activity poll timed out");
        PollError::Timeout {
            activity_id: self.activity_id.clone(),
            elapsed,
        }
    }

    /// One fetch of the activity list, bounded by what is left of the timeout.
    async fn fetch<S>(
        &self,
        service: &S,
    ) -> Result<Result<Vec<Activity>, ClientError>, PollError>
    where
        S: ExecutionService + ?Sized,
    {
        match self.remaining() {
            Some(remaining) if remaining.is_zero() => Err(self.timed_out()),
            Some(remaining) => tokio::time::timeout(remaining, service.list_activities())
                .await
                .map_err(|_| self.timed_out()),
            None => Ok(service.list_activities().await),
        }
    }

    /// Applies a fetched snapshot: either the poll is over, or it continues
    /// after the returned delay.
    fn advance(
        &mut self,
        snapshot: Result<Vec<Activity>, ClientError>,
    ) -> ControlFlow<Result<Activity, PollError>, Duration> {
        let activity_id = self.activity_id;
        let state = PollState::advance(
            activity_id,
            snapshot,
            self.failures,
            self.options.max_retries,
        );
        let delay = match state {
            PollState::Done(activity) => {
                info!(%activity_id, status = %activity.status, "activity reached terminal state");
                return ControlFlow::Break(Ok(activity));
            }
            PollState::Failed(err) => {
                warn!(%activity_id, error = %err, "activity poll failed");
                return ControlFlow::Break(Err(err));
            }
            PollState::Polling {
                consecutive_failures: 0,
            } => {
                self.failures = 0;
                self.options.poll_interval
            }
            PollState::Polling {
                consecutive_failures,
            } => {
                self.failures = consecutive_failures;
                self.backoff.delay(consecutive_failures)
            }
        };

        let delay = match self.remaining() {
            Some(remaining) => delay.min(remaining),
            None => delay,
        };
        debug!(%activity_id, delay_ms = delay.as_millis() as u64, "next activity poll");
        ControlFlow::Continue(delay)
    }
}

const ACTIVE: u8 = 0;
const DELIVERED: u8 = 1;
const CANCELLED: u8 = 2;

#[derive(Debug)]
struct Signal {
    state: AtomicU8,
    wake: Notify,
}

impl Signal {
    fn new() -> Self {
        Self {
            state: AtomicU8::new(ACTIVE),
            wake: Notify::new(),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.state.load(Ordering::Acquire) == CANCELLED
    }

    fn cancel(&self) -> bool {
        let won = self
            .state
            .compare_exchange(ACTIVE, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if won {
            self.wake.notify_one();
        }
        won
    }

    /// Claims the right to run the continuation. Loses to an earlier `cancel`.
    fn claim_delivery(&self) -> bool {
        self.state
            .compare_exchange(ACTIVE, DELIVERED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Returned by `await_completion`. Dropping it detaches the poll; it does not cancel.
#[derive(Debug)]
pub struct CancellationHandle {
    activity_id: ActivityId,
    signal: Arc<Signal>,
    task: JoinHandle<()>,
}

impl CancellationHandle {
    /// Stops future ticks. Once this returns, the continuation will not be
    /// invoked. No-op if the poll already reached a terminal state.
    pub fn cancel(&self) {
        if self.signal.cancel() {
            info!(activity_id = %self.activity_id, "activity poll cancelled");
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Waits for the polling task to exit, whichever way it ends.
    pub async fn join(self) {
        let _ = self.task.await;
    }
}

/// Submits operations to the execution service and follows them to completion.
pub struct Poller<S> {
    service: Arc<S>,
}

impl<S> Clone for Poller<S> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
        }
    }
}

impl<S> Poller<S>
where
    S: ExecutionService + 'static,
{
    pub fn new(service: S) -> Self {
        Self {
            service: Arc::new(service),
        }
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub async fn submit_operation(
        &self,
        instance_id: InstanceId,
        operation_name: impl Into<String>,
        input_query: impl Into<String>,
        output: OutputSpec,
    ) -> Result<ActivityId, SubmissionError> {
        let request = SubmitActivityRequest::new(instance_id, operation_name, input_query, output);
        if request.instance_id.as_str().is_empty() {
            return Err(SubmissionError::InvalidRequest("instance id is empty".into()));
        }
        if request.operation_name.trim().is_empty() {
            return Err(SubmissionError::InvalidRequest("operation name is empty".into()));
        }

        let instance_id = request.instance_id.clone();
        let operation = request.operation_name.clone();
        let res = self
            .service
            .submit_activity(request)
            .await
            .map_err(SubmissionError::Rejected)?;

        info!(activity_id = %res.activity_id, %instance_id, %operation, "submitted operation");
        Ok(res.activity_id)
    }

    /// Polls `activity_id` on a spawned task and calls `on_complete` exactly
    /// once with the terminal record or the reason polling gave up, unless
    /// the returned handle is cancelled first.
    pub fn await_completion<F>(
        &self,
        activity_id: ActivityId,
        options: PollOptions,
        on_complete: F,
    ) -> CancellationHandle
    where
        F: FnOnce(Result<Activity, PollError>) + Send + 'static,
    {
        let started = Instant::now();
        let signal = Arc::new(Signal::new());
        let poller = self.clone();
        let task_signal = signal.clone();
        let task_id = activity_id.clone();

        let task = tokio::task::spawn(async move {
            let outcome = poller
                .drive(&task_id, &options, started, &task_signal)
                .await;
            let Some(outcome) = outcome else {
                debug!(activity_id = %task_id, "poll stopped before a terminal state");
                return;
            };
            if task_signal.claim_delivery() {
                on_complete(outcome);
            }
        });

        CancellationHandle {
            activity_id,
            signal,
            task,
        }
    }

    /// Inline form of `await_completion` for callers already on a task.
    pub async fn poll_until_terminal(
        &self,
        activity_id: &ActivityId,
        options: &PollOptions,
    ) -> Result<Activity, PollError> {
        let mut run = PollRun::new(activity_id, options, Instant::now());
        loop {
            let snapshot = run.fetch(self.service.as_ref()).await?;
            match run.advance(snapshot) {
                ControlFlow::Break(outcome) => return outcome,
                ControlFlow::Continue(delay) => tokio::time::sleep(delay).await,
            }
        }
    }

    /// Submits an operation and waits for it to reach a terminal state.
    pub async fn run_when_complete(
        &self,
        instance_id: InstanceId,
        operation_name: impl Into<String>,
        input_query: impl Into<String>,
        output: OutputSpec,
        options: &PollOptions,
    ) -> Result<Activity, RunError> {
        let activity_id = self
            .submit_operation(instance_id, operation_name, input_query, output)
            .await?;
        Ok(self.poll_until_terminal(&activity_id, options).await?)
    }

    /// Reuses an instance of `service_id` called `name`, creating it if absent.
    pub async fn ensure_instance(
        &self,
        service_id: &ServiceId,
        name: &str,
    ) -> Result<Instance, ClientError> {
        let existing = self
            .service
            .list_instances()
            .await?
            .into_iter()
            .find(|i| &i.service_id == service_id && i.name == name);
        if let Some(instance) = existing {
            debug!(instance_id = %instance.id, "reusing instance");
            return Ok(instance);
        }

        let instance = self
            .service
            .create_instance(NewInstance {
                name: name.to_string(),
                service_id: service_id.clone(),
            })
            .await?;
        info!(instance_id = %instance.id, %service_id, "created instance");
        Ok(instance)
    }

    /// The cancellable polling loop. `None` means the signal was cancelled.
    async fn drive(
        &self,
        activity_id: &ActivityId,
        options: &PollOptions,
        started: Instant,
        signal: &Signal,
    ) -> Option<Result<Activity, PollError>> {
        let mut run = PollRun::new(activity_id, options, started);

        loop {
            if signal.is_cancelled() {
                return None;
            }

            let fetched = run.fetch(self.service.as_ref()).await;
            // A fetch that resolves after cancellation is discarded.
            if signal.is_cancelled() {
                return None;
            }
            let snapshot = match fetched {
                Ok(snapshot) => snapshot,
                Err(err) => return Some(Err(err)),
            };

            let delay = match run.advance(snapshot) {
                ControlFlow::Break(outcome) => return Some(outcome),
                ControlFlow::Continue(delay) => delay,
            };

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = signal.wake.notified() => {}
            }
        }
    }
}

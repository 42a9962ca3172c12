//! Generic asynchronous job poller.
//!
//! A [`PollTask`] waits for a backend job to materialize its result by
//! repeatedly calling a read-only check endpoint. The gallery, podcast and
//! presentation features all drive the same loop with different
//! [`PollConfig`]s (see [`crate::features`]).
//!
//! Each iteration sleeps for the configured interval and then checks:
//!
//! - a non-empty 2xx body ends the loop with [`PollOutcome::Ready`]
//! - the not-ready sentinel status (or an empty body) keeps polling
//! - any other failure ends the loop with [`PollOutcome::Failed`]
//!
//! Every `retrigger_every` not-ready attempts the task may re-issue the
//! triggering request, at most `max_retriggers` times. A failing
//! re-trigger is logged and polling continues.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::gateway::{Endpoint, Payload, RemoteCall, ResponseBody, TimeoutClass};

/// Attempt budget and re-trigger policy for one poll loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollConfig {
    pub max_attempts: u32,
    /// Delay before every check, in milliseconds.
    pub interval_ms: u64,
    /// Re-trigger after every this many not-ready attempts. `0` disables re-triggering.
    #[serde(default)]
    pub retrigger_every: u32,
    #[serde(default)]
    pub max_retriggers: u32,
    /// Status the check endpoint uses for "job exists, result not ready yet".
    #[serde(default = "default_not_ready_status")]
    pub not_ready_status: u16,
    #[serde(default = "default_check_timeout")]
    pub check_timeout: TimeoutClass,
}

fn default_not_ready_status() -> u16 {
    404
}

fn default_check_timeout() -> TimeoutClass {
    TimeoutClass::Standard
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            interval_ms: 2000,
            retrigger_every: 0,
            max_retriggers: 0,
            not_ready_status: default_not_ready_status(),
            check_timeout: default_check_timeout(),
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    /// Upper bound on the time spent sleeping between checks.
    pub fn wall_clock_ceiling(&self) -> Duration {
        self.interval() * self.max_attempts
    }
}

/// The request re-issued when a job looks stalled.
#[derive(Debug, Clone, PartialEq)]
pub struct Retrigger {
    pub endpoint: Endpoint,
    pub payload: Payload,
    pub timeout: TimeoutClass,
}

/// Terminal (or pending) state of a poll loop.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Pending,
    Ready(ResponseBody),
    Failed(String),
    /// The attempt budget ran out. The job may still finish later.
    TimedOut,
    Cancelled,
}

impl PollOutcome {
    pub fn is_pending(&self) -> bool {
        matches!(self, PollOutcome::Pending)
    }

    pub fn is_ready(&self) -> bool {
        matches!(self, PollOutcome::Ready(_))
    }
}

/// Progress of a running poll loop, handed to observers after every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollProgress {
    pub attempt: u32,
    pub max_attempts: u32,
    pub retriggers: u32,
}

/// Mutable state of one poll loop.
#[derive(Debug)]
pub struct PollTask {
    check: Endpoint,
    check_payload: Payload,
    retrigger: Option<Retrigger>,
    config: PollConfig,
    attempts: u32,
    retriggers: u32,
    outcome: PollOutcome,
}

impl PollTask {
    pub fn new(check: Endpoint, config: PollConfig) -> Self {
        Self {
            check,
            check_payload: Payload::Empty,
            retrigger: None,
            config,
            attempts: 0,
            retriggers: 0,
            outcome: PollOutcome::Pending,
        }
    }

    pub fn with_check_payload(mut self, payload: Payload) -> Self {
        self.check_payload = payload;
        self
    }

    pub fn with_retrigger(mut self, retrigger: Retrigger) -> Self {
        self.retrigger = Some(retrigger);
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retriggers(&self) -> u32 {
        self.retriggers
    }

    pub fn outcome(&self) -> &PollOutcome {
        &self.outcome
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Record the outcome. Once it leaves `Pending` it never changes again.
    fn settle(&mut self, outcome: PollOutcome) {
        if self.outcome.is_pending() {
            self.outcome = outcome;
        }
    }

    fn progress(&self) -> PollProgress {
        PollProgress {
            attempt: self.attempts,
            max_attempts: self.config.max_attempts,
            retriggers: self.retriggers,
        }
    }

    /// One immediate check without sleeping first. Counts as an attempt.
    ///
    /// Returns `true` if the task settled (ready or failed).
    pub async fn check_now<G: RemoteCall>(&mut self, gateway: &G) -> bool {
        if !self.outcome.is_pending() {
            return true;
        }
        if self.attempts >= self.config.max_attempts {
            self.settle(PollOutcome::TimedOut);
            return true;
        }
        self.attempts += 1;
        match gateway
            .call(&self.check, &self.check_payload, self.config.check_timeout)
            .await
        {
            Ok(body) if !body.is_empty() => {
                self.settle(PollOutcome::Ready(body));
                true
            }
            Ok(_) => false,
            Err(e) if e.is_status(self.config.not_ready_status) => false,
            Err(e) => {
                self.settle(PollOutcome::Failed(e.to_string()));
                true
            }
        }
    }

    async fn maybe_retrigger<G: RemoteCall>(&mut self, gateway: &G) {
        let Some(retrigger) = &self.retrigger else {
            return;
        };
        let every = self.config.retrigger_every;
        if every == 0 || self.attempts % every != 0 || self.retriggers >= self.config.max_retriggers {
            return;
        }
        self.retriggers += 1;
        info!(
            endpoint = %retrigger.endpoint,
            attempt = self.attempts,
            retrigger = self.retriggers,
            "still waiting, re-triggering job"
        );
        if let Err(e) = gateway
            .call(&retrigger.endpoint, &retrigger.payload, retrigger.timeout)
            .await
        {
            warn!(endpoint = %retrigger.endpoint, error = %e, "re-trigger failed, continuing to poll");
        }
    }

    /// Run the loop until the outcome leaves `Pending`.
    ///
    /// `observe` is called after every attempt. Cancellation is checked
    /// before every sleep and interrupts the sleep itself; an in-flight check
    /// call is allowed to finish.
    pub async fn run<G, F>(&mut self, gateway: &G, cancel: &CancellationToken, mut observe: F) -> &PollOutcome
    where
        G: RemoteCall,
        F: FnMut(PollProgress),
    {
        while self.outcome.is_pending() {
            if self.attempts >= self.config.max_attempts {
                info!(endpoint = %self.check, attempts = self.attempts, "poll budget exhausted");
                self.settle(PollOutcome::TimedOut);
                break;
            }
            if cancel.is_cancelled() {
                self.settle(PollOutcome::Cancelled);
                break;
            }

            tokio::select! {
                () = cancel.cancelled() => {
                    self.settle(PollOutcome::Cancelled);
                    break;
                }
                () = tokio::time::sleep(self.config.interval()) => {}
            }

            let settled = self.check_now(gateway).await;
            debug!(
                endpoint = %self.check,
                attempt = self.attempts,
                max_attempts = self.config.max_attempts,
                settled,
                "poll attempt"
            );
            observe(self.progress());
            if !settled {
                self.maybe_retrigger(gateway).await;
            }
        }
        &self.outcome
    }
}

/// Poll `check` once per `config.interval_ms` until ready, failed, timed out
/// or cancelled.
pub async fn poll<G: RemoteCall>(
    gateway: &G,
    check: Endpoint,
    config: PollConfig,
    retrigger: Option<Retrigger>,
    cancel: &CancellationToken,
) -> PollOutcome {
    let mut task = PollTask::new(check, config);
    if let Some(r) = retrigger {
        task = task.with_retrigger(r);
    }
    task.run(gateway, cancel, |_| {}).await.clone()
}

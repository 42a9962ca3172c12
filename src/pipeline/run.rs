use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::job::PresentationResult;

/// Identifies one pipeline run and carries its cancellation signal.
///
/// Clones share the same cancellation state. A run's updates are applied
/// only while its token is active.
#[derive(Debug, Clone)]
pub struct RunToken {
    id: Uuid,
    cancel: CancellationToken,
}

impl RunToken {
    pub fn new() -> Self {
        Self {
            id: Uuid::new_v4(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_active(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// A token cancelled together with this one, for child tasks.
    pub fn child(&self) -> CancellationToken {
        self.cancel.child_token()
    }
}

impl Default for RunToken {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for RunToken {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for RunToken {}

/// An optional stage that failed without stopping the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageWarning {
    pub stage: String,
    pub message: String,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunOutcome {
    Running,
    Succeeded { artifact_name: String },
    Failed { stage: Option<String>, message: String },
    Cancelled,
}

impl RunOutcome {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunOutcome::Running)
    }
}

/// Mutable state of one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    /// Index of the stage currently running (or last run).
    pub stage_index: usize,
    pub stages_completed: Vec<String>,
    percent: u8,
    pub status: String,
    pub warnings: Vec<StageWarning>,
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    started: Instant,
    finished: Option<Instant>,
}

impl PipelineRun {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            stage_index: 0,
            stages_completed: Vec::new(),
            percent: 0,
            status: "Starting...".to_string(),
            warnings: Vec::new(),
            outcome: RunOutcome::Running,
            started_at: Utc::now(),
            started: Instant::now(),
            finished: None,
        }
    }

    pub fn percent(&self) -> u8 {
        self.percent
    }

    /// Move the progress forward. Lower values are ignored so the reported
    /// percentage never goes backwards.
    pub fn advance_to(&mut self, percent: u8) {
        if self.outcome.is_terminal() {
            return;
        }
        self.percent = self.percent.max(percent.min(100));
    }

    /// Time since the run started, frozen once it finished.
    pub fn elapsed(&self) -> Duration {
        match self.finished {
            Some(end) => end.duration_since(self.started),
            None => self.started.elapsed(),
        }
    }

    pub fn succeed(&mut self, result: &PresentationResult) {
        if self.outcome.is_terminal() {
            return;
        }
        self.percent = 100;
        self.status = "Presentation ready".to_string();
        self.outcome = RunOutcome::Succeeded {
            artifact_name: result.artifact_name.clone(),
        };
        self.finished = Some(Instant::now());
    }

    pub fn fail(&mut self, stage: Option<String>, message: String) {
        if self.outcome.is_terminal() {
            return;
        }
        self.status = message.clone();
        self.outcome = RunOutcome::Failed { stage, message };
        self.finished = Some(Instant::now());
    }

    pub fn cancel(&mut self) {
        if self.outcome.is_terminal() {
            return;
        }
        self.outcome = RunOutcome::Cancelled;
        self.finished = Some(Instant::now());
    }
}

/// Structured audit record produced when a run ends.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub document: String,
    pub template: String,
    pub outcome: RunOutcome,
    pub stages_completed: Vec<String>,
    pub warnings: Vec<StageWarning>,
    pub percent: u8,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
}

impl RunSummary {
    pub fn from_run(run: &PipelineRun, document: &str, template: &str) -> Self {
        let elapsed = chrono::Duration::from_std(run.elapsed()).unwrap_or_else(|_| chrono::Duration::zero());
        Self {
            run_id: run.run_id.to_string(),
            document: document.to_string(),
            template: template.to_string(),
            outcome: run.outcome.clone(),
            stages_completed: run.stages_completed.clone(),
            warnings: run.warnings.clone(),
            percent: run.percent,
            started_at: run.started_at,
            completed_at: run.started_at + elapsed,
            duration_ms: elapsed.num_milliseconds(),
        }
    }
}

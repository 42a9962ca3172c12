//! Controller surface for an interface: start, observe, cancel and retry runs.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::PipelineError;
use crate::features::{GalleryLoad, GalleryStart};
use crate::gateway::RemoteCall;
use crate::orchestrator::PipelineOrchestrator;
use crate::pipeline::{JobSpec, NextStep, PRESENTATION_STAGES, RunSummary, RunToken};
use crate::reporter::{GalleryState, ProgressListener};

/// A started run.
pub struct RunHandle {
    token: RunToken,
    task: JoinHandle<NextStep>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.token.id()
    }

    /// Wait for the run to end.
    pub async fn next_step(self) -> NextStep {
        match self.task.await {
            Ok(next) => next,
            Err(e) => NextStep::NavigateWithError {
                stage: None,
                message: format!("pipeline task failed: {e}"),
            },
        }
    }
}

struct Current {
    token: RunToken,
    job: Arc<JobSpec>,
}

/// Owns at most one active run at a time.
pub struct Session<G> {
    orchestrator: Arc<PipelineOrchestrator<G>>,
    current: Mutex<Option<Current>>,
}

impl<G: RemoteCall + 'static> Session<G> {
    pub fn new(orchestrator: PipelineOrchestrator<G>) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
            current: Mutex::new(None),
        }
    }

    pub fn orchestrator(&self) -> &PipelineOrchestrator<G> {
        &self.orchestrator
    }

    pub fn subscribe(&self, listener: Arc<dyn ProgressListener>) {
        self.orchestrator.reporter().subscribe(listener);
    }

    fn current(&self) -> std::sync::MutexGuard<'_, Option<Current>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new run. A run still in progress is cancelled first.
    pub fn start(&self, job: JobSpec) -> RunHandle {
        self.cancel();
        let job = Arc::new(job);
        let token = RunToken::new();
        *self.current() = Some(Current {
            token: token.clone(),
            job: Arc::clone(&job),
        });

        let orchestrator = Arc::clone(&self.orchestrator);
        let ticker = orchestrator.reporter().spawn_ticker(token.child());
        let task_token = token.clone();
        let task = tokio::spawn(async move {
            let next = match orchestrator.run(job, PRESENTATION_STAGES, &task_token).await {
                Ok(result) => NextStep::NavigateWithResult(result),
                Err(PipelineError::Cancelled) => NextStep::Cancelled,
                Err(e) => NextStep::NavigateWithError {
                    stage: e.stage().map(str::to_string),
                    message: e.to_string(),
                },
            };
            orchestrator.reporter().finish(&task_token, &next);
            ticker.abort();
            next
        });
        RunHandle { token, task }
    }

    /// Cancel the active run. Returns false if nothing was running.
    pub fn cancel(&self) -> bool {
        let guard = self.current();
        let Some(current) = guard.as_ref() else {
            return false;
        };
        if !current.token.is_active() {
            return false;
        }
        info!(run_id = %current.token.id(), "cancelling run");
        current.token.cancel();
        self.orchestrator.reporter().finish(&current.token, &NextStep::Cancelled)
    }

    /// Restart the whole pipeline from the first stage with the last job.
    pub fn retry(&self) -> Option<RunHandle> {
        let job = self.current().as_ref().map(|c| JobSpec::clone(&c.job))?;
        info!(document = %job.document, "retrying pipeline from the first stage");
        Some(self.start(job))
    }

    /// Restart only the gallery poller of the active run. Offered after the
    /// gallery failed or timed out.
    pub fn retry_gallery(&self) -> Option<JoinHandle<GalleryLoad>> {
        let (token, job) = {
            let guard = self.current();
            let current = guard.as_ref()?;
            (current.token.clone(), Arc::clone(&current.job))
        };
        if !job.features.generate_gallery || job.document.is_upload() || !token.is_active() {
            return None;
        }
        let reporter = Arc::clone(self.orchestrator.reporter());
        let max_attempts = self.orchestrator.gallery().config().max_attempts;
        let Some(state) = reporter.claim_gallery_retry(&token, max_attempts) else {
            let state = reporter.gallery_state().map(|s| s.label()).unwrap_or_default();
            warn!(state = %state, "gallery retry not available");
            return None;
        };
        // A timed-out job is probably still running; a failed one is triggered again.
        let already_triggered = matches!(state, GalleryState::TimedOut);
        info!(already_triggered, "retrying gallery");
        Some(self.orchestrator.gallery().spawn_for_run(
            Arc::clone(self.orchestrator.gateway()),
            job.document.as_str().to_string(),
            token,
            reporter,
            GalleryStart::LoadOrProcess { already_triggered },
        ))
    }

    /// Audit record of the current run.
    pub fn summary(&self) -> Option<RunSummary> {
        let job = self.current().as_ref().map(|c| Arc::clone(&c.job))?;
        self.orchestrator
            .reporter()
            .summary(job.document.as_str(), &job.template)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use serde_json::json;

    use crate::features::Gallery;
    use crate::pipeline::{AudienceLevel, DocumentRef, FeatureToggles, RunOutcome};
    use crate::poller::PollConfig;
    use crate::reporter::Reporter;
    use crate::testing::{Scripted, ScriptedGateway};

    #[derive(Default)]
    struct Finished(Mutex<Vec<NextStep>>);

    impl ProgressListener for Finished {
        fn on_finished(&self, next: &NextStep) {
            self.0.lock().unwrap().push(next.clone());
        }
    }

    fn session(gw: &Arc<ScriptedGateway>) -> Session<ScriptedGateway> {
        let gallery = Gallery::new(PollConfig {
            max_attempts: 3,
            interval_ms: 1000,
            ..Default::default()
        })
        .with_settle_delay(Duration::from_millis(500));
        Session::new(PipelineOrchestrator::new(
            Arc::clone(gw),
            Arc::new(Reporter::new()),
            gallery,
        ))
    }

    fn job(gallery: bool) -> JobSpec {
        JobSpec::new(
            DocumentRef::Url("https://arxiv.org/pdf/1706.03762".into()),
            AudienceLevel::Masters,
            10,
            "basic",
        )
        .unwrap()
        .with_features(FeatureToggles {
            generate_gallery: gallery,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn successful_run_navigates_with_result() {
        let gw = Arc::new(ScriptedGateway::new());
        let session = session(&gw);
        let finished = Arc::new(Finished::default());
        session.subscribe(finished.clone());

        let next = session.start(job(false)).next_step().await;
        match &next {
            NextStep::NavigateWithResult(result) => {
                assert_eq!(result.document, "https://arxiv.org/pdf/1706.03762");
            }
            other => panic!("expected result, got {other:?}"),
        }
        assert_eq!(finished.0.lock().unwrap().as_slice(), &[next]);
        let summary = session.summary().unwrap();
        assert_eq!(summary.stages_completed.len(), PRESENTATION_STAGES.len());
        assert!(matches!(summary.outcome, RunOutcome::Succeeded { .. }));
    }

    #[tokio::test]
    async fn failed_run_can_be_retried_from_the_start() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.push("generate-presentation", Scripted::detail(500, "template not found"));
        let session = session(&gw);

        let next = session.start(job(false)).next_step().await;
        match &next {
            NextStep::NavigateWithError { stage, message } => {
                assert_eq!(stage.as_deref(), Some("generate-presentation"));
                assert!(message.contains("template not found"));
            }
            other => panic!("expected error, got {other:?}"),
        }

        let next = session.retry().unwrap().next_step().await;
        assert!(matches!(next, NextStep::NavigateWithResult(_)));
        assert_eq!(gw.calls_to("analyze/url").len(), 2);
        assert_eq!(gw.calls_to("generate-presentation").len(), 2);
    }

    #[tokio::test]
    async fn cancel_ends_the_run_once() {
        let gw = Arc::new(ScriptedGateway::new());
        let release = gw.hold("ocr-figure-url");
        let session = session(&gw);
        let finished = Arc::new(Finished::default());
        session.subscribe(finished.clone());

        let handle = session.start(job(false));
        while gw.calls_to("ocr-figure-url").is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        assert!(session.cancel());
        assert!(!session.cancel());
        release.notify_one();

        assert_eq!(handle.next_step().await, NextStep::Cancelled);
        assert_eq!(finished.0.lock().unwrap().as_slice(), &[NextStep::Cancelled]);
        assert!(gw.calls_to("save-figures").is_empty());
        let snapshot = session.orchestrator().reporter().snapshot().unwrap();
        assert_eq!(snapshot.outcome, RunOutcome::Cancelled);
        assert_eq!(snapshot.percent, 30);
    }

    #[tokio::test]
    async fn starting_again_supersedes_the_old_run() {
        let gw = Arc::new(ScriptedGateway::new());
        let release = gw.hold("analyze/url");
        let session = session(&gw);

        let first = session.start(job(false));
        while gw.calls_to("analyze/url").is_empty() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let first_id = first.run_id();
        let second = session.start(job(false));
        // Release the first run's call; the second one also waits on it.
        release.notify_waiters();
        assert_eq!(first.next_step().await, NextStep::Cancelled);
        while gw.calls_to("analyze/url").len() < 2 {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        release.notify_one();
        assert!(matches!(second.next_step().await, NextStep::NavigateWithResult(_)));
        assert_ne!(session.orchestrator().reporter().active_run_id(), Some(first_id));
    }

    #[tokio::test(start_paused = true)]
    async fn gallery_can_be_retried_after_timing_out() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.respond("data", Scripted::status(404));
        let session = session(&gw);

        let next = session.start(job(true)).next_step().await;
        assert!(matches!(next, NextStep::NavigateWithResult(_)));
        assert!(session.retry_gallery().is_none());

        tokio::time::sleep(Duration::from_secs(5)).await;
        let reporter = session.orchestrator().reporter();
        assert_eq!(reporter.gallery_state(), Some(GalleryState::TimedOut));

        gw.respond("data", Scripted::json(json!({"images": [], "tables": []})));
        let load = session.retry_gallery().unwrap().await.unwrap();
        assert_eq!(load.state, GalleryState::Ready { images: 0, tables: 0 });
        assert_eq!(reporter.gallery_state(), Some(load.state));
        // The retry found data on its first check and did not trigger again.
        assert_eq!(gw.calls_to("process/url").len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_gallery_retry_is_refused_while_the_first_runs() {
        let gw = Arc::new(ScriptedGateway::new());
        gw.respond("data", Scripted::status(404));
        let session = session(&gw);

        session.start(job(true)).next_step().await;
        tokio::time::sleep(Duration::from_secs(5)).await;
        let reporter = session.orchestrator().reporter();
        assert_eq!(reporter.gallery_state(), Some(GalleryState::TimedOut));
        let checks_before = gw.calls_to("data").len();

        let first = session.retry_gallery();
        let second = session.retry_gallery();
        assert!(first.is_some());
        assert!(second.is_none());
        assert!(matches!(reporter.gallery_state(), Some(GalleryState::Processing { .. })));

        let load = first.unwrap().await.unwrap();
        assert_eq!(load.state, GalleryState::TimedOut);
        // One initial check plus one poll loop of three attempts.
        assert_eq!(gw.calls_to("data").len() - checks_before, 4);
    }

    #[tokio::test]
    async fn gallery_retry_needs_a_gallery_job() {
        let gw = Arc::new(ScriptedGateway::new());
        let session = session(&gw);
        assert!(session.retry_gallery().is_none());
        session.start(job(false)).next_step().await;
        assert!(session.retry_gallery().is_none());
    }
}

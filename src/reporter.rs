//! Progress and status reporting.
//!
//! [`project`] turns a [`PipelineRun`] and the gallery state into the few
//! fields an interface shows. The [`Reporter`] keeps the latest copy of both
//! for the active run, recomputes the snapshot on every update and on a
//! one-second tick, and forwards it to [`ProgressListener`]s and a
//! `tokio::sync::watch` channel.
//!
//! Every mutating call takes the [`RunToken`] of the caller. Updates from a
//! token that is not the active one, or that was cancelled, are dropped.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

use crate::pipeline::{NextStep, PipelineRun, RunOutcome, RunSummary, RunToken, StageWarning};

/// Where the gallery feature stands for the current run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum GalleryState {
    Disabled,
    Processing { attempt: u32, max_attempts: u32 },
    Ready { images: usize, tables: usize },
    Failed { reason: String },
    /// Still processing on the service side; a manual retry may succeed.
    TimedOut,
    Cancelled,
}

impl GalleryState {
    pub fn is_ready(&self) -> bool {
        matches!(self, GalleryState::Ready { .. })
    }

    /// States from which the user may restart only the gallery poller.
    pub fn can_retry(&self) -> bool {
        matches!(self, GalleryState::Failed { .. } | GalleryState::TimedOut)
    }

    pub fn label(&self) -> String {
        match self {
            GalleryState::Disabled => "disabled".to_string(),
            GalleryState::Processing { attempt, max_attempts } => {
                format!("processing ({attempt}/{max_attempts})")
            }
            GalleryState::Ready { images, tables } => format!("ready ({images} images, {tables} tables)"),
            GalleryState::Failed { reason } => format!("failed: {reason}"),
            GalleryState::TimedOut => "still processing, try again later".to_string(),
            GalleryState::Cancelled => "cancelled".to_string(),
        }
    }
}

/// Externally observable view of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSnapshot {
    pub run_id: Uuid,
    pub status_text: String,
    pub percent: u8,
    pub elapsed_seconds: u64,
    pub gallery: GalleryState,
    pub outcome: RunOutcome,
}

/// Pure projection of run and gallery state.
pub fn project(run: &PipelineRun, gallery: &GalleryState) -> StatusSnapshot {
    StatusSnapshot {
        run_id: run.run_id,
        status_text: run.status.clone(),
        percent: run.percent(),
        elapsed_seconds: run.elapsed().as_secs(),
        gallery: gallery.clone(),
        outcome: run.outcome.clone(),
    }
}

/// Receives reporter events. All methods default to no-ops.
pub trait ProgressListener: Send + Sync {
    fn on_snapshot(&self, snapshot: &StatusSnapshot) {
        let _ = snapshot;
    }

    fn on_warning(&self, warning: &StageWarning) {
        let _ = warning;
    }

    fn on_finished(&self, next: &NextStep) {
        let _ = next;
    }
}

struct Active {
    token: RunToken,
    run: PipelineRun,
    gallery: GalleryState,
    finished: bool,
}

#[derive(Default)]
struct Inner {
    active: Option<Active>,
}

pub struct Reporter {
    inner: Mutex<Inner>,
    listeners: Mutex<Vec<Arc<dyn ProgressListener>>>,
    snapshots: watch::Sender<Option<StatusSnapshot>>,
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock a mutex, recovering the data if a listener panicked while holding it.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl Reporter {
    pub fn new() -> Self {
        let (snapshots, _) = watch::channel(None);
        Self {
            inner: Mutex::new(Inner::default()),
            listeners: Mutex::new(Vec::new()),
            snapshots,
        }
    }

    pub fn subscribe(&self, listener: Arc<dyn ProgressListener>) {
        lock(&self.listeners).push(listener);
    }

    /// Latest snapshot as a watch channel.
    pub fn watch(&self) -> watch::Receiver<Option<StatusSnapshot>> {
        self.snapshots.subscribe()
    }

    pub fn snapshot(&self) -> Option<StatusSnapshot> {
        lock(&self.inner)
            .active
            .as_ref()
            .map(|a| project(&a.run, &a.gallery))
    }

    pub fn gallery_state(&self) -> Option<GalleryState> {
        lock(&self.inner).active.as_ref().map(|a| a.gallery.clone())
    }

    pub fn active_run_id(&self) -> Option<Uuid> {
        lock(&self.inner).active.as_ref().map(|a| a.token.id())
    }

    /// Make `token` the active run. Any previous run is superseded.
    pub fn begin(&self, token: &RunToken, run: &PipelineRun, gallery: GalleryState) {
        let snapshot = {
            let mut inner = lock(&self.inner);
            inner.active = Some(Active {
                token: token.clone(),
                run: run.clone(),
                gallery,
                finished: false,
            });
            inner.active.as_ref().map(|a| project(&a.run, &a.gallery))
        };
        debug!(run_id = %token.id(), "run started");
        if let Some(snapshot) = snapshot {
            self.emit(snapshot);
        }
    }

    /// Apply `f` to the active state if `token` is still the live, active run.
    /// Returns whether the update was applied.
    fn apply<F>(&self, token: &RunToken, require_live: bool, f: F) -> bool
    where
        F: FnOnce(&mut Active),
    {
        let snapshot = {
            let mut inner = lock(&self.inner);
            let Some(active) = inner.active.as_mut() else {
                return false;
            };
            if active.token != *token || (require_live && !token.is_active()) {
                debug!(run_id = %token.id(), "dropping update from stale run");
                return false;
            }
            f(active);
            project(&active.run, &active.gallery)
        };
        self.emit(snapshot);
        true
    }

    /// Replace the stored run state with the orchestrator's copy.
    pub fn publish(&self, token: &RunToken, run: &PipelineRun) -> bool {
        self.apply(token, true, |active| active.run = run.clone())
    }

    pub fn set_gallery(&self, token: &RunToken, gallery: GalleryState) -> bool {
        self.apply(token, true, |active| active.gallery = gallery)
    }

    /// Move a failed or timed-out gallery back to `Processing` and return the
    /// state it left. `None` if the gallery is not retryable for this run.
    /// Check and update happen under one lock.
    pub fn claim_gallery_retry(&self, token: &RunToken, max_attempts: u32) -> Option<GalleryState> {
        let mut previous = None;
        self.apply(token, true, |active| {
            if active.gallery.can_retry() {
                let processing = GalleryState::Processing {
                    attempt: 0,
                    max_attempts,
                };
                previous = Some(std::mem::replace(&mut active.gallery, processing));
            }
        });
        previous
    }

    pub fn warning(&self, token: &RunToken, warning: &StageWarning) -> bool {
        let applied = self.apply(token, true, |active| {
            if !active.run.warnings.contains(warning) {
                active.run.warnings.push(warning.clone());
            }
        });
        if applied {
            for listener in self.listeners() {
                listener.on_warning(warning);
            }
        }
        applied
    }

    /// Record the terminal step of a run. Accepted once per run, also from a
    /// cancelled token as long as it is still the active one.
    pub fn finish(&self, token: &RunToken, next: &NextStep) -> bool {
        let mut first = false;
        let applied = self.apply(token, false, |active| {
            if active.finished {
                return;
            }
            first = true;
            active.finished = true;
            match next {
                NextStep::NavigateWithResult(result) => active.run.succeed(result),
                NextStep::NavigateWithError { stage, message } => active.run.fail(stage.clone(), message.clone()),
                NextStep::Cancelled => active.run.cancel(),
            }
        });
        if applied && first {
            for listener in self.listeners() {
                listener.on_finished(next);
            }
        }
        applied && first
    }

    /// Audit record of the active run.
    pub fn summary(&self, document: &str, template: &str) -> Option<RunSummary> {
        lock(&self.inner)
            .active
            .as_ref()
            .map(|a| RunSummary::from_run(&a.run, document, template))
    }

    /// Re-emit the current snapshot so elapsed time moves between updates.
    pub fn tick(&self) {
        if let Some(snapshot) = self.snapshot() {
            self.emit(snapshot);
        }
    }

    /// Tick once per second until `cancel` fires.
    pub fn spawn_ticker(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let reporter = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(1));
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => reporter.tick(),
                }
            }
        })
    }

    fn listeners(&self) -> Vec<Arc<dyn ProgressListener>> {
        lock(&self.listeners).clone()
    }

    fn emit(&self, snapshot: StatusSnapshot) {
        for listener in self.listeners() {
            listener.on_snapshot(&snapshot);
        }
        self.snapshots.send_replace(Some(snapshot));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PresentationResult;

    #[derive(Default)]
    struct Recorder {
        snapshots: Mutex<Vec<StatusSnapshot>>,
        warnings: Mutex<Vec<StageWarning>>,
        finished: Mutex<Vec<NextStep>>,
    }

    impl ProgressListener for Recorder {
        fn on_snapshot(&self, snapshot: &StatusSnapshot) {
            self.snapshots.lock().unwrap().push(snapshot.clone());
        }

        fn on_warning(&self, warning: &StageWarning) {
            self.warnings.lock().unwrap().push(warning.clone());
        }

        fn on_finished(&self, next: &NextStep) {
            self.finished.lock().unwrap().push(next.clone());
        }
    }

    fn started(reporter: &Reporter) -> (RunToken, PipelineRun) {
        let token = RunToken::new();
        let run = PipelineRun::new(token.id());
        reporter.begin(&token, &run, GalleryState::Disabled);
        (token, run)
    }

    #[test]
    fn projection_copies_run_fields() {
        let mut run = PipelineRun::new(Uuid::new_v4());
        run.status = "Processing template...".into();
        run.advance_to(20);
        let snap = project(&run, &GalleryState::TimedOut);
        assert_eq!(snap.status_text, "Processing template...");
        assert_eq!(snap.percent, 20);
        assert_eq!(snap.gallery, GalleryState::TimedOut);
        assert_eq!(snap.outcome, RunOutcome::Running);
    }

    #[test]
    fn listeners_see_updates_in_order() {
        let reporter = Reporter::new();
        let recorder = Arc::new(Recorder::default());
        reporter.subscribe(recorder.clone());
        let (token, mut run) = started(&reporter);

        for pct in [10, 20, 30] {
            run.advance_to(pct);
            assert!(reporter.publish(&token, &run));
        }
        let percents: Vec<u8> = recorder.snapshots.lock().unwrap().iter().map(|s| s.percent).collect();
        assert_eq!(percents, vec![0, 10, 20, 30]);
        assert_eq!(reporter.watch().borrow().as_ref().unwrap().percent, 30);
    }

    #[test]
    fn updates_from_cancelled_or_superseded_runs_are_dropped() {
        let reporter = Reporter::new();
        let (old, mut old_run) = started(&reporter);
        old.cancel();
        old_run.advance_to(50);
        assert!(!reporter.publish(&old, &old_run));
        assert_eq!(reporter.snapshot().unwrap().percent, 0);

        let (new, _) = started(&reporter);
        assert!(!reporter.set_gallery(&old, GalleryState::TimedOut));
        assert!(reporter.set_gallery(&new, GalleryState::TimedOut));
        assert!(!reporter.finish(&old, &NextStep::Cancelled));
        assert_eq!(reporter.active_run_id(), Some(new.id()));
    }

    #[test]
    fn gallery_retry_is_claimed_once() {
        let reporter = Reporter::new();
        let (token, _) = started(&reporter);
        assert_eq!(reporter.claim_gallery_retry(&token, 30), None);

        reporter.set_gallery(&token, GalleryState::TimedOut);
        assert_eq!(reporter.claim_gallery_retry(&token, 30), Some(GalleryState::TimedOut));
        assert_eq!(reporter.claim_gallery_retry(&token, 30), None);
        assert_eq!(
            reporter.gallery_state(),
            Some(GalleryState::Processing {
                attempt: 0,
                max_attempts: 30
            })
        );

        let stale = RunToken::new();
        reporter.set_gallery(&token, GalleryState::Failed { reason: "down".into() });
        assert_eq!(reporter.claim_gallery_retry(&stale, 30), None);
    }

    #[test]
    fn cancelled_run_can_still_finish() {
        let reporter = Reporter::new();
        let recorder = Arc::new(Recorder::default());
        reporter.subscribe(recorder.clone());
        let (token, _) = started(&reporter);
        token.cancel();

        assert!(reporter.finish(&token, &NextStep::Cancelled));
        assert!(!reporter.finish(&token, &NextStep::Cancelled));
        assert_eq!(reporter.snapshot().unwrap().outcome, RunOutcome::Cancelled);
        assert_eq!(recorder.finished.lock().unwrap().as_slice(), &[NextStep::Cancelled]);
    }

    #[test]
    fn success_reaches_hundred() {
        let reporter = Reporter::new();
        let (token, _) = started(&reporter);
        let result = PresentationResult {
            artifact_name: "generated_presentation.pptx".into(),
            document: "arxiv:1706.03762".into(),
            gallery_enabled: false,
            gallery_ready: false,
            podcast_ready: false,
        };
        reporter.finish(&token, &NextStep::NavigateWithResult(result));
        let snap = reporter.snapshot().unwrap();
        assert_eq!(snap.percent, 100);
        let summary = reporter.summary("arxiv:1706.03762", "basic").unwrap();
        assert_eq!(summary.percent, 100);
    }

    #[test]
    fn warnings_are_recorded_once_and_forwarded() {
        let reporter = Reporter::new();
        let recorder = Arc::new(Recorder::default());
        reporter.subscribe(recorder.clone());
        let (token, _) = started(&reporter);
        let warning = StageWarning {
            stage: "execution-agent-parsing".into(),
            message: "timeout".into(),
        };
        reporter.warning(&token, &warning);
        reporter.warning(&token, &warning);
        let summary = reporter.summary("doc", "basic").unwrap();
        assert_eq!(summary.warnings.len(), 1);
        assert_eq!(recorder.warnings.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn ticker_advances_elapsed_time() {
        let reporter = Arc::new(Reporter::new());
        let (_token, _) = started(&reporter);
        let mut rx = reporter.watch();
        let stop = CancellationToken::new();
        let handle = reporter.spawn_ticker(stop.clone());

        tokio::time::sleep(Duration::from_millis(3500)).await;
        rx.mark_changed();
        let elapsed = rx.borrow_and_update().as_ref().unwrap().elapsed_seconds;
        assert_eq!(elapsed, 3);

        stop.cancel();
        handle.await.unwrap();
    }

    #[test]
    fn gallery_labels() {
        assert!(GalleryState::TimedOut.can_retry());
        assert!(!GalleryState::Ready { images: 1, tables: 0 }.can_retry());
        assert_eq!(
            GalleryState::Processing { attempt: 3, max_attempts: 30 }.label(),
            "processing (3/30)"
        );
    }
}

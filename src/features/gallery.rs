//! Figure gallery extraction on the gallery service.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::gateway::{CallError, Endpoint, Payload, RemoteCall, Service, TimeoutClass};
use crate::pipeline::RunToken;
use crate::poller::{PollConfig, PollOutcome, PollProgress, PollTask, Retrigger};
use crate::reporter::{GalleryState, Reporter};

const UNREACHABLE: &str = "Gallery server is unreachable. Please check that it is running.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryImage {
    pub id: String,
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryTable {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub headers: Vec<String>,
    #[serde(default)]
    pub subheaders: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Vec<String>>,
}

/// Figures and tables extracted from the paper.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GalleryData {
    #[serde(default)]
    pub images: Vec<GalleryImage>,
    #[serde(default)]
    pub tables: Vec<GalleryTable>,
}

/// Result of one gallery load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GalleryLoad {
    pub state: GalleryState,
    pub data: Option<GalleryData>,
}

impl GalleryLoad {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            state: GalleryState::Failed { reason: reason.into() },
            data: None,
        }
    }

    fn from_outcome(outcome: &PollOutcome, progress: PollProgress) -> Self {
        match outcome {
            PollOutcome::Ready(body) => match body.json::<GalleryData>() {
                Ok(data) => Self {
                    state: GalleryState::Ready {
                        images: data.images.len(),
                        tables: data.tables.len(),
                    },
                    data: Some(data),
                },
                Err(e) => Self::failed(format!("invalid gallery data: {e}")),
            },
            PollOutcome::Failed(reason) => Self::failed(reason.clone()),
            PollOutcome::TimedOut => Self {
                state: GalleryState::TimedOut,
                data: None,
            },
            PollOutcome::Cancelled => Self {
                state: GalleryState::Cancelled,
                data: None,
            },
            PollOutcome::Pending => Self {
                state: GalleryState::Processing {
                    attempt: progress.attempt,
                    max_attempts: progress.max_attempts,
                },
                data: None,
            },
        }
    }
}

/// How a background gallery task begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GalleryStart {
    /// Trigger extraction right away, then poll.
    Trigger,
    /// Check for existing data first, see [`Gallery::load_or_process`].
    LoadOrProcess { already_triggered: bool },
}

/// Gallery feature: trigger extraction, then poll `GET /data` until it exists.
#[derive(Debug, Clone)]
pub struct Gallery {
    config: PollConfig,
    settle_delay: Duration,
}

impl Gallery {
    pub fn new(config: PollConfig) -> Self {
        Self {
            config,
            settle_delay: Duration::from_secs(3),
        }
    }

    /// Wait applied before polling when extraction was already triggered.
    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_delay = delay;
        self
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    pub fn process_endpoint() -> Endpoint {
        Endpoint::post(Service::Gallery, "process/url")
    }

    pub fn data_endpoint() -> Endpoint {
        Endpoint::get(Service::Gallery, "data")
    }

    fn process_payload(document: &str) -> Payload {
        Payload::Json(json!({ "document_url": document }))
    }

    fn task(&self, document: &str) -> PollTask {
        PollTask::new(Self::data_endpoint(), self.config.clone()).with_retrigger(Retrigger {
            endpoint: Self::process_endpoint(),
            payload: Self::process_payload(document),
            timeout: TimeoutClass::Standard,
        })
    }

    async fn trigger<G: RemoteCall>(&self, gateway: &G, document: &str) -> Result<(), CallError> {
        info!(document, "triggering gallery extraction");
        gateway
            .call(&Self::process_endpoint(), &Self::process_payload(document), TimeoutClass::Standard)
            .await
            .map(|_| ())
    }

    async fn poll<G, F>(&self, gateway: &G, mut task: PollTask, cancel: &CancellationToken, observe: F) -> GalleryLoad
    where
        G: RemoteCall,
        F: FnMut(PollProgress),
    {
        let outcome = task.run(gateway, cancel, observe).await.clone();
        let progress = PollProgress {
            attempt: task.attempts(),
            max_attempts: task.config().max_attempts,
            retriggers: task.retriggers(),
        };
        let load = GalleryLoad::from_outcome(&outcome, progress);
        info!(state = %load.state.label(), attempts = task.attempts(), "gallery poll finished");
        load
    }

    /// Trigger extraction and wait for the data. Any trigger failure is fatal.
    pub async fn process<G, F>(&self, gateway: &G, document: &str, cancel: &CancellationToken, observe: F) -> GalleryLoad
    where
        G: RemoteCall,
        F: FnMut(PollProgress),
    {
        if let Err(e) = self.trigger(gateway, document).await {
            warn!(error = %e, "gallery trigger failed");
            return GalleryLoad::failed(if e.is_unreachable() { UNREACHABLE.to_string() } else { e.to_string() });
        }
        self.poll(gateway, self.task(document), cancel, observe).await
    }

    /// Use existing gallery data if there is any, otherwise make sure
    /// extraction runs and wait for it.
    ///
    /// With `already_triggered` the trigger is skipped and only the settle
    /// delay is waited before polling.
    pub async fn load_or_process<G, F>(
        &self,
        gateway: &G,
        document: &str,
        already_triggered: bool,
        cancel: &CancellationToken,
        observe: F,
    ) -> GalleryLoad
    where
        G: RemoteCall,
        F: FnMut(PollProgress),
    {
        match gateway
            .call(&Self::data_endpoint(), &Payload::Empty, self.config.check_timeout)
            .await
        {
            Ok(body) if !body.is_empty() => {
                info!("gallery data already exists");
                let progress = PollProgress {
                    attempt: 0,
                    max_attempts: self.config.max_attempts,
                    retriggers: 0,
                };
                return GalleryLoad::from_outcome(&PollOutcome::Ready(body), progress);
            }
            Ok(_) => {}
            Err(e) if e.is_unreachable() => return GalleryLoad::failed(UNREACHABLE),
            Err(e) if !e.is_status(self.config.not_ready_status) => {
                warn!(error = %e, "gallery data check failed, processing anyway");
            }
            Err(_) => {}
        }

        if already_triggered {
            tokio::select! {
                () = cancel.cancelled() => return GalleryLoad::from_outcome(&PollOutcome::Cancelled, PollProgress {
                    attempt: 0,
                    max_attempts: self.config.max_attempts,
                    retriggers: 0,
                }),
                () = tokio::time::sleep(self.settle_delay) => {}
            }
        } else if let Err(e) = self.trigger(gateway, document).await {
            if e.is_unreachable() {
                return GalleryLoad::failed(UNREACHABLE);
            }
            warn!(error = %e, "gallery trigger failed, polling anyway");
        }

        self.poll(gateway, self.task(document), cancel, observe).await
    }

    /// Run the gallery alongside a pipeline run, reporting every attempt.
    /// The task stops when the run is cancelled.
    pub fn spawn_for_run<G>(
        &self,
        gateway: Arc<G>,
        document: String,
        token: RunToken,
        reporter: Arc<Reporter>,
        start: GalleryStart,
    ) -> JoinHandle<GalleryLoad>
    where
        G: RemoteCall + 'static,
    {
        let gallery = self.clone();
        tokio::spawn(async move {
            let cancel = token.child();
            reporter.set_gallery(
                &token,
                GalleryState::Processing {
                    attempt: 0,
                    max_attempts: gallery.config.max_attempts,
                },
            );
            let observe = |p: PollProgress| {
                reporter.set_gallery(
                    &token,
                    GalleryState::Processing {
                        attempt: p.attempt,
                        max_attempts: p.max_attempts,
                    },
                );
            };
            let load = match start {
                GalleryStart::Trigger => gallery.process(gateway.as_ref(), &document, &cancel, observe).await,
                GalleryStart::LoadOrProcess { already_triggered } => {
                    gallery
                        .load_or_process(gateway.as_ref(), &document, already_triggered, &cancel, observe)
                        .await
                }
            };
            reporter.set_gallery(&token, load.state.clone());
            load
        })
    }
}

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::features::{Gallery, GalleryStart};
use crate::gateway::RemoteCall;
use crate::pipeline::{
    JobSpec, PipelineRun, PresentationResult, RunToken, StageDescriptor, StageInput, StageOutputs, StageWarning,
};
use crate::reporter::{GalleryState, Reporter};

pub const GALLERY_NEEDS_URL: &str = "Gallery extraction needs a document URL";

/// Drives a [`JobSpec`] through an ordered list of stages.
pub struct PipelineOrchestrator<G> {
    gateway: Arc<G>,
    reporter: Arc<Reporter>,
    gallery: Gallery,
}

impl<G: RemoteCall + 'static> PipelineOrchestrator<G> {
    pub fn new(gateway: Arc<G>, reporter: Arc<Reporter>, gallery: Gallery) -> Self {
        Self {
            gateway,
            reporter,
            gallery,
        }
    }

    pub fn gateway(&self) -> &Arc<G> {
        &self.gateway
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    pub fn gallery(&self) -> &Gallery {
        &self.gallery
    }

    /// Run every stage in order.
    ///
    /// - A failing required stage stops the run with
    ///   [`PipelineError::RequiredStageFailure`]; later stages are not called.
    /// - A failing optional stage is recorded as a warning and leaves no
    ///   output for the stages after it.
    /// - When the job asks for a gallery, extraction is started on its own
    ///   task before the first stage and never waited for.
    ///
    /// The token is checked before each stage and after each call. Once it is
    /// cancelled no further stage starts and the in-flight result is dropped.
    pub async fn run(
        &self,
        job: Arc<JobSpec>,
        stages: &[StageDescriptor],
        token: &RunToken,
    ) -> Result<PresentationResult, PipelineError> {
        let mut run = PipelineRun::new(token.id());
        // The gallery service only reads documents by URL.
        let start_gallery = job.features.generate_gallery && !job.document.is_upload();
        let initial_gallery = if start_gallery {
            GalleryState::Processing {
                attempt: 0,
                max_attempts: self.gallery.config().max_attempts,
            }
        } else if job.features.generate_gallery {
            warn!(document = %job.document, "gallery extraction needs a document URL, skipping");
            GalleryState::Failed {
                reason: GALLERY_NEEDS_URL.to_string(),
            }
        } else {
            GalleryState::Disabled
        };
        self.reporter.begin(token, &run, initial_gallery);
        info!(
            run_id = %token.id(),
            document = %job.document,
            template = %job.template,
            stages = stages.len(),
            "pipeline started"
        );

        if start_gallery {
            // Detached: the task ends on its own or with the run token.
            let _ = self.gallery.spawn_for_run(
                Arc::clone(&self.gateway),
                job.document.as_str().to_string(),
                token.clone(),
                Arc::clone(&self.reporter),
                GalleryStart::Trigger,
            );
        }

        let mut outputs = StageOutputs::default();
        for (index, stage) in stages.iter().enumerate() {
            if !token.is_active() {
                info!(run_id = %token.id(), stage = stage.name, "run cancelled before stage");
                return Err(PipelineError::Cancelled);
            }

            run.stage_index = index;
            if let Some(status) = stage.status {
                run.status = status.to_string();
            }
            self.reporter.publish(token, &run);

            let endpoint = stage.endpoint(&job.document);
            let payload = stage.payload(&StageInput {
                job: &job,
                outputs: &outputs,
            });
            debug!(stage = stage.name, endpoint = %endpoint, timeout = ?stage.timeout, "calling stage");
            let result = self.gateway.call(&endpoint, &payload, stage.timeout).await;

            if !token.is_active() {
                debug!(run_id = %token.id(), stage = stage.name, "discarding result of cancelled run");
                return Err(PipelineError::Cancelled);
            }

            match result {
                Ok(body) => {
                    outputs.insert(stage.name, body);
                    run.stages_completed.push(stage.name.to_string());
                    info!(stage = stage.name, checkpoint = stage.checkpoint, "stage completed");
                }
                Err(e) if stage.required => {
                    let message = format!("{}: {e}", stage.failure_summary);
                    error!(stage = stage.name, error = %e, "required stage failed");
                    run.fail(Some(stage.name.to_string()), message.clone());
                    self.reporter.publish(token, &run);
                    return Err(PipelineError::RequiredStageFailure {
                        stage: stage.name.to_string(),
                        message,
                    });
                }
                Err(e) => {
                    warn!(stage = stage.name, error = %e, "optional stage failed, continuing");
                    let warning = StageWarning {
                        stage: stage.name.to_string(),
                        message: e.to_string(),
                    };
                    run.warnings.push(warning.clone());
                    self.reporter.warning(token, &warning);
                }
            }
            run.advance_to(stage.checkpoint);
            self.reporter.publish(token, &run);
        }

        let gallery_ready = self
            .reporter
            .gallery_state()
            .is_some_and(|state| state.is_ready());
        let result = PresentationResult {
            artifact_name: job.artifact_name.clone(),
            document: job.document.as_str().to_string(),
            gallery_enabled: job.features.generate_gallery,
            gallery_ready,
            podcast_ready: false,
        };
        run.succeed(&result);
        self.reporter.publish(token, &run);
        info!(
            run_id = %token.id(),
            artifact = %result.artifact_name,
            warnings = run.warnings.len(),
            "pipeline finished"
        );
        Ok(result)
    }
}

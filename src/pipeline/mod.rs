pub mod job;
pub mod run;
pub mod stage;

pub use job::{AudienceLevel, DEFAULT_ARTIFACT_NAME, DocumentRef, FeatureToggles, JobSpec, NextStep, PresentationResult};
pub use run::{PipelineRun, RunOutcome, RunSummary, RunToken, StageWarning};
pub use stage::{PRESENTATION_STAGES, Route, StageDescriptor, StageInput, StageOutputs, find_stage};

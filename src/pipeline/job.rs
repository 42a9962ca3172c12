use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::PaperflowError;

/// Default file name of the rendered deck on the backend.
pub const DEFAULT_ARTIFACT_NAME: &str = "generated_presentation.pptx";

/// Who the presentation is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceLevel {
    Phd,
    #[default]
    Masters,
    Undergraduate,
}

impl AudienceLevel {
    /// Numeric code understood by the analysis endpoints.
    pub fn code(&self) -> &'static str {
        match self {
            AudienceLevel::Phd => "1",
            AudienceLevel::Masters => "2",
            AudienceLevel::Undergraduate => "3",
        }
    }

    /// Descriptive label understood by the slide generator.
    pub fn prompt_label(&self) -> &'static str {
        match self {
            AudienceLevel::Phd => "phd researcher",
            AudienceLevel::Masters => "masters student",
            AudienceLevel::Undergraduate => "undergraduate student",
        }
    }
}

impl fmt::Display for AudienceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudienceLevel::Phd => write!(f, "PhD Researcher"),
            AudienceLevel::Masters => write!(f, "Masters Student"),
            AudienceLevel::Undergraduate => write!(f, "Undergraduate Student"),
        }
    }
}

/// The paper to work from: a URL, or an uploaded PDF held in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentRef {
    Url(String),
    Upload { file_name: String, bytes: Arc<[u8]> },
}

impl DocumentRef {
    /// String form passed to services that take a `document_url`.
    pub fn as_str(&self) -> &str {
        match self {
            DocumentRef::Url(url) => url,
            DocumentRef::Upload { file_name, .. } => file_name,
        }
    }

    pub fn is_upload(&self) -> bool {
        matches!(self, DocumentRef::Upload { .. })
    }
}

impl fmt::Display for DocumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optional features requested alongside the presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureToggles {
    pub generate_gallery: bool,
    pub create_podcast: bool,
    pub add_images: bool,
}

impl Default for FeatureToggles {
    fn default() -> Self {
        Self {
            generate_gallery: false,
            create_podcast: false,
            add_images: true,
        }
    }
}

/// Immutable input of one pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobSpec {
    pub document: DocumentRef,
    pub level: AudienceLevel,
    pub slide_count: u32,
    pub template: String,
    /// Empty means "all topics".
    pub topics: BTreeSet<String>,
    pub features: FeatureToggles,
    /// File name the backend renders the deck to.
    pub artifact_name: String,
}

impl JobSpec {
    /// Validate and build a job. Surrounding whitespace is trimmed.
    pub fn new(
        document: DocumentRef,
        level: AudienceLevel,
        slide_count: u32,
        template: impl Into<String>,
    ) -> Result<Self, PaperflowError> {
        let template = template.into().trim().to_string();
        if template.is_empty() {
            return Err(PaperflowError::InvalidJob("template name must not be empty".into()));
        }
        if slide_count == 0 {
            return Err(PaperflowError::InvalidJob("slide count must be at least 1".into()));
        }
        let document = match document {
            DocumentRef::Url(url) => {
                let url = url.trim().to_string();
                if url.is_empty() {
                    return Err(PaperflowError::InvalidJob("document URL must not be empty".into()));
                }
                DocumentRef::Url(url)
            }
            DocumentRef::Upload { file_name, bytes } => {
                if bytes.is_empty() {
                    return Err(PaperflowError::InvalidJob(format!("uploaded file '{file_name}' is empty")));
                }
                DocumentRef::Upload { file_name, bytes }
            }
        };
        Ok(Self {
            document,
            level,
            slide_count,
            template,
            topics: BTreeSet::new(),
            features: FeatureToggles::default(),
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
        })
    }

    pub fn with_topics<I, S>(mut self, topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.topics = topics
            .into_iter()
            .map(Into::into)
            .map(|t: String| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect();
        self
    }

    pub fn with_features(mut self, features: FeatureToggles) -> Self {
        self.features = features;
        self
    }

    pub fn with_artifact_name(mut self, name: impl Into<String>) -> Self {
        self.artifact_name = name.into();
        self
    }
}

/// Terminal success payload of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PresentationResult {
    pub artifact_name: String,
    /// Reused by the podcast and gallery features without asking again.
    pub document: String,
    pub gallery_enabled: bool,
    /// Gallery data became ready before the pipeline finished.
    pub gallery_ready: bool,
    pub podcast_ready: bool,
}

/// What the interface should do once a run is over.
#[derive(Debug, Clone, PartialEq)]
pub enum NextStep {
    NavigateWithResult(PresentationResult),
    /// The only retry offered restarts the whole pipeline with the same job.
    NavigateWithError { stage: Option<String>, message: String },
    Cancelled,
}

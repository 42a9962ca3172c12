//! Podcast generation on the backend.
//!
//! Synthesis runs inside `POST /generate-podcast/` under the extended
//! timeout. The returned audio path is then polled on `GET /podcast/{file}`
//! until the file is actually served.

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::error::PaperflowError;
use crate::gateway::{Endpoint, Payload, RemoteCall, Service, TimeoutClass};
use crate::poller::{PollConfig, PollOutcome, PollTask};

/// Speaker name the backend gives the host.
const HOST_SPEAKER: &str = "Jane";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptModifiers {
    pub tone: String,
    pub length: String,
    pub language: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question: Option<String>,
}

impl Default for PromptModifiers {
    fn default() -> Self {
        Self {
            tone: "fun".to_string(),
            length: "Medium (3-5 min)".to_string(),
            language: "English".to_string(),
            question: None,
        }
    }
}

impl PromptModifiers {
    /// Normalise user input: the tone is lowercase and a blank question is dropped.
    pub fn new(tone: &str, length: &str, language: &str, question: Option<&str>) -> Self {
        Self {
            tone: tone.trim().to_lowercase(),
            length: length.trim().to_string(),
            language: language.trim().to_string(),
            question: question.map(str::trim).filter(|q| !q.is_empty()).map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PodcastRequest {
    pub document_url: String,
    pub prompt_modifiers: PromptModifiers,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DialogueItem {
    pub speaker: String,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dialogue {
    #[serde(default)]
    pub scratchpad: String,
    #[serde(default)]
    pub name_of_guest: String,
    #[serde(default)]
    pub dialogue: Vec<DialogueItem>,
}

impl Dialogue {
    /// Markdown transcript with the host shown as `**Host**`.
    pub fn transcript(&self) -> String {
        if self.dialogue.is_empty() {
            return "No transcript available".to_string();
        }
        let guest = if self.name_of_guest.trim().is_empty() {
            "Guest"
        } else {
            self.name_of_guest.as_str()
        };
        self.dialogue
            .iter()
            .map(|item| {
                let speaker = if item.speaker == HOST_SPEAKER { "Host" } else { guest };
                format!("**{speaker}**: {}\n\n", item.text)
            })
            .collect()
    }
}

/// Response of the generation endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Podcast {
    pub podcast_url: String,
    #[serde(default)]
    pub transcript_url: Option<String>,
    #[serde(default)]
    pub dialogue: Option<Dialogue>,
}

impl Podcast {
    /// Ensure the audio path starts with `/`. Absolute URLs are left alone.
    fn normalize(mut self) -> Self {
        if !self.podcast_url.is_empty() && !self.podcast_url.starts_with('/') && !self.podcast_url.contains("://") {
            self.podcast_url.insert(0, '/');
        }
        self
    }

    /// Last path segment of the audio URL.
    pub fn file_name(&self) -> &str {
        self.podcast_url.rsplit('/').next().unwrap_or(&self.podcast_url)
    }

    pub fn transcript(&self) -> String {
        self.dialogue
            .as_ref()
            .map(Dialogue::transcript)
            .unwrap_or_else(|| "No transcript available".to_string())
    }
}

/// A generated podcast whose audio file is being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadyPodcast {
    pub podcast: Podcast,
    pub audio_bytes: usize,
}

pub struct PodcastFeature {
    config: PollConfig,
}

impl PodcastFeature {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn generate_endpoint() -> Endpoint {
        Endpoint::post(Service::Backend, "generate-podcast/")
    }

    pub fn audio_endpoint(file_name: &str) -> Endpoint {
        Endpoint::get(Service::Backend, format!("podcast/{file_name}"))
    }

    /// Run synthesis. Blocks for as long as the backend takes.
    pub async fn generate<G: RemoteCall>(&self, gateway: &G, request: &PodcastRequest) -> Result<Podcast, PaperflowError> {
        if request.document_url.trim().is_empty() {
            return Err(PaperflowError::InvalidJob(
                "No document URL found. Provide the paper first.".into(),
            ));
        }
        info!(document = %request.document_url, tone = %request.prompt_modifiers.tone, "generating podcast");
        let body = gateway
            .call(
                &Self::generate_endpoint(),
                &Payload::Json(serde_json::to_value(request)?),
                TimeoutClass::Extended,
            )
            .await?;
        let podcast: Podcast = body.json()?;
        if podcast.podcast_url.trim().is_empty() {
            return Err(PaperflowError::Podcast("backend returned no audio path".into()));
        }
        Ok(podcast.normalize())
    }

    /// Poll the audio endpoint until the file is served.
    ///
    /// Running out of attempts yields [`PaperflowError::PollTimeout`]; the
    /// same podcast can be waited for again.
    pub async fn wait_for_audio<G: RemoteCall>(
        &self,
        gateway: &G,
        podcast: &Podcast,
        cancel: &CancellationToken,
    ) -> Result<ReadyPodcast, PaperflowError> {
        let mut task = PollTask::new(Self::audio_endpoint(podcast.file_name()), self.config.clone());
        if !task.check_now(gateway).await {
            task.run(gateway, cancel, |_| {}).await;
        }
        match task.outcome() {
            PollOutcome::Ready(body) => Ok(ReadyPodcast {
                audio_bytes: body.bytes.len(),
                podcast: podcast.clone(),
            }),
            PollOutcome::TimedOut => Err(PaperflowError::PollTimeout {
                feature: format!("podcast audio '{}'", podcast.file_name()),
            }),
            PollOutcome::Cancelled => Err(PaperflowError::Podcast("cancelled".into())),
            PollOutcome::Failed(reason) => Err(PaperflowError::Podcast(reason.clone())),
            PollOutcome::Pending => Err(PaperflowError::Podcast("audio never became available".into())),
        }
    }
}

//! Fetching the rendered deck once the pipeline finished.

use std::io::Write;
use std::path::{Path, PathBuf};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::PaperflowError;
use crate::gateway::{Endpoint, Payload, RemoteCall, Service, TimeoutClass};
use crate::poller::{PollConfig, PollOutcome, PollTask};

/// A deck written to disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadedPresentation {
    pub path: PathBuf,
    pub bytes: usize,
}

pub struct PresentationDownload {
    config: PollConfig,
}

impl PresentationDownload {
    pub fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn download_endpoint() -> Endpoint {
        Endpoint::get(Service::Backend, "download-presentation")
    }

    pub fn cleanup_endpoint() -> Endpoint {
        Endpoint::post(Service::Backend, "cleanup-data")
    }

    /// Wait until the artifact is served and write it to `dest` atomically.
    pub async fn fetch<G: RemoteCall>(
        &self,
        gateway: &G,
        artifact_name: &str,
        dest: &Path,
        cancel: &CancellationToken,
    ) -> Result<DownloadedPresentation, PaperflowError> {
        let mut task = PollTask::new(Self::download_endpoint(), self.config.clone())
            .with_check_payload(Payload::Query(vec![("filename".to_string(), artifact_name.to_string())]));
        if !task.check_now(gateway).await {
            task.run(gateway, cancel, |_| {}).await;
        }

        let body = match task.outcome() {
            PollOutcome::Ready(body) => body,
            PollOutcome::TimedOut => {
                return Err(PaperflowError::PollTimeout {
                    feature: format!("presentation '{artifact_name}'"),
                });
            }
            PollOutcome::Cancelled => return Err(PaperflowError::Presentation("download cancelled".into())),
            PollOutcome::Failed(reason) => return Err(PaperflowError::Presentation(reason.clone())),
            PollOutcome::Pending => return Err(PaperflowError::Presentation("download never started".into())),
        };

        let bytes = body.bytes.clone();
        let len = bytes.len();
        let path = dest.to_path_buf();
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomically(&target, &bytes))
            .await
            .map_err(|e| PaperflowError::Io(std::io::Error::other(e)))??;
        info!(path = %path.display(), bytes = len, "presentation saved");
        Ok(DownloadedPresentation { path, bytes: len })
    }

    /// Ask the backend to clear intermediate figures. Failures are only logged.
    pub async fn cleanup<G: RemoteCall>(&self, gateway: &G, should_clean: bool) -> bool {
        let payload = Payload::form().text("should_clean", should_clean.to_string());
        match gateway
            .call(&Self::cleanup_endpoint(), &payload, TimeoutClass::Standard)
            .await
        {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "cleanup failed");
                false
            }
        }
    }
}

/// Write to a temporary file in the destination directory, then rename.
fn write_atomically(dest: &Path, bytes: &[u8]) -> Result<(), PaperflowError> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
    tmp.write_all(bytes)?;
    tmp.flush()?;
    tmp.persist(dest).map_err(|e| PaperflowError::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ResponseBody;
    use crate::testing::{Scripted, ScriptedGateway};

    fn download() -> PresentationDownload {
        PresentationDownload::new(PollConfig {
            max_attempts: 4,
            interval_ms: 500,
            ..Default::default()
        })
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_artifact_then_writes_it() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("out").join("deck.pptx");
        let gw = ScriptedGateway::new();
        gw.push("download-presentation", Scripted::status(404))
            .push("download-presentation", Scripted::Ok(ResponseBody::new(200, b"PK\x03\x04deck".to_vec())));

        let saved = download()
            .fetch(&gw, "deck.pptx", &dest, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(saved.bytes, 8);
        assert_eq!(std::fs::read(&dest).unwrap(), b"PK\x03\x04deck");

        let calls = gw.calls_to("download-presentation");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].payload.text_value("filename"), Some("deck.pptx"));
        // Only the deck is left in the directory.
        assert_eq!(std::fs::read_dir(dest.parent().unwrap()).unwrap().count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn missing_artifact_times_out_without_writing() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("deck.pptx");
        let gw = ScriptedGateway::new();
        gw.respond("download-presentation", Scripted::detail(404, "Presentation file not found"));

        let err = download()
            .fetch(&gw, "deck.pptx", &dest, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_poll_timeout());
        assert!(matches!(&err, PaperflowError::PollTimeout { feature } if feature.contains("deck.pptx")));
        assert!(!dest.exists());
        assert_eq!(gw.calls_to("download-presentation").len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn server_error_fails_instead_of_timing_out() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("deck.pptx");
        let gw = ScriptedGateway::new();
        gw.respond("download-presentation", Scripted::status(500));

        let err = download()
            .fetch(&gw, "deck.pptx", &dest, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(!err.is_poll_timeout());
        assert!(matches!(err, PaperflowError::Presentation(_)));
        assert_eq!(gw.calls_to("download-presentation").len(), 1);
    }

    #[tokio::test]
    async fn cleanup_is_best_effort() {
        let gw = ScriptedGateway::new();
        assert!(download().cleanup(&gw, true).await);
        assert_eq!(gw.calls_to("cleanup-data")[0].payload.text_value("should_clean"), Some("true"));

        gw.respond("cleanup-data", Scripted::unreachable());
        assert!(!download().cleanup(&gw, false).await);
    }
}

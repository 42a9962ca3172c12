use std::io;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use paperflow::cli::{Cli, Command, GenerateArgs};
use paperflow::config::PaperflowConfig;
use paperflow::error::PaperflowError;
use paperflow::features::{Gallery, PodcastFeature, PodcastRequest, PresentationDownload, ReadyPodcast};
use paperflow::gateway::HttpGateway;
use paperflow::orchestrator::PipelineOrchestrator;
use paperflow::pipeline::{DocumentRef, FeatureToggles, JobSpec, NextStep, PRESENTATION_STAGES, PresentationResult};
use paperflow::reporter::Reporter;
use paperflow::session::Session;
use paperflow::ui::{self, TerminalProgress};

/// Extra poll rounds after a poll timeout before giving up.
const REPOLL_ROUNDS: u32 = 2;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = match &cli.config {
        Some(path) => PaperflowConfig::load_from(path)?,
        None => PaperflowConfig::load()?,
    };
    let gateway = Arc::new(HttpGateway::new(
        config.service_urls(),
        config.timeouts(),
        config.connect_timeout(),
    )?);

    match cli.command {
        Command::Generate(args) => generate(&config, gateway, args).await,
        Command::Podcast { url, podcast_args } => {
            let cancel = cancel_on_ctrl_c();
            let request = PodcastRequest {
                document_url: url,
                prompt_modifiers: podcast_args.modifiers(),
            };
            match podcast(&config, gateway.as_ref(), &request, &cancel).await {
                Ok(ready) => ui::print_podcast(&ready),
                Err(e) if e.is_poll_timeout() => ui::print_still_processing(&e),
                Err(e) => return Err(e.into()),
            }
            Ok(())
        }
        Command::Gallery { url } => {
            let cancel = cancel_on_ctrl_c();
            let load = Gallery::new(config.gallery_poll.clone())
                .load_or_process(gateway.as_ref(), &url, false, &cancel, |progress| {
                    info!(attempt = progress.attempt, max_attempts = progress.max_attempts, "waiting for gallery");
                })
                .await;
            ui::print_gallery(&load);
            if !load.state.is_ready() {
                bail!("gallery not loaded: {}", load.state.label());
            }
            Ok(())
        }
        Command::Stages => {
            ui::print_stages(PRESENTATION_STAGES);
            Ok(())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "paperflow=debug" } else { "paperflow=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(io::stderr)
        .init();
}

/// Token cancelled on the first Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });
    cancel
}

async fn document_ref(url: Option<String>, file: Option<&Path>) -> Result<DocumentRef> {
    match (url, file) {
        (_, Some(path)) => {
            let bytes = tokio::fs::read(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let file_name = path
                .file_name()
                .and_then(|name| name.to_str())
                .unwrap_or("paper.pdf")
                .to_string();
            Ok(DocumentRef::Upload {
                file_name,
                bytes: bytes.into(),
            })
        }
        (Some(url), None) => Ok(DocumentRef::Url(url)),
        (None, None) => bail!("provide a paper URL or --file"),
    }
}

async fn generate(config: &PaperflowConfig, gateway: Arc<HttpGateway>, args: GenerateArgs) -> Result<()> {
    let document = document_ref(args.url.clone(), args.file.as_deref()).await?;
    let job = JobSpec::new(document, args.level.into(), args.slides, args.template.clone())?
        .with_topics(args.topics.iter().cloned())
        .with_features(FeatureToggles {
            generate_gallery: args.gallery,
            create_podcast: args.podcast,
            ..Default::default()
        });

    let session = Session::new(PipelineOrchestrator::new(
        Arc::clone(&gateway),
        Arc::new(Reporter::new()),
        Gallery::new(config.gallery_poll.clone()),
    ));
    let progress = Arc::new(TerminalProgress::start(job.document.as_str()));
    session.subscribe(progress.clone());

    let is_upload = job.document.is_upload();
    let next_step = session.start(job).next_step();
    tokio::pin!(next_step);
    let next = tokio::select! {
        next = &mut next_step => next,
        _ = tokio::signal::ctrl_c() => {
            session.cancel();
            next_step.await
        }
    };
    progress.complete(&next);

    let outcome = match next {
        NextStep::NavigateWithResult(result) => deliver(config, &gateway, &args, result, is_upload).await,
        NextStep::NavigateWithError { stage, message } => match stage {
            Some(stage) => Err(anyhow::anyhow!("stage '{stage}' failed: {message}")),
            None => Err(anyhow::anyhow!(message)),
        },
        NextStep::Cancelled => Ok(()),
    };

    if let Some(summary) = session.summary() {
        ui::print_summary(&summary);
    }
    outcome
}

/// Generate a podcast, polling the audio again after a timeout.
async fn podcast(
    config: &PaperflowConfig,
    gateway: &HttpGateway,
    request: &PodcastRequest,
    cancel: &CancellationToken,
) -> Result<ReadyPodcast, PaperflowError> {
    let feature = PodcastFeature::new(config.podcast_poll.clone());
    let podcast = feature.generate(gateway, request).await?;
    let mut round = 0;
    loop {
        match feature.wait_for_audio(gateway, &podcast, cancel).await {
            Err(e) if e.is_poll_timeout() && round < REPOLL_ROUNDS && !cancel.is_cancelled() => {
                round += 1;
                ui::print_repoll(&e, round, REPOLL_ROUNDS);
            }
            other => return other,
        }
    }
}

/// Follow-up work on a finished deck: podcast, download and cleanup.
async fn deliver(
    config: &PaperflowConfig,
    gateway: &HttpGateway,
    args: &GenerateArgs,
    mut result: PresentationResult,
    is_upload: bool,
) -> Result<()> {
    let cancel = cancel_on_ctrl_c();
    if args.podcast {
        if is_upload {
            warn!("podcast generation needs a document URL, skipping");
        } else {
            let request = PodcastRequest {
                document_url: result.document.clone(),
                prompt_modifiers: args.podcast_args.modifiers(),
            };
            match podcast(config, gateway, &request, &cancel).await {
                Ok(ready) => {
                    result.podcast_ready = true;
                    ui::print_podcast(&ready);
                }
                Err(e) if e.is_poll_timeout() => ui::print_still_processing(&e),
                Err(e) => warn!(error = %e, "podcast generation failed"),
            }
        }
    }

    if let Some(dest) = &args.output {
        let download = PresentationDownload::new(config.presentation_poll.clone());
        let mut round = 0;
        loop {
            match download.fetch(gateway, &result.artifact_name, dest, &cancel).await {
                Ok(saved) => {
                    println!("  Saved {} ({} bytes)", saved.path.display(), saved.bytes);
                    if args.cleanup {
                        download.cleanup(gateway, true).await;
                    }
                    break;
                }
                Err(e) if e.is_poll_timeout() && round < REPOLL_ROUNDS && !cancel.is_cancelled() => {
                    round += 1;
                    ui::print_repoll(&e, round, REPOLL_ROUNDS);
                }
                Err(e) if e.is_poll_timeout() => {
                    ui::print_still_processing(&e);
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    info!(
        artifact = %result.artifact_name,
        gallery_ready = result.gallery_ready,
        podcast_ready = result.podcast_ready,
        "run finished"
    );
    Ok(())
}

//! Interface de terminal do paperflow: barra de progresso e saída colorida.
//!
//! Usa as crates `indicatif` para a barra de progresso e `console` para
//! estilização com cores. O [`TerminalProgress`] é um [`ProgressListener`]
//! que acompanha visualmente uma execução do pipeline no terminal.

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::error::PaperflowError;
use crate::features::{GalleryLoad, ReadyPodcast};
use crate::pipeline::{NextStep, RunOutcome, RunSummary, StageDescriptor, StageWarning};
use crate::reporter::{GalleryState, ProgressListener, StatusSnapshot};

const BAR_TEMPLATE: &str = "{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}";

/// Indicador visual de progresso para uma execução do pipeline.
///
/// Exibe uma barra de 0 a 100 alimentada pelos snapshots do reporter e
/// mensagens coloridas para sucesso (verde), falha (vermelho) e avisos (amarelo).
pub struct TerminalProgress {
    // Barra de progresso do indicatif.
    pb: ProgressBar,
    // Estilo verde para mensagens de sucesso.
    green: Style,
    // Estilo vermelho para mensagens de falha.
    red: Style,
    // Estilo amarelo para avisos.
    yellow: Style,
}

impl TerminalProgress {
    /// Inicia a barra com a referência do documento e retorna a instância de progresso.
    pub fn start(document: &str) -> Self {
        let pb = ProgressBar::new(100);
        // Template inválido cai no estilo padrão em vez de abortar.
        let style = ProgressStyle::default_bar()
            .template(BAR_TEMPLATE)
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");
        pb.set_style(style);
        pb.set_message(format!("Starting: {document}"));
        pb.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            pb,
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
        }
    }

    /// Finaliza a barra e exibe o próximo passo da execução.
    ///
    /// Sucesso é mostrado em verde com checkmark; falha em vermelho com X.
    pub fn complete(&self, next: &NextStep) {
        self.pb.finish_and_clear();
        match next {
            NextStep::NavigateWithResult(result) => {
                println!(
                    "  {} Presentation ready: {}",
                    self.green.apply_to("✓"),
                    result.artifact_name
                );
            }
            NextStep::NavigateWithError { stage, message } => {
                let stage = stage.as_deref().unwrap_or("pipeline");
                println!("  {} {stage}: {message}", self.red.apply_to("✗"));
                println!("    Run the same command again to restart from the first stage.");
            }
            NextStep::Cancelled => {
                println!("  {} Run cancelled", self.yellow.apply_to("■"));
            }
        }
    }
}

/// Mensagem exibida ao lado da barra.
fn snapshot_message(snapshot: &StatusSnapshot) -> String {
    let mut message = format!("{} ({}s)", snapshot.status_text, snapshot.elapsed_seconds);
    if snapshot.gallery != GalleryState::Disabled {
        message.push_str(&format!(" · gallery {}", snapshot.gallery.label()));
    }
    message
}

impl ProgressListener for TerminalProgress {
    fn on_snapshot(&self, snapshot: &StatusSnapshot) {
        self.pb.set_position(u64::from(snapshot.percent));
        self.pb.set_message(snapshot_message(snapshot));
    }

    fn on_warning(&self, warning: &StageWarning) {
        self.pb.println(format!(
            "  {} {} skipped: {}",
            self.yellow.apply_to("!"),
            warning.stage,
            warning.message
        ));
    }
}

/// Imprime o resumo da execução formatado em JSON com estilo colorido.
pub fn print_summary(summary: &RunSummary) {
    let style = match summary.outcome {
        RunOutcome::Succeeded { .. } => Style::new().green().bold(),
        RunOutcome::Failed { .. } => Style::new().red().bold(),
        _ => Style::new().yellow(),
    };
    println!();
    println!("{}", style.apply_to("─── Run Summary ───"));
    println!("{}", serde_json::to_string_pretty(summary).unwrap_or_default());
}

/// Imprime a tabela de etapas com timeout, obrigatoriedade e checkpoint.
pub fn print_stages(stages: &[StageDescriptor]) {
    let dim = Style::new().dim();
    println!("{}", dim.apply_to(format!("{:<3} {:<26} {:<9} {:<9} {:>4}", "#", "stage", "timeout", "required", "%")));
    for (index, stage) in stages.iter().enumerate() {
        let timeout = format!("{:?}", stage.timeout).to_lowercase();
        let required = if stage.required { "yes" } else { "no" };
        println!(
            "{:<3} {:<26} {:<9} {:<9} {:>4}",
            index + 1,
            stage.name,
            timeout,
            required,
            stage.checkpoint
        );
    }
}

/// Exibe uma nova rodada de polling após um timeout.
pub fn print_repoll(err: &PaperflowError, round: u32, max: u32) {
    println!("  {} {err}; polling again {round}/{max}", Style::new().yellow().apply_to("↻"));
}

/// Exibe um timeout de polling que esgotou as rodadas extras.
pub fn print_still_processing(err: &PaperflowError) {
    println!("  {} {err}", Style::new().yellow().apply_to("…"));
}

/// Imprime o podcast gerado e sua transcrição.
pub fn print_podcast(ready: &ReadyPodcast) {
    let green = Style::new().green().bold();
    println!(
        "  {} Podcast ready: {} ({} bytes)",
        green.apply_to("✓"),
        ready.podcast.podcast_url,
        ready.audio_bytes
    );
    println!();
    println!("{}", ready.podcast.transcript());
}

/// Imprime o estado final da galeria e os títulos das tabelas.
pub fn print_gallery(load: &GalleryLoad) {
    let style = if load.state.is_ready() {
        Style::new().green().bold()
    } else {
        Style::new().yellow()
    };
    println!("  {} Gallery {}", style.apply_to("●"), load.state.label());
    if let Some(data) = &load.data {
        for image in &data.images {
            println!("    image {}: {}", image.id, image.caption.as_deref().unwrap_or("-"));
        }
        for table in data.tables.iter().filter(|t| !t.title.is_empty()) {
            println!("    table: {}", table.title);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn snapshot(gallery: GalleryState) -> StatusSnapshot {
        StatusSnapshot {
            run_id: Uuid::new_v4(),
            status_text: "Processing template...".into(),
            percent: 20,
            elapsed_seconds: 7,
            gallery,
            outcome: RunOutcome::Running,
        }
    }

    #[test]
    fn message_without_gallery() {
        assert_eq!(snapshot_message(&snapshot(GalleryState::Disabled)), "Processing template... (7s)");
    }

    #[test]
    fn message_with_gallery_state() {
        let message = snapshot_message(&snapshot(GalleryState::Processing {
            attempt: 2,
            max_attempts: 30,
        }));
        assert_eq!(message, "Processing template... (7s) · gallery processing (2/30)");
    }

    #[test]
    fn listener_moves_the_bar() {
        let progress = TerminalProgress::start("https://arxiv.org/pdf/1706.03762");
        progress.on_snapshot(&snapshot(GalleryState::Disabled));
        assert_eq!(progress.pb.position(), 20);
        progress.complete(&NextStep::Cancelled);
        assert!(progress.pb.is_finished());
    }
}

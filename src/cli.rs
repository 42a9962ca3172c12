//! Interface de linha de comando do paperflow baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (generate, podcast,
//! gallery, stages) e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::features::PromptModifiers;
use crate::pipeline::AudienceLevel;

/// paperflow: transforma artigos científicos em apresentações, podcasts e galerias.
#[derive(Debug, Parser)]
#[command(name = "paperflow", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho para um arquivo de configuração (padrão: ./paperflow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Público-alvo aceito pela CLI, mapeado para [`AudienceLevel`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum AudienceArg {
    /// Pesquisadores de doutorado.
    Phd,
    /// Estudantes de mestrado.
    Masters,
    /// Estudantes de graduação.
    Undergraduate,
}

impl From<AudienceArg> for AudienceLevel {
    fn from(arg: AudienceArg) -> Self {
        match arg {
            AudienceArg::Phd => AudienceLevel::Phd,
            AudienceArg::Masters => AudienceLevel::Masters,
            AudienceArg::Undergraduate => AudienceLevel::Undergraduate,
        }
    }
}

/// Opções do roteiro do podcast.
#[derive(Debug, Clone, Args)]
pub struct PodcastArgs {
    /// Tom da conversa.
    #[arg(long, default_value = "fun")]
    pub tone: String,

    /// Duração aproximada.
    #[arg(long, default_value = "Medium (3-5 min)")]
    pub length: String,

    /// Idioma do áudio.
    #[arg(long, default_value = "English")]
    pub language: String,

    /// Pergunta que o convidado deve responder.
    #[arg(long)]
    pub question: Option<String>,
}

impl PodcastArgs {
    pub fn modifiers(&self) -> PromptModifiers {
        PromptModifiers::new(&self.tone, &self.length, &self.language, self.question.as_deref())
    }
}

/// Opções do subcomando `generate`.
#[derive(Debug, Clone, Args)]
pub struct GenerateArgs {
    /// URL do artigo (PDF ou página do arXiv).
    #[arg(required_unless_present = "file", conflicts_with = "file")]
    pub url: Option<String>,

    /// Caminho para um PDF local enviado no lugar da URL.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Público-alvo da apresentação.
    #[arg(long, value_enum, default_value_t = AudienceArg::Masters)]
    pub level: AudienceArg,

    /// Número de slides.
    #[arg(long, default_value_t = 10)]
    pub slides: u32,

    /// Template do PowerPoint.
    #[arg(long)]
    pub template: String,

    /// Tópico a destacar; repetível. Sem tópicos, todos são usados.
    #[arg(long = "topic")]
    pub topics: Vec<String>,

    /// Extrai figuras e tabelas em paralelo com o pipeline. Exige uma URL.
    #[arg(long, default_value_t = false, conflicts_with = "file")]
    pub gallery: bool,

    /// Gera também um podcast após a apresentação.
    #[arg(long, default_value_t = false)]
    pub podcast: bool,

    #[command(flatten)]
    pub podcast_args: PodcastArgs,

    /// Onde salvar o arquivo .pptx gerado.
    #[arg(long, short)]
    pub output: Option<PathBuf>,

    /// Limpa os dados intermediários do backend após o download.
    #[arg(long, default_value_t = false, requires = "output")]
    pub cleanup: bool,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Gera uma apresentação a partir de um artigo.
    Generate(GenerateArgs),

    /// Gera apenas o podcast de um artigo.
    Podcast {
        /// URL do artigo.
        url: String,

        #[command(flatten)]
        podcast_args: PodcastArgs,
    },

    /// Carrega (ou processa) a galeria de figuras de um artigo.
    Gallery {
        /// URL do artigo.
        url: String,
    },

    /// Lista as etapas do pipeline com seus checkpoints.
    Stages,
}

//! Configuração do paperflow carregada a partir de `paperflow.toml`.
//!
//! A struct [`PaperflowConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! As variáveis de ambiente `PAPERFLOW_BACKEND_URL` e `PAPERFLOW_GALLERY_URL`
//! têm precedência sobre o arquivo.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::gateway::{ServiceUrls, TimeoutPolicy};
use crate::poller::PollConfig;

/// Nome do arquivo procurado no diretório atual.
pub const CONFIG_FILE: &str = "paperflow.toml";

/// Configuração de nível superior carregada de `paperflow.toml`.
#[derive(Debug, Clone, Deserialize)]
pub struct PaperflowConfig {
    /// URL base do backend de análise e geração.
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// URL base do serviço de galeria.
    #[serde(default = "default_gallery_url")]
    pub gallery_url: String,

    /// Timeout das chamadas comuns, em segundos.
    #[serde(default = "default_standard_timeout_secs")]
    pub standard_timeout_secs: u64,

    /// Timeout das chamadas de geração longas, em segundos.
    #[serde(default = "default_extended_timeout_secs")]
    pub extended_timeout_secs: u64,

    /// Timeout de conexão, em segundos.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Orçamento de polling da galeria.
    #[serde(default = "default_gallery_poll")]
    pub gallery_poll: PollConfig,

    /// Orçamento de polling do áudio do podcast.
    #[serde(default = "default_podcast_poll")]
    pub podcast_poll: PollConfig,

    /// Orçamento de polling do download da apresentação.
    #[serde(default = "default_presentation_poll")]
    pub presentation_poll: PollConfig,
}

// Backend local padrão: "http://localhost:8000".
fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

// Serviço de galeria padrão: "http://127.0.0.1:8001".
fn default_gallery_url() -> String {
    "http://127.0.0.1:8001".to_string()
}

// Timeout padrão: 120s.
fn default_standard_timeout_secs() -> u64 {
    120
}

// Timeout estendido padrão: 600s.
fn default_extended_timeout_secs() -> u64 {
    600
}

// Timeout de conexão padrão: 10s.
fn default_connect_timeout_secs() -> u64 {
    10
}

// Galeria: 30 tentativas a cada 2s, redisparo a cada 10, no máximo 3 vezes.
fn default_gallery_poll() -> PollConfig {
    PollConfig {
        max_attempts: 30,
        interval_ms: 2000,
        retrigger_every: 10,
        max_retriggers: 3,
        ..PollConfig::default()
    }
}

// Podcast: 30 tentativas a cada 2s, sem redisparo.
fn default_podcast_poll() -> PollConfig {
    PollConfig::default()
}

// Apresentação: 30 tentativas a cada 2s, sem redisparo.
fn default_presentation_poll() -> PollConfig {
    PollConfig::default()
}

impl Default for PaperflowConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            gallery_url: default_gallery_url(),
            standard_timeout_secs: default_standard_timeout_secs(),
            extended_timeout_secs: default_extended_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            gallery_poll: default_gallery_poll(),
            podcast_poll: default_podcast_poll(),
            presentation_poll: default_presentation_poll(),
        }
    }
}

impl PaperflowConfig {
    /// Carrega a configuração de `paperflow.toml` no diretório atual.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load() -> Result<Self> {
        let path = Path::new(CONFIG_FILE);
        let config = if path.exists() {
            Self::read(path)?
        } else {
            Self::default()
        };
        Ok(config.with_env_overrides())
    }

    /// Carrega a configuração de um caminho explícito (`--config`).
    /// O arquivo precisa existir.
    pub fn load_from(path: &Path) -> Result<Self> {
        Ok(Self::read(path)?.with_env_overrides())
    }

    fn read(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str::<PaperflowConfig>(&contents)
            .with_context(|| format!("invalid configuration in {}", path.display()))
    }

    // Variáveis de ambiente têm precedência sobre o arquivo de configuração.
    fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("PAPERFLOW_BACKEND_URL")
            && !url.is_empty()
        {
            self.backend_url = url;
        }
        if let Ok(url) = std::env::var("PAPERFLOW_GALLERY_URL")
            && !url.is_empty()
        {
            self.gallery_url = url;
        }
        self
    }

    /// URLs base de cada serviço.
    pub fn service_urls(&self) -> ServiceUrls {
        ServiceUrls {
            backend: self.backend_url.clone(),
            gallery: self.gallery_url.clone(),
        }
    }

    /// Durações concretas das classes de timeout.
    pub fn timeouts(&self) -> TimeoutPolicy {
        TimeoutPolicy {
            standard: Duration::from_secs(self.standard_timeout_secs),
            extended: Duration::from_secs(self.extended_timeout_secs),
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

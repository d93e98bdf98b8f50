//! Environment configuration.
//!
//! Every knob is read once by [`Settings::from_env`]; blank values count as unset
//! and numeric values are clamped to sane bounds.

use crate::semantic::SemanticConfig;
use crate::taxonomy::{builtin_taxonomy, load_taxonomy};
use serde::Serialize;
use specsplit_core::{ResolutionMode, Result, Taxonomy};
use std::path::PathBuf;
use std::time::Duration;

pub(crate) fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn env_u64(key: &str, default: u64, min: u64, max: u64) -> u64 {
    env(key)
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(default)
        .clamp(min, max)
}

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-2.5-pro";
pub const DEFAULT_VERTEX_LOCATION: &str = "europe-west1";

pub fn gemini_api_key_from_env() -> Option<String> {
    env("SPECSPLIT_GEMINI_API_KEY")
        .or_else(|| env("GEMINI_API_KEY"))
        .or_else(|| env("GOOGLE_API_KEY"))
}

#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    #[serde(skip)]
    pub api_key: Option<String>,
    pub project: Option<String>,
    pub vertex_location: String,
    #[serde(skip)]
    pub vertex_access_token: Option<String>,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_ms: u64,
    pub batch_size: usize,
    pub max_retries: u32,
    pub batch_pause_ms: u64,
    pub mode: ResolutionMode,
    /// Category file; the builtin construction taxonomy when unset.
    pub categories_path: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            api_key: None,
            project: None,
            vertex_location: DEFAULT_VERTEX_LOCATION.to_string(),
            vertex_access_token: None,
            model: DEFAULT_GEMINI_MODEL.to_string(),
            base_url: None,
            timeout_ms: 120_000,
            batch_size: 5,
            max_retries: 3,
            batch_pause_ms: 2_000,
            mode: ResolutionMode::Auto,
            categories_path: None,
        }
    }
}

impl Settings {
    /// Fails only on values that cannot be interpreted (an unknown mode).
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let mode = match env("SPECSPLIT_MODE") {
            Some(m) => m.parse()?,
            None => d.mode,
        };
        Ok(Self {
            api_key: gemini_api_key_from_env(),
            project: env("GOOGLE_CLOUD_PROJECT"),
            vertex_location: env("SPECSPLIT_VERTEX_LOCATION").unwrap_or(d.vertex_location),
            vertex_access_token: env("SPECSPLIT_VERTEX_ACCESS_TOKEN"),
            model: env("SPECSPLIT_GEMINI_MODEL").unwrap_or(d.model),
            base_url: env("SPECSPLIT_GEMINI_BASE_URL"),
            timeout_ms: env_u64("SPECSPLIT_GEMINI_TIMEOUT_MS", d.timeout_ms, 1_000, 600_000),
            batch_size: env_u64("SPECSPLIT_BATCH_SIZE", d.batch_size as u64, 1, 50) as usize,
            max_retries: env_u64("SPECSPLIT_MAX_RETRIES", d.max_retries as u64, 1, 10) as u32,
            batch_pause_ms: env_u64("SPECSPLIT_BATCH_PAUSE_MS", d.batch_pause_ms, 0, 60_000),
            mode,
            categories_path: env("SPECSPLIT_CATEGORIES").map(PathBuf::from),
        })
    }

    pub fn semantic_config(&self) -> SemanticConfig {
        SemanticConfig {
            batch_size: self.batch_size,
            max_retries: self.max_retries,
            inter_batch_delay: Duration::from_millis(self.batch_pause_ms),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// The configured category file, or the builtin taxonomy.
    pub fn taxonomy(&self) -> Result<Taxonomy> {
        match &self.categories_path {
            Some(p) => load_taxonomy(p),
            None => Ok(builtin_taxonomy()),
        }
    }
}

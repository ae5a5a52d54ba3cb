//! Configuration for figure description runs.
//!
//! All behaviour is controlled through [`DescribeConfig`], built via its
//! [`DescribeConfigBuilder`] or loaded from `~/.ieeU/settings.json` with
//! [`DescribeConfig::load`]. Validation happens once, in
//! [`DescribeConfigBuilder::build`], so a bad value fails before the first
//! remote call instead of halfway through a document.
//!
//! ## Settings file
//!
//! ```json
//! {
//!   "endpoint": "https://api.example.com/v1/chat/completions",
//!   "key": "sk-…",
//!   "modelName": "qwen-vl-max",
//!   "timeout": 60,
//!   "retries": 3,
//!   "maxConcurrency": 5
//! }
//! ```
//!
//! `IEEU_ENDPOINT`, `IEEU_KEY` and `IEEU_MODEL` override the file.

use crate::error::IeeuError;
use crate::pipeline::vlm::VisionBackend;
use crate::progress::ProgressCallback;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_RETRIES: u32 = 3;
pub const DEFAULT_MAX_CONCURRENCY: usize = 5;
/// Items per dispatch chunk. Independent of `max_concurrency`.
pub const DEFAULT_BATCH_SIZE: usize = 10;
pub const DEFAULT_RETRY_BACKOFF_MS: u64 = 1000;
pub const DEFAULT_MAX_TOKENS: usize = 4096;

/// Directory under `$HOME` holding the settings file.
pub const CONFIG_DIR_NAME: &str = ".ieeU";
pub const CONFIG_FILE_NAME: &str = "settings.json";

pub const ENV_ENDPOINT: &str = "IEEU_ENDPOINT";
pub const ENV_KEY: &str = "IEEU_KEY";
pub const ENV_MODEL: &str = "IEEU_MODEL";

/// Configuration for describing the figures of one or more documents.
///
/// # Example
/// ```rust
/// use edgequake_ieeu::DescribeConfig;
///
/// let config = DescribeConfig::builder()
///     .endpoint("https://api.example.com/v1/chat/completions")
///     .api_key("sk-test")
///     .model("qwen-vl-max")
///     .max_concurrency(8)
///     .build()
///     .unwrap();
/// assert_eq!(config.retries, 3);
/// ```
#[derive(Clone)]
pub struct DescribeConfig {
    /// Chat-completions URL of the VLM endpoint.
    pub endpoint: String,

    /// Bearer credential.
    pub api_key: String,

    /// Model identifier sent with every request.
    pub model: String,

    /// Per-call timeout in seconds. Default: 60.
    ///
    /// Applies to each HTTP round trip independently; a dispatch has no
    /// overall deadline.
    pub timeout_secs: u64,

    /// Attempts per image within one describe call. Default: 3.
    pub retries: u32,

    /// Ceiling on simultaneous in-flight calls. Default: 5.
    ///
    /// Bounds the concurrent runner regardless of chunk size. If the endpoint
    /// pushes back with 429s the dispatcher drops to one call at a time on its
    /// own, so this only needs lowering for endpoints that fail differently.
    pub max_concurrency: usize,

    /// Items per dispatch chunk. Default: 10.
    ///
    /// The dispatcher re-evaluates its strategy after every chunk, so this
    /// also sets how quickly it reacts to rate limiting.
    pub batch_size: usize,

    /// Backoff unit in milliseconds. Default: 1000.
    ///
    /// Between attempts the describer sleeps `unit × 2^attempt`, or
    /// `unit × 5 × (attempt + 1)` after a rate-limit response.
    pub retry_backoff_ms: u64,

    /// Maximum tokens the model may generate per figure. Default: 4096.
    pub max_tokens: usize,

    /// Custom instruction prompt. If None, uses the built-in figure prompt.
    pub prompt: Option<String>,

    /// Pre-constructed backend. Takes precedence over the HTTP endpoint.
    pub backend: Option<Arc<dyn VisionBackend>>,

    /// Optional progress callback for per-image events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for DescribeConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            api_key: String::new(),
            model: String::new(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            retries: DEFAULT_RETRIES,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            batch_size: DEFAULT_BATCH_SIZE,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_tokens: DEFAULT_MAX_TOKENS,
            prompt: None,
            backend: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for DescribeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescribeConfig")
            .field("endpoint", &self.endpoint)
            .field("api_key", &if self.api_key.is_empty() { "" } else { "<redacted>" })
            .field("model", &self.model)
            .field("timeout_secs", &self.timeout_secs)
            .field("retries", &self.retries)
            .field("max_concurrency", &self.max_concurrency)
            .field("batch_size", &self.batch_size)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("max_tokens", &self.max_tokens)
            .field("backend", &self.backend.as_ref().map(|_| "<dyn VisionBackend>"))
            .finish()
    }
}

impl DescribeConfig {
    /// Create a new builder for `DescribeConfig`.
    pub fn builder() -> DescribeConfigBuilder {
        DescribeConfigBuilder {
            config: Self::default(),
        }
    }

    /// Default settings file location: `~/.ieeU/settings.json`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::home_dir().map(|home| home.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Load from the default settings file plus `IEEU_*` environment overrides.
    ///
    /// Returns a builder so callers can layer CLI flags on top before
    /// validation.
    pub fn load() -> Result<DescribeConfigBuilder, IeeuError> {
        let settings = match Self::default_path() {
            Some(path) => Settings::read(&path)?,
            None => Settings::default(),
        };
        Ok(settings
            .with_overrides(|name| std::env::var(name).ok())
            .into_builder())
    }

    /// Load from an explicit settings file plus `IEEU_*` environment overrides.
    pub fn load_from(path: &Path) -> Result<DescribeConfigBuilder, IeeuError> {
        Ok(Settings::read(path)?
            .with_overrides(|name| std::env::var(name).ok())
            .into_builder())
    }

    /// Re-check the invariants enforced by [`DescribeConfigBuilder::build`].
    ///
    /// Public fields can be edited after building; the dispatcher calls this
    /// before issuing any request.
    pub fn validate(&self) -> Result<(), IeeuError> {
        if self.model.trim().is_empty() {
            return Err(IeeuError::MissingConfig {
                field: "modelName",
                env: ENV_MODEL,
            });
        }
        if self.backend.is_none() {
            if self.endpoint.trim().is_empty() {
                return Err(IeeuError::MissingConfig {
                    field: "endpoint",
                    env: ENV_ENDPOINT,
                });
            }
            if self.api_key.trim().is_empty() {
                return Err(IeeuError::MissingConfig {
                    field: "key",
                    env: ENV_KEY,
                });
            }
            let url = reqwest::Url::parse(&self.endpoint).map_err(|e| {
                IeeuError::InvalidConfig(format!("endpoint '{}' is not a URL: {e}", self.endpoint))
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(IeeuError::InvalidConfig(format!(
                    "endpoint must be http(s), got '{}'",
                    url.scheme()
                )));
            }
        }
        if self.timeout_secs == 0 {
            return Err(IeeuError::InvalidConfig("timeout must be ≥ 1 second".into()));
        }
        if self.retries == 0 {
            return Err(IeeuError::InvalidConfig("retries must be ≥ 1".into()));
        }
        if self.max_concurrency == 0 {
            return Err(IeeuError::InvalidConfig("maxConcurrency must be ≥ 1".into()));
        }
        if self.batch_size == 0 {
            return Err(IeeuError::InvalidConfig("batch size must be ≥ 1".into()));
        }
        Ok(())
    }
}

/// Builder for [`DescribeConfig`].
pub struct DescribeConfigBuilder {
    config: DescribeConfig,
}

impl fmt::Debug for DescribeConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DescribeConfigBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl DescribeConfigBuilder {
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.config.endpoint = endpoint.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.config.timeout_secs = secs;
        self
    }

    pub fn retries(mut self, n: u32) -> Self {
        self.config.retries = n;
        self
    }

    pub fn max_concurrency(mut self, n: usize) -> Self {
        self.config.max_concurrency = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.prompt = Some(prompt.into());
        self
    }

    pub fn backend(mut self, backend: Arc<dyn VisionBackend>) -> Self {
        self.config.backend = Some(backend);
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<DescribeConfig, IeeuError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

// ── Settings file ────────────────────────────────────────────────────────

/// On-disk shape of `settings.json`. Every field is optional; defaults and
/// environment overrides fill the gaps before validation.
#[derive(Debug, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub endpoint: Option<String>,
    pub key: Option<String>,
    pub model_name: Option<String>,
    pub timeout: Option<u64>,
    pub retries: Option<u32>,
    pub max_concurrency: Option<usize>,
    pub batch_size: Option<usize>,
}

impl Settings {
    /// Read a settings file. A missing file yields empty settings.
    pub fn read(path: &Path) -> Result<Self, IeeuError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings file at {}", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(IeeuError::ConfigRead {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::parse(&text).map_err(|source| IeeuError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parse settings JSON. Negative numbers are rejected here.
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Apply `IEEU_ENDPOINT` / `IEEU_KEY` / `IEEU_MODEL` from `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = lookup(ENV_ENDPOINT) {
            self.endpoint = Some(v);
        }
        if let Some(v) = lookup(ENV_KEY) {
            self.key = Some(v);
        }
        if let Some(v) = lookup(ENV_MODEL) {
            self.model_name = Some(v);
        }
        self
    }

    /// Seed a builder with these settings; unset fields keep their defaults.
    pub fn into_builder(self) -> DescribeConfigBuilder {
        let mut builder = DescribeConfig::builder();
        if let Some(v) = self.endpoint {
            builder = builder.endpoint(v);
        }
        if let Some(v) = self.key {
            builder = builder.api_key(v);
        }
        if let Some(v) = self.model_name {
            builder = builder.model(v);
        }
        if let Some(v) = self.timeout {
            builder = builder.timeout_secs(v);
        }
        if let Some(v) = self.retries {
            builder = builder.retries(v);
        }
        if let Some(v) = self.max_concurrency {
            builder = builder.max_concurrency(v);
        }
        if let Some(v) = self.batch_size {
            builder = builder.batch_size(v);
        }
        builder
    }
}

//! Single-image description: encode → call with retry → parse.
//!
//! ## Retry Strategy
//!
//! Up to `retries` attempts per image. The wait between attempts depends on
//! why the last one failed, and lives in one function ([`retry_delay`]) so the
//! schedule can be read at a glance:
//!
//! | Last failure  | Wait before next attempt        |
//! |---------------|---------------------------------|
//! | `AuthError`   | none, give up immediately       |
//! | `RateLimited` | `unit × 5 × (attempt + 1)`      |
//! | anything else | `unit × 2^attempt`              |
//!
//! With the default 1 s unit and 3 attempts a rate-limited image waits 5 s
//! then 10 s; a flaky one waits 1 s then 2 s.

use crate::config::DescribeConfig;
use crate::error::IeeuError;
use crate::pipeline::classify::{classify, ErrorKind};
use crate::pipeline::encode::encode_file;
use crate::pipeline::vlm::{HttpVisionBackend, VisionBackend, VisionRequest};
use crate::prompts::DEFAULT_FIGURE_PROMPT;
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Describes one image at a time. Cheap to share; holds no per-item state.
#[derive(Clone)]
pub struct Describer {
    backend: Arc<dyn VisionBackend>,
    model: String,
    prompt: String,
    max_tokens: usize,
    retries: u32,
    backoff_unit: Duration,
}

impl Describer {
    /// Wrap an explicit backend with the request and retry settings of `config`.
    pub fn new(backend: Arc<dyn VisionBackend>, config: &DescribeConfig) -> Self {
        Self {
            backend,
            model: config.model.clone(),
            prompt: config
                .prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_FIGURE_PROMPT.to_string()),
            max_tokens: config.max_tokens,
            retries: config.retries,
            backoff_unit: Duration::from_millis(config.retry_backoff_ms),
        }
    }

    /// Use the injected backend if present, otherwise the HTTP endpoint.
    pub fn from_config(config: &DescribeConfig) -> Result<Self, IeeuError> {
        let backend: Arc<dyn VisionBackend> = match config.backend {
            Some(ref backend) => Arc::clone(backend),
            None => Arc::new(HttpVisionBackend::from_config(config)?),
        };
        Ok(Self::new(backend, config))
    }

    /// Describe the image at `location`.
    ///
    /// Returns the description, or the [`ErrorKind`] of the last failed
    /// attempt. An unreadable file is `Unknown` and never reaches the network.
    pub async fn describe(&self, location: &Path) -> Result<String, ErrorKind> {
        let source = location.display().to_string();

        let image = match encode_file(location).await {
            Ok(image) => image,
            Err(e) => {
                warn!("{}: failed to read image: {}", source, e);
                return Err(ErrorKind::Unknown);
            }
        };

        let request = VisionRequest {
            source,
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            max_tokens: self.max_tokens,
            image,
        };

        let mut last_kind = ErrorKind::Unknown;

        for attempt in 0..self.retries {
            match self.backend.complete(&request).await {
                Ok(text) => {
                    return match parse_figure_response(&text) {
                        Some(description) => {
                            debug!(
                                "{}: described in {} attempt(s), {} chars",
                                request.source,
                                attempt + 1,
                                description.len()
                            );
                            Ok(description)
                        }
                        None => {
                            warn!("{}: model returned an empty answer", request.source);
                            Err(ErrorKind::Unknown)
                        }
                    };
                }
                Err(failure) => {
                    last_kind = classify(&failure);
                    warn!(
                        "{}: attempt {}/{} failed ({}): {}",
                        request.source,
                        attempt + 1,
                        self.retries,
                        last_kind,
                        failure
                    );

                    if attempt + 1 >= self.retries {
                        break;
                    }
                    match retry_delay(last_kind, attempt, self.backoff_unit) {
                        Some(delay) => sleep(delay).await,
                        None => break,
                    }
                }
            }
        }

        Err(last_kind)
    }
}

/// Wait before attempt `attempt + 1`, or `None` when retrying is pointless.
pub fn retry_delay(kind: ErrorKind, attempt: u32, unit: Duration) -> Option<Duration> {
    match kind {
        ErrorKind::AuthError => None,
        ErrorKind::RateLimited => {
            Some(scale(unit, 5u32.saturating_mul(attempt.saturating_add(1))))
        }
        _ => Some(scale(unit, 2u32.saturating_pow(attempt))),
    }
}

/// `unit * factor`, saturating at `Duration::MAX`.
fn scale(unit: Duration, factor: u32) -> Duration {
    unit.checked_mul(factor).unwrap_or(Duration::MAX)
}

static RE_FIGURE_BLOCK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```figure(?:[ \t][^\n]*)?\n([\s\S]*?)\n[ \t]*```").unwrap());

/// Extract the description from a model answer.
///
/// Prefers the content of the first ```` ```figure ```` block; otherwise the
/// whole answer. `None` when there is nothing but whitespace.
pub fn parse_figure_response(text: &str) -> Option<String> {
    let description = match RE_FIGURE_BLOCK.captures(text) {
        Some(caps) => caps[1].trim().to_string(),
        None => text.trim().to_string(),
    };
    if description.is_empty() {
        None
    } else {
        Some(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNIT: Duration = Duration::from_secs(1);

    #[test]
    fn exponential_backoff_for_transient_errors() {
        assert_eq!(retry_delay(ErrorKind::Timeout, 0, UNIT), Some(Duration::from_secs(1)));
        assert_eq!(retry_delay(ErrorKind::ServerError, 1, UNIT), Some(Duration::from_secs(2)));
        assert_eq!(retry_delay(ErrorKind::Unknown, 2, UNIT), Some(Duration::from_secs(4)));
        assert_eq!(
            retry_delay(ErrorKind::ConcurrencyPressure, 3, UNIT),
            Some(Duration::from_secs(8))
        );
    }

    #[test]
    fn linear_backoff_for_rate_limits() {
        assert_eq!(retry_delay(ErrorKind::RateLimited, 0, UNIT), Some(Duration::from_secs(5)));
        assert_eq!(retry_delay(ErrorKind::RateLimited, 1, UNIT), Some(Duration::from_secs(10)));
    }

    #[test]
    fn auth_errors_are_not_retried() {
        assert_eq!(retry_delay(ErrorKind::AuthError, 0, UNIT), None);
    }

    #[test]
    fn backoff_scales_with_unit() {
        let unit = Duration::from_millis(10);
        assert_eq!(retry_delay(ErrorKind::Timeout, 2, unit), Some(Duration::from_millis(40)));
    }

    #[test]
    fn huge_unit_saturates_instead_of_overflowing() {
        let unit = Duration::from_millis(u64::MAX);
        assert_eq!(retry_delay(ErrorKind::Timeout, 5, unit), Some(Duration::MAX));
        assert_eq!(retry_delay(ErrorKind::RateLimited, 2, unit), Some(Duration::MAX));
        assert_eq!(
            retry_delay(ErrorKind::Unknown, 40, UNIT),
            Some(Duration::from_secs(u64::from(u32::MAX)))
        );
    }

    #[test]
    fn parse_accepts_numbered_figure_fence() {
        let text = "```figure 2\nA scatter plot.\n```";
        assert_eq!(parse_figure_response(text).as_deref(), Some("A scatter plot."));
    }

    #[test]
    fn parse_ignores_lookalike_fences() {
        let text = "```figures\nNot a figure block.\n```";
        assert_eq!(parse_figure_response(text).as_deref(), Some(text));
        let text = "```figurine\nStill not one.\n```";
        assert_eq!(parse_figure_response(text).as_deref(), Some(text));
    }

    #[test]
    fn parse_extracts_figure_block() {
        let text = "Here you go:\n```figure\n  A bar chart of latency.  \n```\nThanks";
        assert_eq!(
            parse_figure_response(text).as_deref(),
            Some("A bar chart of latency.")
        );
    }

    #[test]
    fn parse_keeps_multiline_block() {
        let text = "```figure\nLine one.\n\nLine two.\n```";
        assert_eq!(
            parse_figure_response(text).as_deref(),
            Some("Line one.\n\nLine two.")
        );
    }

    #[test]
    fn parse_falls_back_to_whole_answer() {
        let text = "\n  A flow diagram with three stages.\n";
        assert_eq!(
            parse_figure_response(text).as_deref(),
            Some("A flow diagram with three stages.")
        );
    }

    #[test]
    fn parse_ignores_other_fences() {
        let text = "```python\nprint(1)\n```";
        assert_eq!(parse_figure_response(text).as_deref(), Some(text));
    }

    #[test]
    fn parse_empty_answer_is_none() {
        assert_eq!(parse_figure_response("   \n"), None);
        assert_eq!(parse_figure_response("```figure\n\n```"), None);
    }
}

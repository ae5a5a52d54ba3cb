//! # edgequake-ieeu
//!
//! Replace the figures of MinerU-generated Markdown with text descriptions
//! produced by a Vision Language Model (VLM).
//!
//! ## Why this crate?
//!
//! A PDF converted to Markdown keeps its figures as opaque image links. For
//! search, LLM context, or screen readers, a short textual description is far
//! more useful. Describing a paper means dozens of VLM calls against an
//! endpoint that rate-limits, times out, and sometimes rejects the key
//! outright. The [`Dispatcher`] runs those calls in bounded-concurrent chunks
//! and adapts after each chunk: retry stragglers one at a time, fall back to
//! strictly sequential calls when the endpoint pushes back, and stop at once
//! when the credential is refused.
//!
//! ## Pipeline Overview
//!
//! ```text
//! full.md
//!  │
//!  ├─ 1. Extract   ![..](images/..) references → WorkItems
//!  ├─ 2. Dispatch  chunked, adaptive concurrency (see `dispatch`)
//!  │      └─ per image: encode → VLM call → classify → retry/backoff
//!  ├─ 3. Substitute described images with ```figure N``` blocks
//!  └─ 4. Output    full.iee.md (atomic write) + DocumentReport
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use edgequake_ieeu::{describe_document, DescribeConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // ~/.ieeU/settings.json, overridden by IEEU_ENDPOINT / IEEU_KEY / IEEU_MODEL
//!     let config = DescribeConfig::load()?.build()?;
//!     let report = describe_document("paper/full.md", &config).await?;
//!     eprintln!("{}/{} figures described", report.described, report.images);
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `ieeu` binary (clap + anyhow + indicatif + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! edgequake-ieeu = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod dispatch;
pub mod error;
pub mod markdown;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{DescribeConfig, DescribeConfigBuilder, Settings};
pub use convert::{describe_directory, describe_document};
pub use dispatch::{assess_chunk, ChunkVerdict, Dispatcher};
pub use error::{CallFailure, IeeuError};
pub use markdown::ImageReference;
pub use output::{BatchOutcome, BatchResult, DirectoryReport, DocumentFailure, DocumentReport};
pub use pipeline::classify::{classify, ErrorKind};
pub use pipeline::describe::Describer;
pub use pipeline::encode::ImagePayload;
pub use pipeline::runner::WorkItem;
pub use pipeline::vlm::{HttpVisionBackend, VisionBackend, VisionRequest};
pub use progress::{DescribeProgressCallback, NoopProgressCallback, ProgressCallback};

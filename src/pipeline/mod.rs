//! Per-image stages and the runners that drive them.
//!
//! ## Data Flow
//!
//! ```text
//! encode ──▶ vlm ──▶ classify ──▶ describe (retry) ──▶ runner
//! (base64)   (HTTP)  (ErrorKind)                       (concurrent | sequential)
//! ```
//!
//! 1. [`encode`]: read the image file, sniff its MIME type, base64-wrap it
//! 2. [`vlm`]: the [`vlm::VisionBackend`] seam and its OpenAI-compatible
//!    HTTP implementation; the only stage with network I/O
//! 3. [`classify`]: map a failed call to an [`classify::ErrorKind`]
//! 4. [`describe`]: one image end to end, with kind-aware backoff
//! 5. [`runner`]: many images, bounded-concurrent or one at a time

pub mod classify;
pub mod describe;
pub mod encode;
pub mod runner;
pub mod vlm;

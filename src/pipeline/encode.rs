//! Image encoding: file on disk → base64 payload for the VLM request body.
//!
//! Figures extracted from documents are already compressed (JPEG or PNG), so
//! the bytes are sent as-is rather than decoded and re-encoded. Only the MIME
//! type is sniffed from the magic bytes so the data URL is labelled correctly.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use std::path::Path;
use tracing::debug;

/// MIME type used when the bytes are not a format `image` recognises.
pub const FALLBACK_MIME: &str = "image/jpeg";

/// A base64-encoded image ready to embed in a chat request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePayload {
    pub mime_type: String,
    pub data: String,
}

impl ImagePayload {
    /// Encode raw image bytes.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mime_type = image::guess_format(bytes)
            .map(|f| f.to_mime_type().to_string())
            .unwrap_or_else(|_| FALLBACK_MIME.to_string());

        let data = STANDARD.encode(bytes);
        debug!("Encoded image → {} bytes base64 ({})", data.len(), mime_type);

        Self { mime_type, data }
    }

    /// `data:` URL form accepted by OpenAI-compatible `image_url` parts.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Read and encode the image at `location`.
///
/// Only I/O is fallible here; unknown formats still encode with the fallback
/// MIME type and let the endpoint decide.
pub async fn encode_file(location: &Path) -> std::io::Result<ImagePayload> {
    let bytes = tokio::fs::read(location).await?;
    Ok(ImagePayload::from_bytes(&bytes))
}

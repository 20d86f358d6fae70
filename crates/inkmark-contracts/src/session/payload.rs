use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use sha2::{Digest, Sha256};

/// An image returned by the generation service.
///
/// The payload is shared, so cloning a session snapshot never copies image
/// bytes. There are no setters: a new edit produces a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    payload: Arc<[u8]>,
    media_type: String,
}

impl GeneratedImage {
    pub fn new(payload: impl Into<Arc<[u8]>>, media_type: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            media_type: media_type.into(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn shared_payload(&self) -> Arc<[u8]> {
        Arc::clone(&self.payload)
    }

    /// Self-contained `data:` URI suitable for direct rendering.
    pub fn display_uri(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.media_type,
            BASE64.encode(&self.payload)
        )
    }

    pub fn base64_payload(&self) -> String {
        BASE64.encode(&self.payload)
    }

    /// Short content hash used in logs and listings.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(&self.payload);
        hex::encode(&digest[..8])
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        image::ImageReader::new(Cursor::new(&self.payload[..]))
            .with_guessed_format()
            .ok()?
            .into_dimensions()
            .ok()
    }

    pub fn file_extension(&self) -> &'static str {
        extension_for_media_type(&self.media_type)
    }
}

impl fmt::Debug for GeneratedImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratedImage")
            .field("media_type", &self.media_type)
            .field("bytes", &self.payload.len())
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

/// The second image of an edit request: either the flattened source+overlay
/// raster or the untouched source payload when nothing was drawn.
#[derive(Clone, PartialEq, Eq)]
pub struct CompositeImage {
    payload: Arc<[u8]>,
    media_type: String,
}

impl CompositeImage {
    pub fn new(payload: impl Into<Arc<[u8]>>, media_type: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            media_type: media_type.into(),
        }
    }

    pub fn passthrough(source: &GeneratedImage) -> Self {
        Self {
            payload: source.shared_payload(),
            media_type: source.media_type().to_string(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn base64_payload(&self) -> String {
        BASE64.encode(&self.payload)
    }
}

impl fmt::Debug for CompositeImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeImage")
            .field("media_type", &self.media_type)
            .field("bytes", &self.payload.len())
            .finish()
    }
}

pub fn extension_for_media_type(media_type: &str) -> &'static str {
    let lowered = media_type.trim().to_ascii_lowercase();
    if lowered.contains("jpeg") || lowered.contains("jpg") {
        return "jpg";
    }
    if lowered.contains("webp") {
        return "webp";
    }
    "png"
}

use base64::{engine::general_purpose, Engine};
use std::path::Path;

use crate::error::EncodingError;
use crate::models::ImagePayload;

pub const MAX_IMAGE_BYTES: u64 = 20 * 1024 * 1024;

pub const ACCEPTED_MIME_TYPES: [&str; 3] = ["image/jpeg", "image/png", "image/webp"];

/// Which image types a provider path is willing to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MimePolicy {
    /// jpeg, png and webp only.
    Strict,
    /// Anything; the server side validates.
    Any,
}

/// `Image/JPG; charset=binary` -> `image/jpeg`. This is the form sent to providers.
pub fn canonical_mime(mime_type: &str) -> String {
    let essence = mime_type.split(';').next().unwrap_or_default();
    let lowered = essence.trim().to_ascii_lowercase();
    match lowered.as_str() {
        "image/jpg" | "image/pjpeg" => "image/jpeg".to_string(),
        _ => lowered,
    }
}

pub fn ensure_accepted(mime_type: &str, policy: MimePolicy) -> Result<(), EncodingError> {
    if policy == MimePolicy::Any {
        return Ok(());
    }

    if ACCEPTED_MIME_TYPES.contains(&canonical_mime(mime_type).as_str()) {
        Ok(())
    } else {
        Err(EncodingError::InvalidType(mime_type.to_string()))
    }
}

fn ensure_size(size: u64) -> Result<(), EncodingError> {
    if size > MAX_IMAGE_BYTES {
        return Err(EncodingError::TooLarge {
            size,
            limit: MAX_IMAGE_BYTES,
        });
    }
    Ok(())
}

/// Base64 body of the image, without any `data:` prefix.
pub fn encode_image(payload: &ImagePayload, policy: MimePolicy) -> Result<String, EncodingError> {
    if payload.data.is_empty() {
        return Err(EncodingError::Empty);
    }
    ensure_size(payload.size())?;
    ensure_accepted(&payload.mime_type, policy)?;

    let encoded = general_purpose::STANDARD.encode(&payload.data);
    log::debug!(
        "📊 Image size: {} bytes, base64 size: {} bytes",
        payload.size(),
        encoded.len()
    );
    Ok(encoded)
}

/// Reads an image file, checking its size before pulling it into memory.
pub async fn read_image(path: impl AsRef<Path>) -> Result<ImagePayload, EncodingError> {
    let path = path.as_ref();
    let metadata = tokio::fs::metadata(path).await?;
    ensure_size(metadata.len())?;

    let data = tokio::fs::read(path).await?;
    Ok(ImagePayload::new(data, mime_from_extension(path)))
}

pub fn mime_from_extension(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    match ext.as_deref() {
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        _ => "image/jpeg",
    }
}

/// `data:image/png;base64,AAAA` -> `AAAA`. Plain base64 passes through.
pub fn strip_data_uri(image: &str) -> &str {
    let trimmed = image.trim();
    if trimmed.starts_with("data:") {
        if let Some(idx) = trimmed.find(";base64,") {
            return &trimmed[idx + ";base64,".len()..];
        }
        if let Some(idx) = trimmed.find(',') {
            return &trimmed[idx + 1..];
        }
    }
    trimmed
}

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

use crate::error::TryOnError;

pub const DOWNLOAD_PREFIX: &str = "efashion-ai-";
const FALLBACK_MEDIA_TYPE: &str = "image/png";

/// An image the user picked for one of the request slots.
///
/// The bytes are held as a `data:` URI so the same value can be previewed and
/// sent to the backend without reading the file again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedImage {
    data_uri: String,
    media_type: String,
    source: Option<PathBuf>,
}

impl UploadedImage {
    pub fn data_uri(&self) -> &str {
        &self.data_uri
    }

    pub fn media_type(&self) -> &str {
        &self.media_type
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    /// Base64 payload without the `data:...;base64,` prefix.
    pub fn payload(&self) -> &str {
        strip_data_uri_prefix(&self.data_uri)
    }
}

/// Reads a file from disk and accepts it when its media type is an image type.
pub fn accept_file(path: &Path) -> Result<UploadedImage, TryOnError> {
    let bytes = fs::read(path)
        .with_context(|| format!("failed reading {}", path.display()))
        .map_err(TryOnError::from)?;
    let mut image = accept_bytes(&bytes, media_type_for_path(path))?;
    image.source = Some(path.to_path_buf());
    Ok(image)
}

/// Accepts raw bytes. A declared media type wins over sniffing the bytes.
pub fn accept_bytes(bytes: &[u8], declared: Option<&str>) -> Result<UploadedImage, TryOnError> {
    let media_type = declared
        .map(|value| value.trim().to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .or_else(|| sniff_media_type(bytes).map(str::to_string))
        .unwrap_or_default();
    if !media_type.starts_with("image/") {
        return Err(TryOnError::NotAnImage {
            media_type: if media_type.is_empty() {
                "unknown".to_string()
            } else {
                media_type
            },
        });
    }

    Ok(UploadedImage {
        data_uri: encode_data_uri(&media_type, bytes),
        media_type,
        source: None,
    })
}

pub fn encode_data_uri(media_type: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", media_type, BASE64.encode(bytes))
}

/// Text after the first comma, or the whole string when there is no comma.
pub fn strip_data_uri_prefix(value: &str) -> &str {
    value.split_once(',').map_or(value, |(_, payload)| payload)
}

pub fn decode_data_uri(value: &str) -> anyhow::Result<(String, Vec<u8>)> {
    let media_type = value
        .strip_prefix("data:")
        .and_then(|rest| rest.split_once(';'))
        .map(|(media, _)| media.to_string())
        .filter(|media| !media.is_empty())
        .unwrap_or_else(|| FALLBACK_MEDIA_TYPE.to_string());
    let bytes = BASE64
        .decode(strip_data_uri_prefix(value).as_bytes())
        .context("data URI base64 decode failed")?;
    Ok((media_type, bytes))
}

/// A candidate image produced by one successful generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImage {
    pub id: String,
    pub data_uri: String,
}

impl GeneratedImage {
    pub fn new(media_type: Option<&str>, base64_payload: &str) -> Self {
        let media_type = media_type
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(FALLBACK_MEDIA_TYPE);
        Self {
            id: format!("gen_{}", uuid::Uuid::new_v4().simple()),
            data_uri: format!("data:{media_type};base64,{base64_payload}"),
        }
    }

    /// File name used when the image is downloaded, always `.png`.
    pub fn download_file_name(&self) -> String {
        format!("{DOWNLOAD_PREFIX}{}.png", self.id)
    }

    pub fn save_into(&self, dir: &Path) -> anyhow::Result<PathBuf> {
        let (_, bytes) = decode_data_uri(&self.data_uri)?;
        fs::create_dir_all(dir)?;
        let path = dir.join(self.download_file_name());
        fs::write(&path, bytes).with_context(|| format!("failed to write {}", path.display()))?;
        Ok(path)
    }
}

pub fn media_type_for_path(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        "webp" => Some("image/webp"),
        "gif" => Some("image/gif"),
        "bmp" => Some("image/bmp"),
        "heic" => Some("image/heic"),
        "heif" => Some("image/heif"),
        "avif" => Some("image/avif"),
        "tif" | "tiff" => Some("image/tiff"),
        "txt" => Some("text/plain"),
        "json" => Some("application/json"),
        "pdf" => Some("application/pdf"),
        _ => None,
    }
}

fn sniff_media_type(bytes: &[u8]) -> Option<&'static str> {
    let format = image::guess_format(bytes).ok()?;
    Some(format.to_mime_type())
}

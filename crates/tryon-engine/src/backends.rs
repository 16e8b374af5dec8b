use std::io::Cursor;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tryon_contracts::GenerationRequest;

use crate::config::EngineConfig;
use crate::{GenerationBackend, InlineImage};

pub struct GeminiBackend {
    api_base: String,
    http: HttpClient,
}

impl GeminiBackend {
    pub fn new(config: &EngineConfig) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build Gemini HTTP client")?;
        Ok(Self {
            api_base: config.api_base.clone(),
            http,
        })
    }

    fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    /// First inline image of the first candidate. Later parts and candidates
    /// are ignored.
    fn extract_first_image(response_payload: &Value) -> Option<InlineImage> {
        let parts = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
            .and_then(|candidate| candidate.get("content"))
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)?;

        parts.iter().find_map(|part| {
            let inline = part
                .get("inlineData")
                .or_else(|| part.get("inline_data"))
                .and_then(Value::as_object)?;
            let data = inline
                .get("data")
                .and_then(Value::as_str)
                .filter(|data| !data.is_empty())?;
            let mime_type = inline
                .get("mimeType")
                .or_else(|| inline.get("mime_type"))
                .and_then(Value::as_str)
                .map(str::to_string);
            Some(InlineImage {
                mime_type,
                data: data.to_string(),
            })
        })
    }
}

impl GenerationBackend for GeminiBackend {
    fn name(&self) -> &str {
        "gemini"
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        credential: &str,
        _slot: usize,
    ) -> Result<Option<InlineImage>> {
        let endpoint = self.endpoint_for_model(&request.model);
        let response = self
            .http
            .post(&endpoint)
            .query(&[("key", credential)])
            .json(&request.to_payload())
            .send()
            .with_context(|| format!("Gemini request failed ({endpoint})"))?;
        let payload = response_json_or_error("Gemini", response)?;
        Ok(Self::extract_first_image(&payload))
    }
}

/// Offline backend: a flat 9:16 PNG tinted from the instruction and slot.
pub struct DryrunBackend;

impl DryrunBackend {
    const WIDTH: u32 = 288;
    const HEIGHT: u32 = 512;

    fn render(request: &GenerationRequest, slot: usize) -> Result<Vec<u8>> {
        let (r, g, b) = color_from_prompt(request.instruction(), slot as u64);
        let mut image = RgbImage::new(Self::WIDTH, Self::HEIGHT);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgb8(image)
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .context("dryrun PNG encode failed")?;
        Ok(bytes)
    }
}

impl GenerationBackend for DryrunBackend {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn generate(
        &self,
        request: &GenerationRequest,
        _credential: &str,
        slot: usize,
    ) -> Result<Option<InlineImage>> {
        let bytes = Self::render(request, slot)?;
        Ok(Some(InlineImage {
            mime_type: Some("image/png".to_string()),
            data: BASE64.encode(bytes),
        }))
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}

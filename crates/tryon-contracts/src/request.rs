//! Builds the multi-image, text-guided request sent to the image model.
//!
//! Part order is fixed: garment, model, optional scene, then exactly one
//! instruction text part. The instruction refers to the images by ordinal, so
//! changing the order without changing the text breaks the prompt.

use serde_json::{json, Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{ImageRole, TryOnError};
use crate::images::UploadedImage;
use crate::models::ModelRegistry;
use crate::settings::{GenerationSettings, QualityTier, Resolution};

pub const OUTPUT_ASPECT_RATIO: &str = "9:16";
pub const SAMPLING_TEMPERATURE: f64 = 0.4;

#[derive(Debug, Clone, PartialEq)]
pub enum ContentPart {
    InlineImage { mime_type: String, data: String },
    Text(String),
}

impl ContentPart {
    fn from_upload(image: &UploadedImage) -> Self {
        Self::InlineImage {
            mime_type: image.media_type().to_string(),
            data: image.payload().to_string(),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            Self::InlineImage { mime_type, data } => json!({
                "inlineData": {
                    "mimeType": mime_type,
                    "data": data,
                }
            }),
            Self::Text(text) => json!({ "text": text }),
        }
    }
}

/// Tier-specific part of the generation config. Only `Pro` carries a size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierConfig {
    Fast,
    Pro { image_size: Resolution },
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    pub temperature: f64,
    pub aspect_ratio: &'static str,
    pub tier: TierConfig,
}

impl GenerationConfig {
    pub fn for_tier(quality: QualityTier, resolution: Resolution) -> Self {
        let tier = match quality {
            QualityTier::Fast => TierConfig::Fast,
            QualityTier::Pro => TierConfig::Pro {
                image_size: resolution,
            },
        };
        Self {
            temperature: SAMPLING_TEMPERATURE,
            aspect_ratio: OUTPUT_ASPECT_RATIO,
            tier,
        }
    }

    pub fn image_size(&self) -> Option<Resolution> {
        match self.tier {
            TierConfig::Fast => None,
            TierConfig::Pro { image_size } => Some(image_size),
        }
    }

    pub fn to_json(&self) -> Value {
        let mut image_config = Map::new();
        image_config.insert(
            "aspectRatio".to_string(),
            Value::String(self.aspect_ratio.to_string()),
        );
        if let TierConfig::Pro { image_size } = self.tier {
            image_config.insert(
                "imageSize".to_string(),
                Value::String(image_size.as_str().to_string()),
            );
        }

        let mut config = Map::new();
        config.insert("temperature".to_string(), json!(self.temperature));
        config.insert("imageConfig".to_string(), Value::Object(image_config));
        Value::Object(config)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub parts: Vec<ContentPart>,
    pub config: GenerationConfig,
}

impl GenerationRequest {
    pub fn instruction(&self) -> &str {
        self.parts
            .iter()
            .rev()
            .find_map(|part| match part {
                ContentPart::Text(text) => Some(text.as_str()),
                ContentPart::InlineImage { .. } => None,
            })
            .unwrap_or_default()
    }

    pub fn image_count(&self) -> usize {
        self.parts
            .iter()
            .filter(|part| matches!(part, ContentPart::InlineImage { .. }))
            .count()
    }

    /// `generateContent` request body.
    pub fn to_payload(&self) -> Value {
        json!({
            "contents": [{
                "role": "user",
                "parts": self.parts.iter().map(ContentPart::to_json).collect::<Vec<Value>>(),
            }],
            "generationConfig": self.config.to_json(),
        })
    }

    /// Payload with image bytes replaced, for logs, receipts and previews.
    pub fn sanitized_payload(&self) -> Value {
        let mut payload = crate::runs::receipts::sanitize_payload(&self.to_payload());
        if let Value::Object(map) = &mut payload {
            map.insert("model".to_string(), Value::String(self.model.clone()));
        }
        payload
    }

    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(&self.to_payload()).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(self.model.as_bytes());
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }
}

pub fn build_request(
    settings: &GenerationSettings,
    registry: &ModelRegistry,
) -> Result<GenerationRequest, TryOnError> {
    let garment = settings
        .garment
        .as_ref()
        .ok_or(TryOnError::MissingRequiredImage(ImageRole::Garment))?;
    let model_image = settings
        .model
        .as_ref()
        .ok_or(TryOnError::MissingRequiredImage(ImageRole::Model))?;
    let scene = settings.scene.as_ref();

    let mut parts = vec![
        ContentPart::from_upload(garment),
        ContentPart::from_upload(model_image),
    ];
    if let Some(scene) = scene {
        parts.push(ContentPart::from_upload(scene));
    }
    parts.push(ContentPart::Text(instruction_text(
        scene.is_some(),
        &settings.instruction,
    )));

    Ok(GenerationRequest {
        model: registry.select(settings.quality).name.clone(),
        parts,
        config: GenerationConfig::for_tier(settings.quality, settings.resolution),
    })
}

pub fn instruction_text(has_scene: bool, extra: &str) -> String {
    let mut text = String::from("STRICT VIRTUAL TRY-ON TASK. \n");
    text.push_str("REFERENCE IDENTIFICATION:\n");
    text.push_str("- IMAGE 1 is the CLOTHING/GARMENT (The Product).\n");
    text.push_str("- IMAGE 2 is the MODEL (The Person).\n");
    if has_scene {
        text.push_str("- IMAGE 3 is the BACKGROUND SCENE.\n");
    }

    text.push_str("\nINSTRUCTIONS:\n");
    text.push_str("1. DRESS THE MODEL: Take the clothing explicitly shown in IMAGE 1 and put it on the person shown in IMAGE 2.\n");
    text.push_str("2. REPLACE OLD CLOTHES: Completely replace whatever the model in IMAGE 2 is currently wearing. The final image must show the model wearing the IMAGE 1 garment.\n");
    text.push_str("3. PRESERVE IDENTITY: You MUST keep the face, hair, head shape, and body pose of the model in IMAGE 2 EXACTLY the same. Do not generate a new person. It must look like the same person.\n");
    if has_scene {
        text.push_str("4. BACKGROUND: Place this newly dressed model into the environment of IMAGE 3. Adjust lighting on the model to match IMAGE 3.\n");
    } else {
        text.push_str("4. BACKGROUND: Keep the background simple and commercial (studio grey or white) unless specified otherwise.\n");
    }

    text.push_str("\nCONSTRAINTS:\n");
    text.push_str("- High fidelity texture for the clothing (from Image 1).\n");
    text.push_str("- Photorealistic skin texture for the model (from Image 2).\n");
    text.push_str(&format!("- Aspect Ratio: {OUTPUT_ASPECT_RATIO}.\n"));

    if !extra.is_empty() {
        text.push_str("\nADDITIONAL REQUIREMENTS: ");
        text.push_str(extra);
    }
    text
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::images::accept_bytes;
    use crate::models::{FAST_IMAGE_MODEL, PRO_IMAGE_MODEL};
    use crate::settings::ImageCount;

    fn upload(mime: &str, bytes: &[u8]) -> UploadedImage {
        accept_bytes(bytes, Some(mime)).unwrap()
    }

    fn settings_with(scene: bool) -> GenerationSettings {
        GenerationSettings {
            credential: Some("key".to_string()),
            garment: Some(upload("image/png", b"garment")),
            model: Some(upload("image/jpeg", b"person")),
            scene: scene.then(|| upload("image/webp", b"scene")),
            instruction: String::new(),
            count: ImageCount::default(),
            quality: QualityTier::Fast,
            resolution: Resolution::OneK,
        }
    }

    #[test]
    fn missing_images_are_reported_by_role() {
        let registry = ModelRegistry::default();
        let mut settings = settings_with(false);
        settings.model = None;
        let err = build_request(&settings, &registry).unwrap_err();
        assert!(matches!(
            err,
            TryOnError::MissingRequiredImage(ImageRole::Model)
        ));

        settings.garment = None;
        let err = build_request(&settings, &registry).unwrap_err();
        assert!(matches!(
            err,
            TryOnError::MissingRequiredImage(ImageRole::Garment)
        ));
    }

    #[test]
    fn parts_follow_garment_model_scene_text_order() {
        let request = build_request(&settings_with(true), &ModelRegistry::default()).unwrap();
        assert_eq!(request.parts.len(), 4);
        let mimes: Vec<&str> = request
            .parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::InlineImage { mime_type, .. } => Some(mime_type.as_str()),
                ContentPart::Text(_) => None,
            })
            .collect();
        assert_eq!(mimes, vec!["image/png", "image/jpeg", "image/webp"]);
        assert!(matches!(request.parts.last(), Some(ContentPart::Text(_))));
        assert_eq!(
            request.parts[0],
            ContentPart::InlineImage {
                mime_type: "image/png".to_string(),
                data: "Z2FybWVudA==".to_string(),
            }
        );
    }

    #[test]
    fn scene_branch_mentions_three_images_and_lighting() {
        let request = build_request(&settings_with(true), &ModelRegistry::default()).unwrap();
        let text = request.instruction();
        assert_eq!(request.image_count(), 3);
        assert!(text.contains("IMAGE 3 is the BACKGROUND SCENE"));
        assert!(text.contains("Adjust lighting on the model to match IMAGE 3"));
        assert!(!text.contains("studio grey or white"));
    }

    #[test]
    fn no_scene_branch_uses_neutral_studio_background() {
        let request = build_request(&settings_with(false), &ModelRegistry::default()).unwrap();
        let text = request.instruction();
        assert_eq!(request.image_count(), 2);
        assert!(!text.contains("IMAGE 3"));
        assert!(text.contains("studio grey or white"));
    }

    #[test]
    fn instruction_blocks_appear_in_fixed_order() {
        let text = instruction_text(false, "street style, natural light");
        let header = text.find("STRICT VIRTUAL TRY-ON TASK.").unwrap();
        let reference = text.find("REFERENCE IDENTIFICATION:").unwrap();
        let instructions = text.find("INSTRUCTIONS:\n1.").unwrap();
        let constraints = text.find("CONSTRAINTS:").unwrap();
        let extra = text.find("ADDITIONAL REQUIREMENTS: street style").unwrap();
        assert!(header < reference && reference < instructions);
        assert!(instructions < constraints && constraints < extra);
        assert!(text.contains("- Aspect Ratio: 9:16."));
        for step in ["1. DRESS", "2. REPLACE", "3. PRESERVE", "4. BACKGROUND"] {
            assert!(text.contains(step), "missing {step}");
        }
        assert!(!text.contains("5."));
    }

    #[test]
    fn empty_free_text_adds_no_requirements_block() {
        assert!(!instruction_text(true, "").contains("ADDITIONAL REQUIREMENTS"));
    }

    #[test]
    fn fast_tier_omits_image_size_regardless_of_resolution() {
        let mut settings = settings_with(false);
        settings.resolution = Resolution::FourK;
        let request = build_request(&settings, &ModelRegistry::default()).unwrap();
        assert_eq!(request.model, FAST_IMAGE_MODEL);
        assert_eq!(request.config.image_size(), None);
        assert_eq!(
            request.config.to_json(),
            json!({ "temperature": 0.4, "imageConfig": { "aspectRatio": "9:16" } })
        );
    }

    #[test]
    fn pro_tier_carries_the_requested_image_size() {
        let mut settings = settings_with(false);
        settings.quality = QualityTier::Pro;
        settings.resolution = Resolution::FourK;
        let request = build_request(&settings, &ModelRegistry::default()).unwrap();
        assert_eq!(request.model, PRO_IMAGE_MODEL);
        assert_eq!(request.config.image_size(), Some(Resolution::FourK));
        assert_eq!(
            request.config.to_json()["imageConfig"]["imageSize"],
            json!("4K")
        );
    }

    #[test]
    fn sanitized_payload_hides_image_bytes() {
        let request = build_request(&settings_with(false), &ModelRegistry::default()).unwrap();
        let sanitized = request.sanitized_payload();
        assert_eq!(sanitized["model"], json!(FAST_IMAGE_MODEL));
        assert_eq!(
            sanitized["contents"][0]["parts"][0]["inlineData"]["data"],
            json!("<omitted>")
        );
        assert_eq!(
            sanitized["contents"][0]["parts"][0]["inlineData"]["mimeType"],
            json!("image/png")
        );
        assert_eq!(request.fingerprint().len(), 64);
    }
}

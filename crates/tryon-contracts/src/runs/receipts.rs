use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::images::GeneratedImage;
use crate::request::GenerationRequest;

pub const RECEIPT_SCHEMA_VERSION: u64 = 1;

/// Path of the receipt stored next to a saved artifact.
pub fn receipt_path_for(image_path: &Path) -> PathBuf {
    let stem = image_path
        .file_stem()
        .and_then(|value| value.to_str())
        .unwrap_or("artifact");
    image_path.with_file_name(format!("receipt-{stem}.json"))
}

pub fn build_receipt(
    request: &GenerationRequest,
    image: &GeneratedImage,
    index: usize,
    image_path: &Path,
    receipt_path: &Path,
    result_metadata: &Map<String, Value>,
) -> Value {
    let mut root = Map::new();
    root.insert(
        "schema_version".to_string(),
        Value::Number(RECEIPT_SCHEMA_VERSION.into()),
    );
    root.insert("request".to_string(), request.sanitized_payload());
    root.insert(
        "fingerprint".to_string(),
        Value::String(request.fingerprint()),
    );
    root.insert("image_id".to_string(), Value::String(image.id.clone()));
    root.insert(
        "result_index".to_string(),
        Value::Number((index as u64).into()),
    );

    let mut artifacts = Map::new();
    artifacts.insert(
        "image_path".to_string(),
        Value::String(image_path.to_string_lossy().to_string()),
    );
    artifacts.insert(
        "receipt_path".to_string(),
        Value::String(receipt_path.to_string_lossy().to_string()),
    );
    root.insert("artifacts".to_string(), Value::Object(artifacts));
    root.insert(
        "result_metadata".to_string(),
        sanitize_payload(&Value::Object(result_metadata.clone())),
    );
    Value::Object(root)
}

pub fn write_receipt(path: &Path, payload: &Value) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(payload)?)?;
    Ok(())
}

/// Replaces inline image bytes and data URIs with `<omitted>`.
pub fn sanitize_payload(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::String(text) if text.starts_with("data:") => Value::String("<omitted>".to_string()),
        Value::Bool(_) | Value::Number(_) | Value::String(_) => value.clone(),
        Value::Array(rows) => Value::Array(rows.iter().map(sanitize_payload).collect()),
        Value::Object(map) => {
            let mut out = Map::new();
            for (key, row) in map {
                let lowered = key.to_ascii_lowercase();
                if matches!(
                    lowered.as_str(),
                    "b64_json" | "image" | "image_bytes" | "data" | "data_uri"
                ) {
                    out.insert(key.clone(), Value::String("<omitted>".to_string()));
                    continue;
                }
                out.insert(key.clone(), sanitize_payload(row));
            }
            Value::Object(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use serde_json::{json, Map, Value};

    use super::{build_receipt, receipt_path_for, sanitize_payload, write_receipt};
    use super::RECEIPT_SCHEMA_VERSION;
    use crate::images::{accept_bytes, GeneratedImage};
    use crate::models::ModelRegistry;
    use crate::request::build_request;
    use crate::settings::GenerationSettings;

    #[test]
    fn receipt_builder_writes_expected_shape() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let mut settings = GenerationSettings::new();
        settings.garment = Some(accept_bytes(b"garment", Some("image/png"))?);
        settings.model = Some(accept_bytes(b"person", Some("image/png"))?);
        settings.instruction = "soft light".to_string();
        let request = build_request(&settings, &ModelRegistry::default())?;

        let image = GeneratedImage::new(Some("image/png"), "QUJD");
        let image_path = temp.path().join(image.download_file_name());
        let receipt_path = receipt_path_for(&image_path);
        let mut metadata = Map::new();
        metadata.insert("backend".to_string(), json!("dryrun"));
        metadata.insert("data_uri".to_string(), json!(image.data_uri.clone()));

        let payload = build_receipt(&request, &image, 1, &image_path, &receipt_path, &metadata);
        write_receipt(&receipt_path, &payload)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(&receipt_path)?)?;
        assert_eq!(parsed["schema_version"], json!(RECEIPT_SCHEMA_VERSION));
        assert_eq!(parsed["image_id"], json!(image.id));
        assert_eq!(parsed["result_index"], json!(1));
        assert_eq!(
            parsed["request"]["contents"][0]["parts"][1]["inlineData"]["data"],
            json!("<omitted>")
        );
        assert_eq!(parsed["result_metadata"]["backend"], json!("dryrun"));
        assert_eq!(parsed["result_metadata"]["data_uri"], json!("<omitted>"));
        assert_eq!(
            parsed["artifacts"]["image_path"],
            json!(image_path.to_string_lossy())
        );
        Ok(())
    }

    #[test]
    fn receipt_path_sits_next_to_the_image() {
        let path = receipt_path_for(Path::new("/tmp/out/efashion-ai-gen_1.png"));
        assert_eq!(path, Path::new("/tmp/out/receipt-efashion-ai-gen_1.json"));
    }

    #[test]
    fn sanitize_drops_inline_data_uris_in_arrays() {
        let value = json!({ "urls": ["data:image/png;base64,QUJD", "https://example.com"] });
        let sanitized = sanitize_payload(&value);
        assert_eq!(sanitized["urls"][0], json!("<omitted>"));
        assert_eq!(sanitized["urls"][1], json!("https://example.com"));
    }
}

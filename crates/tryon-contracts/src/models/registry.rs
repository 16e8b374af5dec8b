use indexmap::IndexMap;

use crate::settings::QualityTier;

pub const FAST_IMAGE_MODEL: &str = "gemini-2.5-flash-image";
pub const PRO_IMAGE_MODEL: &str = "gemini-3-pro-image-preview";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub tier: QualityTier,
    pub supports_image_size: bool,
}

/// Maps each quality tier to the model that serves it.
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<QualityTier, ModelSpec>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<QualityTier, ModelSpec>>) -> Self {
        let mut merged = default_models();
        if let Some(models) = models {
            merged.extend(models);
        }
        Self { models: merged }
    }

    /// Swaps the model name for a tier, keeping the rest of its spec.
    pub fn with_model(mut self, tier: QualityTier, name: impl Into<String>) -> Self {
        let name = name.into();
        let name = name.trim();
        if name.is_empty() {
            return self;
        }
        if let Some(spec) = self.models.get_mut(&tier) {
            spec.name = name.to_string();
        }
        self
    }

    pub fn select(&self, tier: QualityTier) -> &ModelSpec {
        // default_models() seeds every tier and overrides only replace entries.
        &self.models[&tier]
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }
}

fn default_models() -> IndexMap<QualityTier, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert = |tier: QualityTier, name: &str, supports_image_size: bool| {
        map.insert(
            tier,
            ModelSpec {
                name: name.to_string(),
                provider: "gemini".to_string(),
                tier,
                supports_image_size,
            },
        );
    };

    insert(QualityTier::Fast, FAST_IMAGE_MODEL, false);
    insert(QualityTier::Pro, PRO_IMAGE_MODEL, true);

    map
}

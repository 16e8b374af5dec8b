use std::fmt;
use std::path::Path;
use std::str::FromStr;

use crate::error::{ImageRole, TryOnError};
use crate::images::{accept_file, UploadedImage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum QualityTier {
    #[default]
    Fast,
    Pro,
}

impl QualityTier {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Pro => "pro",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QualityTier {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "pro" => Ok(Self::Pro),
            other => Err(format!("unknown quality tier '{other}' (expected fast or pro)")),
        }
    }
}

/// Output size requested from the pro model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Resolution {
    #[default]
    OneK,
    TwoK,
    FourK,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::OneK => "1K",
            Self::TwoK => "2K",
            Self::FourK => "4K",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Resolution {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "1K" => Ok(Self::OneK),
            "2K" => Ok(Self::TwoK),
            "4K" => Ok(Self::FourK),
            other => Err(format!("unknown resolution '{other}' (expected 1K, 2K or 4K)")),
        }
    }
}

/// Number of parallel generation calls, always within 1..=4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageCount(u8);

impl ImageCount {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 4;

    pub fn new(value: u8) -> Result<Self, TryOnError> {
        if !(Self::MIN..=Self::MAX).contains(&value) {
            return Err(TryOnError::InvalidImageCount(value));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> usize {
        self.0 as usize
    }
}

impl Default for ImageCount {
    fn default() -> Self {
        Self(1)
    }
}

/// Everything the user entered before pressing generate.
#[derive(Debug, Clone, Default)]
pub struct GenerationSettings {
    pub credential: Option<String>,
    pub garment: Option<UploadedImage>,
    pub model: Option<UploadedImage>,
    pub scene: Option<UploadedImage>,
    pub instruction: String,
    pub count: ImageCount,
    pub quality: QualityTier,
    /// Only read when `quality` is `Pro`.
    pub resolution: Resolution,
}

impl GenerationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn image(&self, role: ImageRole) -> Option<&UploadedImage> {
        match role {
            ImageRole::Garment => self.garment.as_ref(),
            ImageRole::Model => self.model.as_ref(),
            ImageRole::Scene => self.scene.as_ref(),
        }
    }

    pub fn set_image(&mut self, role: ImageRole, image: Option<UploadedImage>) {
        let slot = match role {
            ImageRole::Garment => &mut self.garment,
            ImageRole::Model => &mut self.model,
            ImageRole::Scene => &mut self.scene,
        };
        *slot = image;
    }

    /// Loads a file into a slot. The slot keeps its previous value on failure.
    pub fn load(&mut self, role: ImageRole, path: &Path) -> Result<(), TryOnError> {
        let image = accept_file(path)?;
        self.set_image(role, Some(image));
        Ok(())
    }

    pub fn clear(&mut self, role: ImageRole) {
        self.set_image(role, None);
    }

    /// First required slot that is still empty.
    pub fn missing_required_image(&self) -> Option<ImageRole> {
        [ImageRole::Garment, ImageRole::Model]
            .into_iter()
            .find(|role| self.image(*role).is_none())
    }
}

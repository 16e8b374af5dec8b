use std::fmt;

use thiserror::Error;

/// Slot an uploaded image occupies in a try-on request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageRole {
    Garment,
    Model,
    Scene,
}

impl ImageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Garment => "garment",
            Self::Model => "model",
            Self::Scene => "scene",
        }
    }

    pub fn missing_message(self) -> &'static str {
        match self {
            Self::Garment => "upload the garment/product image first",
            Self::Model => "upload the model image first",
            Self::Scene => "upload the scene image first",
        }
    }
}

impl fmt::Display for ImageRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TryOnError {
    #[error("not an image (detected media type: {media_type})")]
    NotAnImage { media_type: String },

    #[error("{}", .0.missing_message())]
    MissingRequiredImage(ImageRole),

    #[error("no API key provided and none configured in the environment")]
    MissingCredential,

    #[error("image count must be between 1 and 4, got {0}")]
    InvalidImageCount(u8),

    #[error("generation failed: no usable image was returned")]
    AllCallsFailed,

    #[error("{0}")]
    Unexpected(String),
}

impl TryOnError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Errors the user can fix by changing inputs before retrying.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::NotAnImage { .. }
                | Self::MissingRequiredImage(_)
                | Self::MissingCredential
                | Self::InvalidImageCount(_)
        )
    }
}

impl From<anyhow::Error> for TryOnError {
    fn from(value: anyhow::Error) -> Self {
        Self::Unexpected(format!("{value:#}"))
    }
}

#[cfg(test)]
mod tests {
    use super::{ImageRole, TryOnError};

    #[test]
    fn missing_image_messages_name_the_slot() {
        let garment = TryOnError::MissingRequiredImage(ImageRole::Garment).to_string();
        let model = TryOnError::MissingRequiredImage(ImageRole::Model).to_string();
        assert!(garment.contains("garment"));
        assert!(model.contains("model"));
        assert_ne!(garment, model);
    }

    #[test]
    fn validation_errors_are_separated_from_runtime_failures() {
        assert!(TryOnError::MissingCredential.is_validation());
        assert!(TryOnError::InvalidImageCount(9).is_validation());
        assert!(!TryOnError::AllCallsFailed.is_validation());
        assert!(!TryOnError::unexpected("boom").is_validation());
    }

    #[test]
    fn anyhow_errors_keep_their_context_chain() {
        let err = anyhow::anyhow!("socket closed").context("request failed");
        let converted = TryOnError::from(err);
        assert_eq!(converted.to_string(), "request failed: socket closed");
    }
}

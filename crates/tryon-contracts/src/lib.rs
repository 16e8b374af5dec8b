//! Data contracts for the virtual try-on pipeline: image intake, request
//! construction, session state and the run log. Nothing in here touches the
//! network.

pub mod error;
pub mod events;
pub mod images;
pub mod models;
pub mod request;
pub mod runs;
pub mod session;
pub mod settings;

pub use error::{ImageRole, TryOnError};
pub use images::{GeneratedImage, UploadedImage};
pub use request::{build_request, ContentPart, GenerationConfig, GenerationRequest, TierConfig};
pub use session::{AppStatus, Session, SessionEvent};
pub use settings::{GenerationSettings, ImageCount, QualityTier, Resolution};

mod registry;

pub use registry::{ModelRegistry, ModelSpec, FAST_IMAGE_MODEL, PRO_IMAGE_MODEL};

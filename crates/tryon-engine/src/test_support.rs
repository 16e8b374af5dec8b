use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Result};
use tryon_contracts::images::accept_bytes;
use tryon_contracts::models::ModelRegistry;
use tryon_contracts::{build_request, GenerationRequest, GenerationSettings};

use crate::{GenerationBackend, InlineImage};

/// Scripted outcome for one slot. Delays are in milliseconds.
#[derive(Debug, Clone)]
pub enum Step {
    Image(&'static str, u64),
    Empty(u64),
    Fail(u64),
    Panic,
}

pub struct ScriptedBackend {
    steps: Vec<Step>,
    pub calls: AtomicUsize,
    seen: Mutex<Vec<String>>,
}

impl ScriptedBackend {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            calls: AtomicUsize::new(0),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn credentials(&self) -> Vec<String> {
        self.seen.lock().map(|seen| seen.clone()).unwrap_or_default()
    }
}

impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    fn generate(
        &self,
        _request: &GenerationRequest,
        credential: &str,
        slot: usize,
    ) -> Result<Option<InlineImage>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(credential.to_string());
        }
        match self.steps.get(slot).cloned() {
            Some(Step::Image(data, delay)) => {
                thread::sleep(Duration::from_millis(delay));
                Ok(Some(InlineImage {
                    mime_type: Some("image/png".to_string()),
                    data: data.to_string(),
                }))
            }
            Some(Step::Empty(delay)) => {
                thread::sleep(Duration::from_millis(delay));
                Ok(None)
            }
            Some(Step::Fail(delay)) => {
                thread::sleep(Duration::from_millis(delay));
                bail!("scripted failure in slot {slot}")
            }
            Some(Step::Panic) => panic!("scripted panic in slot {slot}"),
            None => bail!("no scripted step for slot {slot}"),
        }
    }
}

pub fn sample_settings() -> GenerationSettings {
    let mut settings = GenerationSettings::new();
    settings.garment = accept_bytes(b"garment-bytes", Some("image/png")).ok();
    settings.model = accept_bytes(b"model-bytes", Some("image/jpeg")).ok();
    settings
}

pub fn sample_request() -> GenerationRequest {
    build_request(&sample_settings(), &ModelRegistry::default())
        .expect("sample settings carry both required images")
}

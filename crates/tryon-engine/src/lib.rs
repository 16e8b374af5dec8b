use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use tryon_contracts::events::{EventKind, EventPayload, EventWriter};
use tryon_contracts::models::ModelRegistry;
use tryon_contracts::runs::receipts::{build_receipt, receipt_path_for, write_receipt};
use tryon_contracts::runs::summary::{write_summary, RunSummary};
use tryon_contracts::{
    build_request, GenerationRequest, GenerationSettings, Session, SessionEvent, TryOnError,
};

mod backends;
mod config;
mod dispatch;
#[cfg(test)]
mod test_support;

pub use backends::{DryrunBackend, GeminiBackend};
pub use config::{EngineConfig, CREDENTIAL_ENV_VARS, DEFAULT_API_BASE};
pub use dispatch::Dispatcher;

/// One image part as returned by a backend, still base64 encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: Option<String>,
    pub data: String,
}

/// A single image-generation call. `Ok(None)` means the backend answered but
/// produced no image.
pub trait GenerationBackend: Send + Sync {
    fn name(&self) -> &str;
    fn generate(
        &self,
        request: &GenerationRequest,
        credential: &str,
        slot: usize,
    ) -> Result<Option<InlineImage>>;
}

#[derive(Default)]
pub struct BackendRegistry {
    backends: BTreeMap<String, Box<dyn GenerationBackend>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<B: GenerationBackend + 'static>(&mut self, backend: B) {
        self.backends
            .insert(backend.name().to_string(), Box::new(backend));
    }

    pub fn get(&self, name: &str) -> Option<&dyn GenerationBackend> {
        self.backends.get(name).map(|backend| backend.as_ref())
    }

    pub fn names(&self) -> Vec<String> {
        self.backends.keys().cloned().collect()
    }
}

pub fn default_backend_registry(config: &EngineConfig) -> Result<BackendRegistry> {
    let mut backends = BackendRegistry::new();
    backends.register(DryrunBackend);
    backends.register(GeminiBackend::new(config)?);
    Ok(backends)
}

/// Drives one try-on session: guards, dispatch, session transitions and the
/// on-disk run log (`events.jsonl`, artifacts, receipts, `summary.json`).
pub struct TryOnEngine {
    run_dir: PathBuf,
    run_id: String,
    events: EventWriter,
    summary_path: PathBuf,
    started_at: String,
    config: EngineConfig,
    models: ModelRegistry,
    backends: BackendRegistry,
    backend_name: String,
    session: Session,
    last_request: Option<GenerationRequest>,
    requested: u64,
    saved: Vec<PathBuf>,
}

impl TryOnEngine {
    pub fn new(
        run_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        config: EngineConfig,
        backend_name: &str,
    ) -> Result<Self> {
        let backends = default_backend_registry(&config)?;
        Self::with_backends(run_dir, events_path, config, backends, backend_name)
    }

    pub fn with_backends(
        run_dir: impl Into<PathBuf>,
        events_path: impl Into<PathBuf>,
        config: EngineConfig,
        backends: BackendRegistry,
        backend_name: &str,
    ) -> Result<Self> {
        if backends.get(backend_name).is_none() {
            bail!(
                "unknown backend '{backend_name}' (available: {})",
                backends.names().join(", ")
            );
        }

        let run_dir = run_dir.into();
        std::fs::create_dir_all(&run_dir)?;
        let run_id = run_dir
            .file_name()
            .and_then(|value| value.to_str())
            .filter(|value| !value.is_empty())
            .unwrap_or("run-rs")
            .to_string();
        let events = EventWriter::new(events_path.into(), run_id.clone());
        let summary_path = run_dir.join("summary.json");
        let started_at = now_utc_iso();

        events.emit(
            EventKind::RunStarted,
            map_object(json!({
                "out_dir": run_dir.to_string_lossy().to_string(),
                "backend": backend_name,
                "api_base": config.api_base,
            })),
        )?;

        Ok(Self {
            run_dir,
            run_id,
            events,
            summary_path,
            started_at,
            config,
            models: ModelRegistry::default(),
            backends,
            backend_name: backend_name.to_string(),
            session: Session::new(),
            last_request: None,
            requested: 0,
            saved: Vec::new(),
        })
    }

    pub fn set_model_registry(&mut self, models: ModelRegistry) {
        self.models = models;
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn event_writer(&self) -> EventWriter {
        self.events.clone()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Runs one generation attempt.
    ///
    /// A missing garment or model image, or an unresolvable credential, is
    /// refused before anything is dispatched: the session keeps its status,
    /// records the message and the error is returned. Otherwise the session
    /// moves through `Generating` to `Success` or `Error` and the final
    /// snapshot is returned.
    pub fn generate(&mut self, settings: &GenerationSettings) -> Result<&Session, TryOnError> {
        let (request, credential) = match self.check_ready(settings) {
            Ok(ready) => ready,
            Err(err) => {
                self.apply(SessionEvent::Refused(err.to_string()));
                self.record(
                    EventKind::GenerationRefused,
                    map_object(json!({ "reason": err.to_string() })),
                );
                return Err(err);
            }
        };

        self.apply(SessionEvent::Started);
        self.saved.clear();
        self.requested = settings.count.get() as u64;
        self.record(
            EventKind::GenerationStarted,
            map_object(json!({
                "backend": self.backend_name,
                "model": request.model,
                "count": settings.count.get(),
                "quality": settings.quality.as_str(),
                "image_size": request.config.image_size().map(|size| size.as_str()),
                "has_scene": request.image_count() == 3,
                "fingerprint": request.fingerprint(),
            })),
        );
        tracing::info!(
            model = %request.model,
            count = settings.count.get(),
            "starting try-on generation"
        );

        let outcome = match self.backends.get(&self.backend_name) {
            Some(backend) => Dispatcher::new(backend, &self.config)
                .with_events(self.events.clone())
                .dispatch(&request, settings.count, Some(&credential)),
            None => Err(TryOnError::unexpected(format!(
                "backend '{}' is not registered",
                self.backend_name
            ))),
        };
        match outcome {
            Ok(results) => self.apply(SessionEvent::Completed(results)),
            Err(err) => self.apply(SessionEvent::Failed(err.to_string())),
        }

        self.record(
            EventKind::GenerationFinished,
            map_object(json!({
                "status": self.session.status.as_str(),
                "requested": self.requested,
                "produced": self.session.results.len(),
                "message": self.session.message,
            })),
        );
        self.last_request = Some(request);
        Ok(&self.session)
    }

    /// Writes the current results into the run directory, each with a
    /// receipt next to it.
    pub fn save_results(&mut self) -> Result<Vec<PathBuf>> {
        let Some(request) = &self.last_request else {
            return Ok(Vec::new());
        };
        let mut written = Vec::new();
        for (index, image) in self.session.results.iter().enumerate() {
            let image_path = image.save_into(&self.run_dir)?;
            let receipt_path = receipt_path_for(&image_path);
            let metadata = map_object(json!({
                "backend": self.backend_name,
                "data_uri": image.data_uri,
            }));
            let receipt = build_receipt(
                request,
                image,
                index,
                &image_path,
                &receipt_path,
                &metadata,
            );
            write_receipt(&receipt_path, &receipt)?;
            self.events.emit(
                EventKind::ArtifactSaved,
                map_object(json!({
                    "image_id": image.id,
                    "image_path": image_path.to_string_lossy().to_string(),
                    "receipt_path": receipt_path.to_string_lossy().to_string(),
                })),
            )?;
            written.push(image_path);
        }
        self.saved.extend(written.iter().cloned());
        Ok(written)
    }

    pub fn finish(&mut self) -> Result<PathBuf> {
        let artifacts = self
            .saved
            .iter()
            .filter_map(|path| path.file_name())
            .map(|name| name.to_string_lossy().to_string())
            .collect();
        let summary = RunSummary {
            run_id: self.run_id.clone(),
            started_at: self.started_at.clone(),
            finished_at: now_utc_iso(),
            model: self.last_request.as_ref().map(|request| request.model.clone()),
            requested: self.requested,
            produced: self.session.results.len() as u64,
            status: self.session.status.as_str().to_string(),
            message: self.session.message.clone(),
            artifacts,
        };
        let mut extra = Map::new();
        extra.insert("backend".to_string(), json!(self.backend_name));
        write_summary(&self.summary_path, &summary, Some(&extra))?;
        self.events.emit(
            EventKind::RunFinished,
            map_object(json!({
                "summary_path": self.summary_path.to_string_lossy().to_string()
            })),
        )?;
        Ok(self.summary_path.clone())
    }

    fn check_ready(
        &self,
        settings: &GenerationSettings,
    ) -> Result<(GenerationRequest, String), TryOnError> {
        let request = build_request(settings, &self.models)?;
        let credential = self
            .config
            .resolve_credential(settings.credential.as_deref())?;
        Ok((request, credential))
    }

    /// Event log writes during a generation never change its outcome.
    fn record(&self, kind: EventKind, payload: EventPayload) {
        if let Err(err) = self.events.emit(kind, payload) {
            tracing::warn!(error = %err, "failed to write {kind} event");
        }
    }

    fn apply(&mut self, event: SessionEvent) {
        self.session = std::mem::take(&mut self.session).reduce(event);
    }
}

fn map_object(value: Value) -> EventPayload {
    value.as_object().cloned().unwrap_or_default()
}

fn now_utc_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, false)
}

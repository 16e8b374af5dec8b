use std::thread;

use serde_json::{json, Map, Value};
use tryon_contracts::events::{EventKind, EventWriter};
use tryon_contracts::{GeneratedImage, GenerationRequest, ImageCount, TryOnError};

use crate::config::EngineConfig;
use crate::GenerationBackend;

/// Fans one request out to `count` concurrent backend calls.
///
/// Every call owns exactly one slot of an index-aligned buffer, so the
/// returned images follow call order no matter which call finishes first.
/// Failed, empty and panicked calls leave their slot empty and never affect
/// their siblings.
pub struct Dispatcher<'a> {
    backend: &'a dyn GenerationBackend,
    config: &'a EngineConfig,
    events: Option<EventWriter>,
}

impl<'a> Dispatcher<'a> {
    pub fn new(backend: &'a dyn GenerationBackend, config: &'a EngineConfig) -> Self {
        Self {
            backend,
            config,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventWriter) -> Self {
        self.events = Some(events);
        self
    }

    pub fn dispatch(
        &self,
        request: &GenerationRequest,
        count: ImageCount,
        credential: Option<&str>,
    ) -> Result<Vec<GeneratedImage>, TryOnError> {
        let credential = self.config.resolve_credential(credential)?;
        let credential = credential.as_str();
        tracing::debug!(
            backend = self.backend.name(),
            model = %request.model,
            count = count.get(),
            "dispatching generation calls"
        );

        let slots: Vec<Option<GeneratedImage>> = thread::scope(|scope| {
            let handles = (0..count.get())
                .map(|slot| scope.spawn(move || self.call(request, credential, slot)))
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .enumerate()
                .map(|(slot, handle)| match handle.join() {
                    Ok(image) => image,
                    Err(_) => {
                        tracing::warn!(slot, "generation call panicked");
                        self.record(
                            EventKind::CallFailed,
                            slot,
                            json!({ "reason": "call panicked" }),
                        );
                        None
                    }
                })
                .collect()
        });

        Ok(slots.into_iter().flatten().collect())
    }

    fn call(
        &self,
        request: &GenerationRequest,
        credential: &str,
        slot: usize,
    ) -> Option<GeneratedImage> {
        match self.backend.generate(request, credential, slot) {
            Ok(Some(inline)) => {
                let image = GeneratedImage::new(inline.mime_type.as_deref(), &inline.data);
                self.record(
                    EventKind::CallSucceeded,
                    slot,
                    json!({ "image_id": image.id }),
                );
                Some(image)
            }
            Ok(None) => {
                tracing::warn!(slot, "generation call returned no image");
                self.record(
                    EventKind::CallFailed,
                    slot,
                    json!({ "reason": "no image in response" }),
                );
                None
            }
            Err(err) => {
                let reason = format!("{err:#}");
                tracing::warn!(slot, error = %reason, "generation call failed");
                self.record(EventKind::CallFailed, slot, json!({ "reason": reason }));
                None
            }
        }
    }

    fn record(&self, kind: EventKind, slot: usize, extra: Value) {
        let Some(events) = &self.events else {
            return;
        };
        let mut payload = Map::new();
        payload.insert("backend".to_string(), json!(self.backend.name()));
        payload.insert("slot".to_string(), json!(slot));
        if let Value::Object(extra) = extra {
            payload.extend(extra);
        }
        if let Err(err) = events.emit(kind, payload) {
            tracing::warn!(error = %err, "failed to write {kind} event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use tryon_contracts::images::strip_data_uri_prefix;

    use super::*;
    use crate::test_support::{sample_request, ScriptedBackend, Step};

    fn payloads(images: &[GeneratedImage]) -> Vec<&str> {
        images
            .iter()
            .map(|image| strip_data_uri_prefix(&image.data_uri))
            .collect()
    }

    #[test]
    fn results_follow_call_order_not_completion_order() -> anyhow::Result<()> {
        // Slot 1 fails first, slot 3 succeeds before slot 0.
        let backend = ScriptedBackend::new(vec![
            Step::Image("c2xvdDA=", 120),
            Step::Fail(10),
            Step::Image("c2xvdDI=", 60),
            Step::Image("c2xvdDM=", 0),
        ]);
        let config = EngineConfig::default();
        let request = sample_request();

        let images = Dispatcher::new(&backend, &config).dispatch(
            &request,
            ImageCount::new(4)?,
            Some("key"),
        )?;

        assert_eq!(payloads(&images), vec!["c2xvdDA=", "c2xvdDI=", "c2xvdDM="]);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 4);
        Ok(())
    }

    #[test]
    fn missing_credential_never_reaches_the_backend() {
        let backend = ScriptedBackend::new(vec![Step::Image("QUJD", 0)]);
        let config = EngineConfig::default();
        let request = sample_request();

        let result = Dispatcher::new(&backend, &config).dispatch(
            &request,
            ImageCount::default(),
            Some("  "),
        );

        assert!(matches!(result, Err(TryOnError::MissingCredential)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn every_failure_mode_yields_an_empty_list() -> anyhow::Result<()> {
        let backend = ScriptedBackend::new(vec![Step::Fail(0), Step::Empty(5), Step::Panic]);
        let config = EngineConfig::default().with_env_credential(Some("env-key".to_string()));
        let request = sample_request();

        let images =
            Dispatcher::new(&backend, &config).dispatch(&request, ImageCount::new(3)?, None)?;

        assert!(images.is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
        assert_eq!(backend.credentials(), vec!["env-key"; 3]);
        Ok(())
    }

    #[test]
    fn each_call_is_logged_with_its_slot() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let events = EventWriter::new(temp.path().join("events.jsonl"), "run-test");
        let backend = ScriptedBackend::new(vec![Step::Image("QUJD", 0), Step::Empty(0)]);
        let config = EngineConfig::default();
        let request = sample_request();

        let images = Dispatcher::new(&backend, &config)
            .with_events(events.clone())
            .dispatch(&request, ImageCount::new(2)?, Some("key"))?;
        assert_eq!(images.len(), 1);

        let mut types = events.read_types()?;
        types.sort();
        assert_eq!(
            types,
            vec!["generation_call_failed", "generation_call_succeeded"]
        );
        Ok(())
    }
}

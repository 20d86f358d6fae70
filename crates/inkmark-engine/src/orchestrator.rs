use std::collections::BTreeMap;

use inkmark_contracts::events::{payload as event_payload, EventLog};
use inkmark_contracts::session::{
    Activity, CompositeImage, GeneratedImage, MarkerColor, MaskInstruction, Session, SessionId,
    SessionStore,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cleanup::{ArtifactCleanup, CleanupOutcome, CleanupReport};
use crate::client::GenerationService;
use crate::compositor::{OverlayCompositor, RasterCompositor};
use crate::error::{EngineError, EngineResult};

/// Everything an edit needs, copied out of the session when it is claimed.
struct EditRequest {
    source: GeneratedImage,
    overlay: Option<Vec<u8>>,
    regions: Vec<MaskInstruction>,
    global_instruction: String,
    submitted: Submitted,
}

/// Instruction state exactly as it was when the edit was claimed. Only these
/// values are cleared on success; anything entered while the edit was in
/// flight stays for the next one.
struct Submitted {
    global_instruction: String,
    region_instructions: BTreeMap<MarkerColor, String>,
    overlay: Option<Vec<u8>>,
}

impl Submitted {
    fn clear_from(self, session: &mut Session) {
        if session.global_instruction == self.global_instruction {
            session.global_instruction.clear();
        }
        for (color, text) in self.region_instructions {
            if session.region_instructions.get(&color) == Some(&text) {
                session.region_instructions.remove(&color);
            }
        }
        if session.pending_overlay == self.overlay {
            session.pending_overlay = None;
        }
    }
}

/// Drives generate and edit for any session in the store.
///
/// Each call runs on the caller's thread. A session is claimed (validated and
/// marked busy) in one store mutation, the service is called with the lock
/// released, and the result is written back in a second mutation. Calls on
/// different sessions never wait on each other.
pub struct EditOrchestrator<S, C = RasterCompositor> {
    service: S,
    compositor: C,
    store: SessionStore,
    events: Option<EventLog>,
}

impl<S: GenerationService, C: OverlayCompositor> EditOrchestrator<S, C> {
    pub fn new(service: S, compositor: C, store: SessionStore) -> Self {
        Self {
            service,
            compositor,
            store,
            events: None,
        }
    }

    pub fn with_events(mut self, events: EventLog) -> Self {
        self.events = Some(events);
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn service(&self) -> &S {
        &self.service
    }

    pub fn generate(&self, id: SessionId, prompt: &str) -> EngineResult<GeneratedImage> {
        let prompt = prompt.trim().to_string();
        self.store.try_update(id, |session| {
            if session.is_busy() {
                return Err(EngineError::Busy(id));
            }
            if prompt.is_empty() {
                return Err(EngineError::validation("Enter a prompt to generate an image."));
            }
            session.activity = Some(Activity::Generating);
            Ok(())
        })?;

        info!(session_id = %id, "generating image");
        self.emit(id, "generate_started", json!({ "prompt": prompt }));

        let outcome = self.service.generate(&prompt);
        self.settle(id, "generate", &outcome, |session, image| {
            session.image = Some(image.clone());
            session.base_prompt = prompt.clone();
        });
        if let Ok(image) = &outcome {
            info!(session_id = %id, fingerprint = %image.fingerprint(), "image generated");
            self.emit(
                id,
                "image_generated",
                json!({
                    "fingerprint": image.fingerprint(),
                    "media_type": image.media_type(),
                    "bytes": image.payload().len(),
                }),
            );
        }
        outcome
    }

    pub fn edit(&self, id: SessionId) -> EngineResult<CleanupReport> {
        let request = self.store.try_update(id, |session| {
            if session.is_busy() {
                return Err(EngineError::Busy(id));
            }
            let Some(source) = session.image.clone() else {
                return Err(EngineError::validation("Generate an image before editing."));
            };
            if !session.has_instructions() {
                return Err(EngineError::validation(
                    "Add a global instruction or a region instruction before editing.",
                ));
            }
            session.activity = Some(Activity::Editing);
            Ok(EditRequest {
                source,
                overlay: session.pending_overlay.clone().filter(|bytes| !bytes.is_empty()),
                regions: session.active_instructions(),
                global_instruction: session.global_instruction.trim().to_string(),
                submitted: Submitted {
                    global_instruction: session.global_instruction.clone(),
                    region_instructions: session.region_instructions.clone(),
                    overlay: session.pending_overlay.clone(),
                },
            })
        })?;

        let colors: Vec<MarkerColor> = request.regions.iter().map(|region| region.color).collect();
        info!(
            session_id = %id,
            regions = request.regions.len(),
            has_overlay = request.overlay.is_some(),
            "editing image"
        );
        self.emit(
            id,
            "edit_started",
            json!({
                "source_fingerprint": request.source.fingerprint(),
                "colors": colors,
                "has_overlay": request.overlay.is_some(),
                "has_global_instruction": !request.global_instruction.is_empty(),
            }),
        );

        let outcome = self.run_edit(id, &request);
        let submitted = request.submitted;
        self.settle(id, "edit", &outcome, |session, report| {
            session.image = Some(report.image.clone());
            submitted.clear_from(session);
        });
        if let Ok(report) = &outcome {
            info!(
                session_id = %id,
                fingerprint = %report.image.fingerprint(),
                cleanup = report.outcome.as_str(),
                "image edited"
            );
            self.emit(
                id,
                "image_edited",
                json!({
                    "fingerprint": report.image.fingerprint(),
                    "media_type": report.image.media_type(),
                    "cleanup": report.outcome.as_str(),
                }),
            );
        }
        outcome
    }

    fn run_edit(&self, id: SessionId, request: &EditRequest) -> EngineResult<CleanupReport> {
        let composite = match &request.overlay {
            Some(overlay) => {
                let composite = self.compositor.composite(
                    overlay,
                    request.source.payload(),
                    request.source.media_type(),
                )?;
                self.emit(
                    id,
                    "overlay_composited",
                    json!({
                        "media_type": composite.media_type(),
                        "bytes": composite.payload().len(),
                    }),
                );
                composite
            }
            None => CompositeImage::passthrough(&request.source),
        };

        let first_pass = self.service.edit_with_mask(
            &request.source,
            &composite,
            &request.regions,
            &request.global_instruction,
        )?;
        let report = ArtifactCleanup::new(&self.service).run(first_pass);

        let mut check = json!({ "outcome": report.outcome.as_str() });
        if let CleanupOutcome::CleanupFailed(message) = &report.outcome {
            check["error"] = Value::String(message.clone());
        }
        self.emit(id, "artifact_check", check);
        Ok(report)
    }

    /// Releases the busy claim and applies the outcome. A session deleted
    /// while the call was in flight just drops the result.
    fn settle<T>(
        &self,
        id: SessionId,
        operation: &str,
        outcome: &EngineResult<T>,
        apply: impl FnOnce(&mut Session, &T),
    ) {
        let written = self.store.update(id, |session| {
            session.activity = None;
            match outcome {
                Ok(value) => {
                    apply(session, value);
                    session.last_error = None;
                }
                Err(err) => session.last_error = Some(err.session_message()),
            }
        });
        if written.is_err() {
            warn!(session_id = %id, operation, "session was deleted before the result arrived");
        }

        if let Err(err) = outcome {
            warn!(session_id = %id, operation, error = %err, "operation failed");
            self.emit(
                id,
                "operation_failed",
                json!({
                    "operation": operation,
                    "error": err.to_string(),
                    "message": err.session_message(),
                }),
            );
        }
    }

    fn emit(&self, id: SessionId, event_type: &str, payload: Value) {
        let Some(events) = &self.events else {
            return;
        };
        if let Err(err) = events.emit_for(event_type, id, event_payload(payload)) {
            warn!(event_type, error = %err, "failed to write event");
        }
    }
}

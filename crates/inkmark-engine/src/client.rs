use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use inkmark_contracts::session::{CompositeImage, GeneratedImage, MaskInstruction};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::credentials::CredentialSource;
use crate::error::{EngineError, EngineResult};
use crate::prompts::{build_edit_prompt, CLEANUP_PROMPT, DETECTION_PROMPT};
use crate::transport::GenerationTransport;

/// Calls the orchestrator needs from the remote generation service.
pub trait GenerationService: Send + Sync {
    fn generate(&self, prompt: &str) -> EngineResult<GeneratedImage>;

    fn edit_with_mask(
        &self,
        source: &GeneratedImage,
        composite: &CompositeImage,
        regions: &[MaskInstruction],
        global_instruction: &str,
    ) -> EngineResult<GeneratedImage>;

    /// Never fails: any error reads as "no artifacts".
    fn detect_artifacts(&self, image: &GeneratedImage) -> bool;

    fn cleanup(&self, image: &GeneratedImage) -> EngineResult<GeneratedImage>;
}

pub struct GenerationClient<T, C> {
    transport: T,
    credentials: C,
    image_model: String,
    vision_model: String,
    aspect_ratio: String,
    image_size: String,
}

impl<T: GenerationTransport, C: CredentialSource> GenerationClient<T, C> {
    pub fn new(config: &EngineConfig, transport: T, credentials: C) -> Self {
        Self {
            transport,
            credentials,
            image_model: config.image_model.clone(),
            vision_model: config.vision_model.clone(),
            aspect_ratio: config.aspect_ratio.clone(),
            image_size: config.image_size.clone(),
        }
    }

    pub fn image_model(&self) -> &str {
        &self.image_model
    }

    pub fn vision_model(&self) -> &str {
        &self.vision_model
    }

    fn api_key(&self) -> EngineResult<String> {
        self.credentials
            .api_key()
            .ok_or(EngineError::MissingCredential)
    }

    fn image_generation_config(&self) -> Value {
        json!({
            "responseModalities": ["TEXT", "IMAGE"],
            "imageConfig": {
                "aspectRatio": self.aspect_ratio,
                "imageSize": self.image_size,
            },
        })
    }

    fn request_image(&self, parts: Vec<Value>) -> EngineResult<GeneratedImage> {
        let api_key = self.api_key()?;
        let payload = json!({
            "contents": [{ "role": "user", "parts": parts }],
            "generationConfig": self.image_generation_config(),
        });
        let response = self
            .transport
            .generate_content(&self.image_model, &api_key, &payload)?;
        let image = extract_generated_image(&response)?;
        debug!(
            model = %self.image_model,
            fingerprint = %image.fingerprint(),
            media_type = image.media_type(),
            "image extracted from response"
        );
        Ok(image)
    }

    fn request_artifact_verdict(&self, image: &GeneratedImage) -> EngineResult<bool> {
        let api_key = self.api_key()?;
        let payload = json!({
            "contents": [{
                "role": "user",
                "parts": [
                    inline_part(image.media_type(), image.base64_payload()),
                    { "text": DETECTION_PROMPT },
                ],
            }],
            "generationConfig": {
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": { "hasArtifacts": { "type": "BOOLEAN" } },
                    "required": ["hasArtifacts"],
                },
            },
        });
        let response = self
            .transport
            .generate_content(&self.vision_model, &api_key, &payload)?;
        parse_artifact_verdict(&response)
    }
}

impl<T: GenerationTransport, C: CredentialSource> GenerationService for GenerationClient<T, C> {
    fn generate(&self, prompt: &str) -> EngineResult<GeneratedImage> {
        self.request_image(vec![json!({ "text": prompt })])
    }

    fn edit_with_mask(
        &self,
        source: &GeneratedImage,
        composite: &CompositeImage,
        regions: &[MaskInstruction],
        global_instruction: &str,
    ) -> EngineResult<GeneratedImage> {
        let prompt = build_edit_prompt(regions, global_instruction);
        self.request_image(vec![
            inline_part(source.media_type(), source.base64_payload()),
            inline_part(composite.media_type(), composite.base64_payload()),
            json!({ "text": prompt }),
        ])
    }

    fn detect_artifacts(&self, image: &GeneratedImage) -> bool {
        match self.request_artifact_verdict(image) {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(
                    error = %err,
                    fingerprint = %image.fingerprint(),
                    "artifact detection failed; assuming none"
                );
                false
            }
        }
    }

    fn cleanup(&self, image: &GeneratedImage) -> EngineResult<GeneratedImage> {
        self.request_image(vec![
            inline_part(image.media_type(), image.base64_payload()),
            json!({ "text": CLEANUP_PROMPT }),
        ])
    }
}

fn inline_part(media_type: &str, data: String) -> Value {
    json!({
        "inlineData": {
            "mimeType": media_type,
            "data": data,
        }
    })
}

fn candidate_parts(candidate: &Value) -> Vec<Value> {
    candidate
        .get("content")
        .and_then(Value::as_object)
        .and_then(|content| content.get("parts"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default()
}

fn inline_data(part: &Value) -> Option<&Map<String, Value>> {
    part.get("inlineData")
        .or_else(|| part.get("inline_data"))
        .and_then(Value::as_object)
}

/// Pulls the first inline image out of a `generateContent` response.
pub fn extract_generated_image(response: &Value) -> EngineResult<GeneratedImage> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let Some(first) = candidates.first() else {
        let reason = response
            .get("promptFeedback")
            .and_then(|feedback| feedback.get("blockReason"))
            .and_then(Value::as_str);
        return Err(EngineError::EmptyResponse(match reason {
            Some(reason) => format!("The service returned no results (blocked: {reason})."),
            None => "The service returned no results.".to_string(),
        }));
    };

    let parts = candidate_parts(first);
    for part in &parts {
        let Some(inline) = inline_data(part) else {
            continue;
        };
        let data = inline
            .get("data")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if data.is_empty() {
            continue;
        }
        let bytes = BASE64.decode(data.as_bytes()).map_err(|err| {
            EngineError::NoImage(format!(
                "The service returned an unreadable image ({err})."
            ))
        })?;
        let media_type = inline
            .get("mimeType")
            .or_else(|| inline.get("mime_type"))
            .and_then(Value::as_str)
            .filter(|value| !value.trim().is_empty())
            .unwrap_or("image/png");
        return Ok(GeneratedImage::new(bytes, media_type));
    }

    let explanation = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .collect::<Vec<_>>()
        .join("\n");
    if !explanation.is_empty() {
        return Err(EngineError::NoImage(explanation));
    }
    let finish_reason = first
        .get("finishReason")
        .and_then(Value::as_str)
        .filter(|reason| !reason.is_empty() && *reason != "STOP");
    Err(EngineError::NoImage(match finish_reason {
        Some(reason) => format!("The service returned no image (finish reason: {reason})."),
        None => "The service returned no image.".to_string(),
    }))
}

fn parse_artifact_verdict(response: &Value) -> EngineResult<bool> {
    let candidates = response
        .get("candidates")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    let first = candidates
        .first()
        .ok_or_else(|| EngineError::EmptyResponse("no detection result".to_string()))?;
    let text = candidate_parts(first)
        .iter()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .collect::<String>();
    let parsed: Value = serde_json::from_str(text.trim())
        .map_err(|err| EngineError::service(format!("detection response was not JSON: {err}")))?;
    parsed
        .get("hasArtifacts")
        .and_then(Value::as_bool)
        .ok_or_else(|| EngineError::service("detection response missing boolean hasArtifacts"))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use inkmark_contracts::session::MarkerColor;

    use super::*;
    use crate::credentials::StaticCredentials;
    use crate::prompts::GLOBAL_FALLBACK;

    /// Replays canned responses and records every request.
    struct ScriptedTransport {
        responses: Mutex<Vec<EngineResult<Value>>>,
        requests: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        fn new(responses: Vec<EngineResult<Value>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                requests: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<(String, Value)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl GenerationTransport for &ScriptedTransport {
        fn generate_content(
            &self,
            model: &str,
            _api_key: &str,
            payload: &Value,
        ) -> EngineResult<Value> {
            self.requests
                .lock()
                .unwrap()
                .push((model.to_string(), payload.clone()));
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(EngineError::service("no scripted response"));
            }
            responses.remove(0)
        }
    }

    fn client(transport: &ScriptedTransport) -> GenerationClient<&ScriptedTransport, StaticCredentials> {
        GenerationClient::new(
            &EngineConfig::default(),
            transport,
            StaticCredentials::new("test-key"),
        )
    }

    fn image_response(bytes: &[u8], mime: &str) -> Value {
        json!({
            "candidates": [{
                "content": {
                    "parts": [
                        { "text": "Here you go." },
                        { "inlineData": { "mimeType": mime, "data": BASE64.encode(bytes) } },
                    ]
                },
                "finishReason": "STOP",
            }]
        })
    }

    fn text_response(text: &str) -> Value {
        json!({ "candidates": [{ "content": { "parts": [{ "text": text }] } }] })
    }

    #[test]
    fn generate_returns_png_and_sends_fixed_image_config() {
        let transport = ScriptedTransport::new(vec![Ok(image_response(b"png-bytes", "image/png"))]);
        let image = client(&transport).generate("a red bicycle").unwrap();
        assert_eq!(image.media_type(), "image/png");
        assert_eq!(image.payload(), b"png-bytes");

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let (model, payload) = &requests[0];
        assert_eq!(model, "gemini-3-pro-image-preview");
        assert_eq!(
            payload["contents"][0]["parts"],
            json!([{ "text": "a red bicycle" }])
        );
        assert_eq!(
            payload["generationConfig"]["imageConfig"],
            json!({ "aspectRatio": "1:1", "imageSize": "1K" })
        );
    }

    #[test]
    fn missing_credential_fails_before_transport() {
        let transport = ScriptedTransport::new(vec![Ok(image_response(b"x", "image/png"))]);
        let client = GenerationClient::new(
            &EngineConfig::default(),
            &transport,
            StaticCredentials::missing(),
        );
        assert_eq!(
            client.generate("a red bicycle"),
            Err(EngineError::MissingCredential)
        );
        let source = GeneratedImage::new(b"x".to_vec(), "image/png");
        assert!(!client.detect_artifacts(&source));
        assert!(transport.requests().is_empty());
    }

    #[test]
    fn edit_sends_source_composite_then_prompt() {
        let transport = ScriptedTransport::new(vec![Ok(image_response(b"edited", "image/png"))]);
        let source = GeneratedImage::new(b"source".to_vec(), "image/png");
        let composite = CompositeImage::new(b"composite".to_vec(), "image/jpeg");
        let regions = [MaskInstruction::new(MarkerColor::Cyan, "make the sky stormy")];

        let edited = client(&transport)
            .edit_with_mask(&source, &composite, &regions, "")
            .unwrap();
        assert_eq!(edited.payload(), b"edited");

        let (_, payload) = &transport.requests()[0];
        let parts = payload["contents"][0]["parts"].as_array().unwrap();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0]["inlineData"]["data"], json!(BASE64.encode(b"source")));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(
            parts[1]["inlineData"]["data"],
            json!(BASE64.encode(b"composite"))
        );
        let prompt = parts[2]["text"].as_str().unwrap();
        assert!(prompt.contains("[CYAN ANNOTATION]: make the sky stormy"));
        assert!(prompt.contains(GLOBAL_FALLBACK));
    }

    #[test]
    fn service_error_propagates() {
        let transport =
            ScriptedTransport::new(vec![Err(EngineError::service("request failed (503): busy"))]);
        let err = client(&transport).generate("a red bicycle").unwrap_err();
        assert_eq!(err, EngineError::service("request failed (503): busy"));
    }

    #[test]
    fn empty_candidates_is_empty_response() {
        let err = extract_generated_image(&json!({ "candidates": [] })).unwrap_err();
        assert!(matches!(err, EngineError::EmptyResponse(_)));

        let blocked = extract_generated_image(&json!({
            "promptFeedback": { "blockReason": "SAFETY" }
        }))
        .unwrap_err();
        assert_eq!(
            blocked.to_string(),
            "The service returned no results (blocked: SAFETY)."
        );
    }

    #[test]
    fn text_only_candidate_carries_explanation() {
        let err = extract_generated_image(&text_response("I can't create that image.")).unwrap_err();
        assert_eq!(err, EngineError::NoImage("I can't create that image.".to_string()));
    }

    #[test]
    fn silent_candidate_reports_finish_reason() {
        let err = extract_generated_image(&json!({
            "candidates": [{ "content": { "parts": [] }, "finishReason": "IMAGE_SAFETY" }]
        }))
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "The service returned no image (finish reason: IMAGE_SAFETY)."
        );
    }

    #[test]
    fn snake_case_inline_data_is_accepted() {
        let image = extract_generated_image(&json!({
            "candidates": [{ "content": { "parts": [
                { "inline_data": { "mime_type": "image/jpeg", "data": BASE64.encode(b"jpg") } }
            ] } }]
        }))
        .unwrap();
        assert_eq!(image.media_type(), "image/jpeg");
        assert_eq!(image.payload(), b"jpg");
    }

    #[test]
    fn undecodable_inline_data_is_no_image() {
        let err = extract_generated_image(&json!({
            "candidates": [{ "content": { "parts": [
                { "inlineData": { "mimeType": "image/png", "data": "!!not base64!!" } }
            ] } }]
        }))
        .unwrap_err();
        assert!(matches!(err, EngineError::NoImage(_)));
        assert!(err.to_string().starts_with("The service returned an unreadable image"));
        assert!(!err.is_rejection());
    }

    #[test]
    fn only_first_candidate_is_considered() {
        let err = extract_generated_image(&json!({
            "candidates": [
                { "content": { "parts": [{ "text": "refused" }] } },
                { "content": { "parts": [{ "inlineData": { "mimeType": "image/png", "data": BASE64.encode(b"x") } }] } },
            ]
        }))
        .unwrap_err();
        assert_eq!(err, EngineError::NoImage("refused".to_string()));
    }

    #[test]
    fn detection_requests_structured_boolean() {
        let transport = ScriptedTransport::new(vec![Ok(text_response("{\"hasArtifacts\": true}"))]);
        let image = GeneratedImage::new(b"edited".to_vec(), "image/png");
        assert!(client(&transport).detect_artifacts(&image));

        let (model, payload) = &transport.requests()[0];
        assert_eq!(model, "gemini-2.5-flash");
        let config = &payload["generationConfig"];
        assert_eq!(config["responseMimeType"], json!("application/json"));
        assert_eq!(
            config["responseSchema"]["properties"]["hasArtifacts"]["type"],
            json!("BOOLEAN")
        );
        assert_eq!(
            payload["contents"][0]["parts"][1]["text"],
            json!(DETECTION_PROMPT)
        );
    }

    #[test]
    fn detection_failures_read_as_clean() {
        let image = GeneratedImage::new(b"edited".to_vec(), "image/png");
        for response in [
            Err(EngineError::service("timeout")),
            Ok(text_response("not json")),
            Ok(text_response("{\"hasArtifacts\": \"yes\"}")),
            Ok(json!({ "candidates": [] })),
        ] {
            let transport = ScriptedTransport::new(vec![response]);
            assert!(!client(&transport).detect_artifacts(&image));
        }
    }

    #[test]
    fn cleanup_sends_image_and_fixed_prompt() {
        let transport = ScriptedTransport::new(vec![Ok(image_response(b"clean", "image/png"))]);
        let image = GeneratedImage::new(b"marked".to_vec(), "image/png");
        let cleaned = client(&transport).cleanup(&image).unwrap();
        assert_eq!(cleaned.payload(), b"clean");

        let (model, payload) = &transport.requests()[0];
        assert_eq!(model, "gemini-3-pro-image-preview");
        assert_eq!(
            payload["contents"][0]["parts"][1]["text"],
            json!(CLEANUP_PROMPT)
        );
    }
}

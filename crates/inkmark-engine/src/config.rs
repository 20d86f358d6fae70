use std::time::Duration;

use inkmark_contracts::models::{Capability, ModelSelector};

use crate::credentials::non_empty_env;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Square edge, in pixels, shared by generation, compositing, and the canvas.
pub const CANVAS_RESOLUTION: u32 = 1024;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub image_model: String,
    pub vision_model: String,
    pub aspect_ratio: String,
    pub image_size: String,
    pub canvas_resolution: u32,
    pub jpeg_quality: u8,
    pub request_timeout: Duration,
    pub transport_retries: usize,
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let selector = ModelSelector::default();
        let default_model = |capability| {
            selector
                .select(None, capability)
                .map(|selection| selection.model.name)
                .unwrap_or_default()
        };
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            image_model: default_model(Capability::Image),
            vision_model: default_model(Capability::Vision),
            aspect_ratio: "1:1".to_string(),
            image_size: "1K".to_string(),
            canvas_resolution: CANVAS_RESOLUTION,
            jpeg_quality: 92,
            request_timeout: Duration::from_secs(90),
            transport_retries: 2,
            retry_backoff: Duration::from_millis(1200),
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `INKMARK_*` environment variables.
    pub fn from_env() -> (Self, Vec<String>) {
        Self::from_lookup(non_empty_env)
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> (Self, Vec<String>) {
        let mut config = Self::default();
        if let Some(api_base) = lookup("INKMARK_API_BASE").or_else(|| lookup("GEMINI_API_BASE")) {
            config.api_base = api_base.trim().trim_end_matches('/').to_string();
        }
        config.request_timeout = Duration::from_secs_f64(clamped_f64(
            lookup("INKMARK_REQUEST_TIMEOUT").as_deref(),
            90.0,
            15.0,
            300.0,
        ));
        config.transport_retries = clamped_f64(
            lookup("INKMARK_TRANSPORT_RETRIES").as_deref(),
            2.0,
            0.0,
            4.0,
        )
        .round() as usize;
        config.retry_backoff = Duration::from_secs_f64(clamped_f64(
            lookup("INKMARK_RETRY_BACKOFF").as_deref(),
            1.2,
            0.1,
            10.0,
        ));

        let warnings = config.select_models(
            lookup("INKMARK_IMAGE_MODEL").as_deref(),
            lookup("INKMARK_VISION_MODEL").as_deref(),
        );
        (config, warnings)
    }

    /// Applies requested model names, falling back to registry defaults.
    /// Returns one message per fallback that happened.
    pub fn select_models(
        &mut self,
        image_model: Option<&str>,
        vision_model: Option<&str>,
    ) -> Vec<String> {
        let selector = ModelSelector::default();
        let mut warnings = Vec::new();
        for (requested, capability) in [
            (image_model, Capability::Image),
            (vision_model, Capability::Vision),
        ] {
            let Some(requested) = requested.map(str::trim).filter(|value| !value.is_empty())
            else {
                continue;
            };
            match selector.select(Some(requested), capability) {
                Ok(selection) => {
                    if let Some(reason) = selection.fallback_reason {
                        warnings.push(reason);
                    }
                    match capability {
                        Capability::Image => self.image_model = selection.model.name,
                        Capability::Vision => self.vision_model = selection.model.name,
                    }
                }
                Err(reason) => warnings.push(reason),
            }
        }
        warnings
    }
}

fn clamped_f64(raw: Option<&str>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_canvas_contract() {
        let config = EngineConfig::default();
        assert_eq!(config.image_model, "gemini-3-pro-image-preview");
        assert_eq!(config.vision_model, "gemini-2.5-flash");
        assert_eq!(config.aspect_ratio, "1:1");
        assert_eq!(config.image_size, "1K");
        assert_eq!(config.canvas_resolution, 1024);
    }

    #[test]
    fn env_overrides_are_clamped() {
        let (config, warnings) = EngineConfig::from_lookup(lookup_from(&[
            ("GEMINI_API_BASE", "http://localhost:8080/v1beta/"),
            ("INKMARK_REQUEST_TIMEOUT", "5"),
            ("INKMARK_TRANSPORT_RETRIES", "9"),
            ("INKMARK_RETRY_BACKOFF", "nonsense"),
        ]));
        assert!(warnings.is_empty());
        assert_eq!(config.api_base, "http://localhost:8080/v1beta");
        assert_eq!(config.request_timeout, Duration::from_secs(15));
        assert_eq!(config.transport_retries, 4);
        assert_eq!(config.retry_backoff, Duration::from_millis(1200));
    }

    #[test]
    fn unsupported_model_falls_back_with_warning() {
        let (config, warnings) = EngineConfig::from_lookup(lookup_from(&[
            ("INKMARK_IMAGE_MODEL", "gemini-2.5-pro"),
            ("INKMARK_VISION_MODEL", "gemini-2.5-pro"),
        ]));
        assert_eq!(config.image_model, "gemini-3-pro-image-preview");
        assert_eq!(config.vision_model, "gemini-2.5-pro");
        assert_eq!(
            warnings,
            vec!["Requested model 'gemini-2.5-pro' unavailable for capability 'image'.".to_string()]
        );
    }
}

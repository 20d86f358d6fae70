use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;
use tracing::warn;

use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};

/// One `generateContent` round trip: JSON request in, JSON response out.
pub trait GenerationTransport: Send + Sync {
    fn generate_content(&self, model: &str, api_key: &str, payload: &Value) -> EngineResult<Value>;
}

/// Blocking HTTPS transport for the Gemini REST API.
pub struct HttpTransport {
    api_base: String,
    http: HttpClient,
    request_timeout: Duration,
    max_retries: usize,
    retry_backoff: Duration,
}

impl HttpTransport {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.trim_end_matches('/').to_string(),
            http: HttpClient::new(),
            request_timeout: config.request_timeout,
            max_retries: config.transport_retries,
            retry_backoff: config.retry_backoff,
        }
    }

    pub fn endpoint_for_model(&self, model: &str) -> String {
        let trimmed = model.trim();
        let model_path = if trimmed.starts_with("models/") {
            trimmed.to_string()
        } else {
            format!("models/{trimmed}")
        };
        format!("{}/{}:generateContent", self.api_base, model_path)
    }

    fn post_with_transport_retries(
        &self,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
    ) -> EngineResult<HttpResponse> {
        let mut attempt = 0;
        loop {
            let response = self
                .http
                .post(endpoint)
                .query(&[("key", api_key)])
                .timeout(self.request_timeout)
                .json(payload)
                .send();

            match response {
                Ok(ok) => return Ok(ok),
                Err(err) => {
                    // the URL carries the API key
                    let err = err.without_url();
                    if !is_retryable_transport_error(&err) || attempt >= self.max_retries {
                        return Err(EngineError::service(format!(
                            "request to {} failed: {err}",
                            redact_endpoint(endpoint),
                        )));
                    }
                    attempt += 1;
                    warn!(
                        attempt,
                        max_retries = self.max_retries,
                        error = %err,
                        "transient transport failure, retrying"
                    );
                    thread::sleep(self.retry_backoff * attempt as u32);
                }
            }
        }
    }
}

impl GenerationTransport for HttpTransport {
    fn generate_content(&self, model: &str, api_key: &str, payload: &Value) -> EngineResult<Value> {
        let endpoint = self.endpoint_for_model(model);
        let response = self.post_with_transport_retries(&endpoint, api_key, payload)?;
        response_json_or_error(response)
    }
}

fn response_json_or_error(response: HttpResponse) -> EngineResult<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .map_err(|err| EngineError::service(format!("response body read failed: {err}")))?;
    if !status.is_success() {
        return Err(EngineError::service(format!(
            "request failed ({code}): {}",
            truncate_text(&body, 512)
        )));
    }
    serde_json::from_str(&body)
        .map_err(|err| EngineError::service(format!("service returned invalid JSON: {err}")))
}

fn is_retryable_transport_error(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

fn redact_endpoint(endpoint: &str) -> &str {
    endpoint.split('?').next().unwrap_or(endpoint)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_accepts_bare_and_prefixed_model_names() {
        let mut config = EngineConfig::default();
        config.api_base = "https://example.test/v1beta/".to_string();
        let transport = HttpTransport::new(&config);
        assert_eq!(
            transport.endpoint_for_model("gemini-2.5-flash"),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
        assert_eq!(
            transport.endpoint_for_model(" models/gemini-2.5-flash "),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn redaction_drops_query_string() {
        assert_eq!(
            redact_endpoint("https://example.test/x?key=secret"),
            "https://example.test/x"
        );
    }
}

//! HTTP client for the deployed service.
//!
//! Wraps the three calls the probes need (liveness, model listing, one
//! inference round-trip) and returns typed results instead of raw bodies.
//! Connection failures are retried a fixed number of times with a fixed
//! backoff; everything else is returned to the caller on the first attempt.

use reqwest::{Client, RequestBuilder, Response};
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

use crate::config::ProbeOptions;
use crate::error::{ProbeError, Result};

/// Default connection timeout in seconds.
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;

/// Why a single call did not produce a usable answer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CallError {
    /// The request URL or body could not be built.
    #[error("invalid request: {0}")]
    Invalid(String),

    /// The endpoint could not be reached.
    #[error("unreachable: {0}")]
    Transport(String),

    /// No response within the deadline.
    #[error("no response within {0}ms")]
    Timeout(u64),

    /// Non-success HTTP status.
    #[error("HTTP {0}")]
    Status(u16),

    /// The body did not have the expected shape.
    #[error("malformed response: {0}")]
    Malformed(String),
}

impl CallError {
    /// Converts into a probe execution fault.
    #[must_use]
    pub fn into_probe_error(self, probe: &str, endpoint: &str) -> ProbeError {
        ProbeError::Execution {
            probe: probe.to_string(),
            endpoint: endpoint.to_string(),
            message: self.to_string(),
        }
    }
}

/// A value together with the time it took to obtain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Timed<T> {
    /// Result.
    pub value: T,
    /// Round-trip time of the successful attempt.
    pub latency: Duration,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Serialize)]
struct GenerateOptions {
    temperature: u8,
    num_predict: u32,
}

/// Client for the service's HTTP surface.
#[derive(Debug, Clone)]
pub struct ServiceClient {
    http: Client,
    health_path: String,
    capability_path: String,
    inference_path: String,
    retry_attempts: u32,
    retry_backoff: Duration,
}

impl ServiceClient {
    /// Creates a client from probe options.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new(options: &ProbeOptions) -> Result<Self> {
        let http = Client::builder()
            .timeout(options.request_timeout)
            .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| ProbeError::ClientSetup {
                message: e.to_string(),
            })?;

        Ok(Self {
            http,
            health_path: options.health_path.clone(),
            capability_path: options.capability_path.clone(),
            inference_path: options.inference_path.clone(),
            retry_attempts: options.retry_attempts.max(1),
            retry_backoff: options.retry_backoff,
        })
    }

    /// GETs the liveness path; succeeds on any 2xx.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the endpoint is unreachable or not 2xx.
    pub async fn check_health(&self, base_url: &str) -> std::result::Result<Timed<u16>, CallError> {
        let url = join(base_url, &self.health_path);
        let (response, latency) = self.send(|| self.http.get(&url)).await?;
        let status = success(response)?.status().as_u16();
        Ok(Timed {
            value: status,
            latency,
        })
    }

    /// Lists the models the service has available.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the call fails or the body is not a
    /// recognised listing.
    pub async fn list_models(
        &self,
        base_url: &str,
    ) -> std::result::Result<Timed<Vec<String>>, CallError> {
        let url = join(base_url, &self.capability_path);
        let (response, latency) = self.send(|| self.http.get(&url)).await?;
        let body = read_json(success(response)?).await?;

        let models = parse_model_names(&body).ok_or_else(|| {
            CallError::Malformed(String::from("expected a model list (array, models or data)"))
        })?;

        Ok(Timed {
            value: models,
            latency,
        })
    }

    /// Runs one non-streaming inference and returns the `response` text.
    ///
    /// # Errors
    ///
    /// Returns a [`CallError`] if the call fails, exceeds `timeout`, or the
    /// body has no `response` string.
    pub async fn generate(
        &self,
        base_url: &str,
        model: &str,
        prompt: &str,
        max_tokens: u32,
        timeout: Duration,
    ) -> std::result::Result<Timed<String>, CallError> {
        let url = join(base_url, &self.inference_path);
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0,
                num_predict: max_tokens,
            },
        };

        let (response, latency) = self
            .send(|| self.http.post(&url).json(&body).timeout(timeout))
            .await?;
        let json = read_json(success(response)?).await?;

        let text = json
            .get("response")
            .and_then(Value::as_str)
            .ok_or_else(|| CallError::Malformed(String::from("missing 'response' field")))?;

        if text.trim().is_empty() {
            return Err(CallError::Malformed(String::from("empty 'response' field")));
        }

        Ok(Timed {
            value: text.to_string(),
            latency,
        })
    }

    async fn send<F>(&self, build: F) -> std::result::Result<(Response, Duration), CallError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt = 1;

        loop {
            let start = Instant::now();
            match build().send().await {
                Ok(response) => return Ok((response, start.elapsed())),
                Err(e) if e.is_builder() => return Err(CallError::Invalid(e.to_string())),
                Err(e) if e.is_timeout() => {
                    return Err(CallError::Timeout(millis(start.elapsed())));
                }
                Err(e) if e.is_connect() && attempt < self.retry_attempts => {
                    debug!("Attempt {attempt}/{} failed, retrying: {e}", self.retry_attempts);
                    attempt += 1;
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => return Err(CallError::Transport(e.to_string())),
            }
        }
    }
}

fn success(response: Response) -> std::result::Result<Response, CallError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(CallError::Status(status.as_u16()))
    }
}

async fn read_json(response: Response) -> std::result::Result<Value, CallError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| CallError::Transport(e.to_string()))?;
    serde_json::from_slice(&bytes).map_err(|e| CallError::Malformed(e.to_string()))
}

/// Extracts model names from the listing shapes servers commonly return.
fn parse_model_names(body: &Value) -> Option<Vec<String>> {
    let entries = match body {
        Value::Array(entries) => entries,
        Value::Object(map) => map
            .get("models")
            .or_else(|| map.get("data"))
            .and_then(Value::as_array)?,
        _ => return None,
    };

    Some(
        entries
            .iter()
            .filter_map(|entry| match entry {
                Value::String(name) => Some(name.clone()),
                Value::Object(fields) => fields
                    .get("name")
                    .or_else(|| fields.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            })
            .collect(),
    )
}

fn join(base_url: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base_url.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Milliseconds, saturating.
pub(crate) fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn options() -> ProbeOptions {
        ProbeOptions {
            retry_backoff: Duration::from_millis(1),
            request_timeout: Duration::from_secs(2),
            ..ProbeOptions::default()
        }
    }

    #[tokio::test]
    async fn test_health_ok_and_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/"))
            .respond_with(ResponseTemplate::new(200).set_body_string("Ollama is running"))
            .mount(&server)
            .await;

        let client = ServiceClient::new(&options()).unwrap();
        let timed = client.check_health(&server.uri()).await.unwrap();
        assert_eq!(timed.value, 200);

        let failing = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&failing)
            .await;
        assert_eq!(
            client.check_health(&failing.uri()).await.unwrap_err(),
            CallError::Status(503)
        );
    }

    #[tokio::test]
    async fn test_list_models_shapes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/tags"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "models": [{"name": "llama3.2:1b"}, {"name": "codellama:7b"}]
            })))
            .mount(&server)
            .await;

        let client = ServiceClient::new(&options()).unwrap();
        let models = client.list_models(&server.uri()).await.unwrap().value;
        assert_eq!(models, vec!["llama3.2:1b", "codellama:7b"]);

        assert_eq!(
            parse_model_names(&json!({"data": [{"id": "gpt-x"}, "plain"]})),
            Some(vec![String::from("gpt-x"), String::from("plain")])
        );
        assert_eq!(parse_model_names(&json!([])), Some(Vec::new()));
        assert_eq!(parse_model_names(&json!({"status": "ok"})), None);
    }

    #[tokio::test]
    async fn test_generate_sends_deterministic_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/generate"))
            .and(body_partial_json(json!({
                "model": "llama3.2:1b",
                "stream": false,
                "options": {"temperature": 0, "num_predict": 50}
            })))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"response": "Bill Clinton", "done": true})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ServiceClient::new(&options()).unwrap();
        let timed = client
            .generate(&server.uri(), "llama3.2:1b", "who?", 50, Duration::from_secs(2))
            .await
            .unwrap();
        assert_eq!(timed.value, "Bill Clinton");
    }

    #[tokio::test]
    async fn test_generate_without_response_field_is_malformed() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"error": "model not found"})))
            .mount(&server)
            .await;

        let client = ServiceClient::new(&options()).unwrap();
        let err = client
            .generate(&server.uri(), "missing", "who?", 50, Duration::from_secs(2))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_generate_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"response": "late"}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let client = ServiceClient::new(&options()).unwrap();
        let err = client
            .generate(&server.uri(), "m", "p", 5, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CallError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_transport_error() {
        let client = ServiceClient::new(&options()).unwrap();
        let err = client.check_health("http://127.0.0.1:9").await.unwrap_err();
        assert!(matches!(err, CallError::Transport(_)));
    }

    #[test]
    fn test_join_normalises_slashes() {
        assert_eq!(join("http://a:1/", "/api/tags"), "http://a:1/api/tags");
        assert_eq!(join("http://a:1", "/"), "http://a:1/");
    }
}

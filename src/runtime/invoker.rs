/// Action invocation (HTTP)
///
/// Executes the side effect of one action node. The request is sent exactly as
/// resolved: method, url, headers and body bytes are not rewritten and no implicit
/// Content-Type is added. 2xx is success; any other status, an invalid request or
/// a network/timeout error is a failure with whatever status and latency were
/// observed. No retries happen here.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// Response bodies longer than this are truncated before being kept as step output
const MAX_CAPTURED_BODY: usize = 64 * 1024;

/// Fully resolved request for one action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub method: String,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub body: Option<String>,
    pub timeout: Duration,
}

/// What happened when the request was attempted
#[derive(Debug, Clone, PartialEq)]
pub struct ActionOutcome {
    pub status_code: Option<u16>,
    pub latency: Duration,
    pub response_body: Option<String>,
    /// Set for every failure (non-2xx, invalid request, transport error)
    pub error: Option<String>,
}

impl ActionOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status_code.is_some_and(|code| (200..300).contains(&code))
    }

    pub fn failed(latency: Duration, status_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            status_code,
            latency,
            response_body: None,
            error: Some(error.into()),
        }
    }
}

/// Side-effect seam for action nodes
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    /// Perform the action. Never errors: failures are described by the outcome.
    async fn invoke(&self, request: &ActionRequest) -> ActionOutcome;
}

/// reqwest-backed invoker sharing one connection pool across runs
#[derive(Debug, Clone)]
pub struct HttpInvoker {
    client: reqwest::Client,
}

impl HttpInvoker {
    pub fn new() -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build HTTP client: {}", e))?;
        Ok(Self { client })
    }

    fn build_request(&self, request: &ActionRequest) -> Result<reqwest::RequestBuilder, String> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())
            .map_err(|_| format!("Unsupported HTTP method: {}", request.method))?;

        let mut headers = HeaderMap::new();
        for (name, value) in &request.headers {
            let header_name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| format!("Invalid header name: {}", name))?;
            let header_value = HeaderValue::from_str(value)
                .map_err(|_| format!("Invalid value for header '{}'", name))?;
            headers.insert(header_name, header_value);
        }

        let url = reqwest::Url::parse(&request.url)
            .map_err(|e| format!("Invalid URL '{}': {}", request.url, e))?;

        let mut builder = self
            .client
            .request(method, url)
            .headers(headers)
            .timeout(request.timeout);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        Ok(builder)
    }
}

#[async_trait]
impl ActionInvoker for HttpInvoker {
    async fn invoke(&self, request: &ActionRequest) -> ActionOutcome {
        tracing::debug!("🌍 HTTP Request: {} {}", request.method, request.url);
        let start = Instant::now();

        let builder = match self.build_request(request) {
            Ok(builder) => builder,
            Err(message) => {
                tracing::warn!("❌ Invalid action request: {}", message);
                return ActionOutcome::failed(start.elapsed(), None, message);
            }
        };

        let response = match builder.send().await {
            Ok(response) => response,
            Err(e) => {
                let message = if e.is_timeout() {
                    format!("HTTP request timed out after {:?}", request.timeout)
                } else {
                    format!("HTTP request failed: {}", e)
                };
                return ActionOutcome::failed(start.elapsed(), None, message);
            }
        };

        let status = response.status();
        let body = match response.text().await {
            Ok(text) => truncate(text),
            Err(e) => {
                return ActionOutcome::failed(
                    start.elapsed(),
                    Some(status.as_u16()),
                    format!("Failed to read response body: {}", e),
                )
            }
        };
        let latency = start.elapsed();

        tracing::debug!("📡 Response status: {} in {:?}", status, latency);

        let error = (!status.is_success()).then(|| format!("HTTP {}", status));
        ActionOutcome {
            status_code: Some(status.as_u16()),
            latency,
            response_body: Some(body),
            error,
        }
    }
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_CAPTURED_BODY {
        let mut cut = MAX_CAPTURED_BODY;
        while !text.is_char_boundary(cut) {
            cut -= 1;
        }
        text.truncate(cut);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn success_requires_2xx_and_no_error() {
        let ok = ActionOutcome {
            status_code: Some(204),
            latency: Duration::ZERO,
            response_body: None,
            error: None,
        };
        assert!(ok.is_success());
        assert!(!ActionOutcome::failed(Duration::ZERO, Some(500), "HTTP 500").is_success());
        assert!(!ActionOutcome::failed(Duration::ZERO, None, "refused").is_success());
    }

    #[tokio::test]
    async fn invalid_requests_fail_without_network() {
        let invoker = HttpInvoker::new().unwrap();
        let mut request = ActionRequest {
            method: "GE T".to_string(),
            url: "http://127.0.0.1:9/".to_string(),
            headers: BTreeMap::new(),
            body: None,
            timeout: Duration::from_secs(1),
        };
        let outcome = invoker.invoke(&request).await;
        assert!(outcome.error.unwrap().contains("Unsupported HTTP method"));

        request.method = "GET".to_string();
        request.url = "not a url".to_string();
        let outcome = invoker.invoke(&request).await;
        assert!(outcome.error.unwrap().contains("Invalid URL"));
    }

    #[test]
    fn truncates_on_char_boundary() {
        let text = "é".repeat(MAX_CAPTURED_BODY);
        let truncated = truncate(text);
        assert!(truncated.len() <= MAX_CAPTURED_BODY);
        assert!(truncated.chars().all(|c| c == 'é'));
    }
}

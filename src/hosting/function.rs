//! Cloud function mode
//!
//! Polls the function runtime API for invocations. Each invocation carries a
//! REST gateway proxy event, which is turned into an HTTP request, run through
//! the regular axum router and turned back into a proxy response.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use axum::body::Body;
use axum::http::response::Parts;
use axum::http::{HeaderName, HeaderValue, Method, Request};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use http_body_util::BodyExt;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tower::ServiceExt;

use crate::error::HostingError;

const RUNTIME_API_VERSION: &str = "2018-06-01";
const REQUEST_ID_HEADER: &str = "lambda-runtime-aws-request-id";

/// REST gateway proxy event
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayEvent {
    pub http_method: String,
    pub path: String,
    #[serde(default)]
    pub headers: Option<HashMap<String, String>>,
    #[serde(default)]
    pub multi_value_headers: Option<HashMap<String, Vec<String>>>,
    #[serde(default)]
    pub query_string_parameters: Option<HashMap<String, String>>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub is_base64_encoded: bool,
}

/// REST gateway proxy response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GatewayResponse {
    pub status_code: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
    pub is_base64_encoded: bool,
}

impl GatewayEvent {
    /// Convert to an HTTP request for the router
    pub fn into_request(self) -> Result<Request<Body>, HostingError> {
        let method = Method::from_bytes(self.http_method.as_bytes())
            .map_err(|_| invalid_event(format!("unsupported method {:?}", self.http_method)))?;

        let mut uri = if self.path.is_empty() {
            "/".to_string()
        } else {
            self.path
        };
        if let Some(query) = self.query_string_parameters.filter(|q| !q.is_empty()) {
            let sorted: BTreeMap<_, _> = query.into_iter().collect();
            let encoded = form_urlencoded::Serializer::new(String::new())
                .extend_pairs(sorted.iter())
                .finish();
            uri.push('?');
            uri.push_str(&encoded);
        }

        let mut builder = Request::builder().method(method).uri(uri);
        let headers = builder
            .headers_mut()
            .ok_or_else(|| invalid_event("invalid method or path"))?;

        // Header names are matched case-insensitively from here on.
        match (self.multi_value_headers, self.headers) {
            (Some(multi), _) if !multi.is_empty() => {
                for (name, values) in multi {
                    let name = header_name(&name)?;
                    for value in values {
                        headers.append(name.clone(), header_value(&value)?);
                    }
                }
            }
            (_, Some(single)) => {
                for (name, value) in single {
                    headers.insert(header_name(&name)?, header_value(&value)?);
                }
            }
            _ => {}
        }

        let body = match self.body {
            None => Vec::new(),
            Some(body) if self.is_base64_encoded => STANDARD
                .decode(body.as_bytes())
                .map_err(|e| invalid_event(format!("body is not valid base64: {}", e)))?,
            Some(body) => body.into_bytes(),
        };

        builder
            .body(Body::from(body))
            .map_err(|e| invalid_event(e.to_string()))
    }
}

impl GatewayResponse {
    /// Build from response parts and a fully buffered body
    pub fn from_parts(parts: &Parts, body: Vec<u8>) -> Self {
        let mut headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in &parts.headers {
            let Ok(value) = value.to_str() else {
                continue;
            };
            headers
                .entry(canonical_header_name(name.as_str()))
                .and_modify(|existing| {
                    existing.push_str(", ");
                    existing.push_str(value);
                })
                .or_insert_with(|| value.to_string());
        }

        let (body, is_base64_encoded) = match String::from_utf8(body) {
            Ok(text) => (text, false),
            Err(e) => (STANDARD.encode(e.into_bytes()), true),
        };

        Self {
            status_code: parts.status.as_u16(),
            headers,
            body,
            is_base64_encoded,
        }
    }
}

/// `mcp-session-id` → `Mcp-Session-Id`
pub fn canonical_header_name(name: &str) -> String {
    name.split('-')
        .map(|segment| {
            let mut chars = segment.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

/// Run one event through the router.
///
/// Streamed bodies are buffered until they end or `stream_window` elapses;
/// a server-push stream cut short this way closes its session.
pub async fn invoke(
    app: Router,
    event: GatewayEvent,
    stream_window: Duration,
) -> Result<GatewayResponse, HostingError> {
    let request = event.into_request()?;
    let response = app
        .oneshot(request)
        .await
        .unwrap_or_else(|never| match never {});

    let (parts, body) = response.into_parts();
    let body = collect_body(body, stream_window).await?;
    Ok(GatewayResponse::from_parts(&parts, body))
}

async fn collect_body(mut body: Body, window: Duration) -> Result<Vec<u8>, HostingError> {
    let deadline = tokio::time::Instant::now() + window;
    let mut buf = Vec::new();

    loop {
        match tokio::time::timeout_at(deadline, body.frame()).await {
            Err(_) => {
                tracing::debug!(bytes = buf.len(), "stream window elapsed");
                break;
            }
            Ok(None) => break,
            Ok(Some(Err(e))) => {
                return Err(HostingError::Body {
                    message: e.to_string(),
                })
            }
            Ok(Some(Ok(frame))) => {
                if let Ok(data) = frame.into_data() {
                    buf.extend_from_slice(&data);
                }
            }
        }
    }

    Ok(buf)
}

/// One invocation fetched from the runtime API
#[derive(Debug)]
pub struct Invocation {
    pub request_id: String,
    pub payload: Value,
}

/// Client for the function runtime API
pub struct RuntimeClient {
    http: reqwest::Client,
    base_url: String,
}

impl RuntimeClient {
    pub fn new(runtime_api: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: format!("http://{}/{}/runtime", runtime_api, RUNTIME_API_VERSION),
        }
    }

    /// Block until the next invocation arrives
    pub async fn next_invocation(&self) -> Result<Invocation, HostingError> {
        let response = self
            .http
            .get(format!("{}/invocation/next", self.base_url))
            .send()
            .await?
            .error_for_status()?;

        let request_id = response
            .headers()
            .get(REQUEST_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(HostingError::MissingRequestId)?;

        let payload = response.json().await?;
        Ok(Invocation {
            request_id,
            payload,
        })
    }

    pub async fn send_response(
        &self,
        request_id: &str,
        response: &GatewayResponse,
    ) -> Result<(), HostingError> {
        self.http
            .post(format!("{}/invocation/{}/response", self.base_url, request_id))
            .json(response)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }

    pub async fn send_error(&self, request_id: &str, error: &HostingError) -> Result<(), HostingError> {
        self.http
            .post(format!("{}/invocation/{}/error", self.base_url, request_id))
            .json(&json!({
                "errorMessage": error.to_string(),
                "errorType": "InvocationError",
            }))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Serve invocations until `shutdown` resolves
pub async fn run<F>(
    app: Router,
    runtime_api: &str,
    stream_window: Duration,
    shutdown: F,
) -> Result<(), HostingError>
where
    F: Future<Output = ()>,
{
    let client = RuntimeClient::new(runtime_api);
    tokio::pin!(shutdown);

    tracing::info!(runtime_api, "function runtime loop started");

    loop {
        let invocation = tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("function runtime loop stopped");
                return Ok(());
            }
            next = client.next_invocation() => next?,
        };

        let outcome = match serde_json::from_value::<GatewayEvent>(invocation.payload) {
            Ok(event) => invoke(app.clone(), event, stream_window).await,
            Err(e) => Err(invalid_event(e.to_string())),
        };

        match outcome {
            Ok(response) => {
                tracing::debug!(request_id = %invocation.request_id, status = response.status_code, "invocation done");
                client.send_response(&invocation.request_id, &response).await?;
            }
            Err(e) => {
                tracing::error!(request_id = %invocation.request_id, error = %e, "invocation failed");
                client.send_error(&invocation.request_id, &e).await?;
            }
        }
    }
}

fn invalid_event(message: impl Into<String>) -> HostingError {
    HostingError::InvalidEvent {
        message: message.into(),
    }
}

fn header_name(name: &str) -> Result<HeaderName, HostingError> {
    HeaderName::from_bytes(name.as_bytes())
        .map_err(|_| invalid_event(format!("invalid header name {:?}", name)))
}

fn header_value(value: &str) -> Result<HeaderValue, HostingError> {
    HeaderValue::from_str(value).map_err(|_| invalid_event(format!("invalid header value {:?}", value)))
}

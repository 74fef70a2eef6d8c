//! `/mcp` handlers

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::StreamExt;
use serde_json::Value;

use super::{AppState, SESSION_HEADER};
use crate::config::SessionMode;
use crate::error::SessionError;
use crate::session::{EventStream, Routed, SessionRequest, TransportResponse};

/// POST /mcp
pub(super) async fn post_message(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let body: Value = match serde_json::from_slice(&body) {
        Ok(value) => value,
        Err(e) => return unparsable_body(&state, &headers, e).into_response(),
    };

    respond(&state, &headers, SessionRequest::Post(body)).await
}

/// GET /mcp
pub(super) async fn open_stream(State(state): State<AppState>, headers: HeaderMap) -> Response {
    respond(&state, &headers, SessionRequest::OpenStream).await
}

/// DELETE /mcp
pub(super) async fn terminate(State(state): State<AppState>, headers: HeaderMap) -> Response {
    respond(&state, &headers, SessionRequest::Terminate).await
}

/// OPTIONS short-circuits with an empty 200
pub(super) async fn preflight() -> StatusCode {
    StatusCode::OK
}

/// Unrouted paths: OPTIONS still gets an empty 200, anything else 404
pub(super) async fn fallback(method: Method) -> StatusCode {
    if method == Method::OPTIONS {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    }
}

/// A session-less stateful POST must be an initialize request
fn unparsable_body(state: &AppState, headers: &HeaderMap, error: serde_json::Error) -> SessionError {
    let has_session = session_header(headers).is_some();
    match state.sessions().mode() {
        SessionMode::Stateful if !has_session => {
            SessionError::invalid_initialize(format!("No valid session ID provided: {}", error))
        }
        _ => SessionError::ParseError {
            message: error.to_string(),
        },
    }
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(&SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

async fn respond(state: &AppState, headers: &HeaderMap, request: SessionRequest) -> Response {
    match state.sessions().route(session_header(headers), request).await {
        Ok(routed) => into_http_response(routed, state.config().sse_keep_alive),
        Err(e) => e.into_response(),
    }
}

fn into_http_response(routed: Routed, keep_alive: Duration) -> Response {
    let mut response = match routed.response {
        TransportResponse::Json(body) => Json(body).into_response(),
        TransportResponse::Accepted => StatusCode::ACCEPTED.into_response(),
        TransportResponse::Terminated => StatusCode::OK.into_response(),
        TransportResponse::Stream(stream) => sse_response(stream, keep_alive),
    };

    if let Some(session_id) = routed.session_id {
        if let Ok(value) = HeaderValue::from_str(&session_id.to_string()) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    response
}

fn sse_response(stream: EventStream, keep_alive: Duration) -> Response {
    let events = async_stream::stream! {
        let mut stream = stream;
        while let Some(event) = stream.next().await {
            yield Ok::<_, Infallible>(
                Event::default()
                    .event("message")
                    .id(event.id.to_string())
                    .data(event.data),
            );
        }
    };

    Sse::new(events)
        .keep_alive(KeepAlive::new().interval(keep_alive))
        .into_response()
}

//! Axum route table (spec §4.1 step 3 / §6). Grounded on this crate's own
//! route-table-construction style (`Router::new().route(...)` chains layered
//! with `with_state`), narrowed from the teacher's large provider/admin/OAuth
//! route set down to the handful spec §4.1 names: the path-prefixed upstream
//! route, the three literal OpenAI-compat paths, and `/health`.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{ConnectInfo, Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get, post};
use axum::Router;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use gproxy_core::{dispatch, probe, DispatchOutcome, GatewayState, IncomingRequest, ProxyError, Route};

pub fn proxy_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/v1/chat/completions", post(compat_chat))
        .route("/v1/embeddings", post(compat_embeddings))
        .route("/{host}/{*path}", any(upstream))
        .with_state(state)
}

fn response_from_outcome(outcome: DispatchOutcome) -> Response {
    match outcome {
        DispatchOutcome::Buffered { status, headers, body } => {
            let mut response = Response::new(Body::from(body));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
        DispatchOutcome::Streamed { status, headers, receiver } => {
            let stream = ReceiverStream::new(receiver).map(Ok::<_, std::convert::Infallible>);
            let mut response = Response::new(Body::from_stream(stream));
            *response.status_mut() = status;
            *response.headers_mut() = headers;
            response
        }
    }
}

async fn health(State(state): State<Arc<GatewayState>>, req: axum::extract::Request) -> Response {
    let incoming = match incoming_request(req, None).await {
        Ok(incoming) => incoming,
        Err(err) => return body_too_large_response(err),
    };
    response_from_outcome(dispatch(&state, Route::Health, incoming).await)
}

async fn compat_chat(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
) -> Response {
    let incoming = match incoming_request(req, Some(addr)).await {
        Ok(incoming) => incoming,
        Err(err) => return body_too_large_response(err),
    };
    response_from_outcome(dispatch(&state, Route::CompatChat, incoming).await)
}

async fn compat_embeddings(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    req: axum::extract::Request,
) -> Response {
    let incoming = match incoming_request(req, Some(addr)).await {
        Ok(incoming) => incoming,
        Err(err) => return body_too_large_response(err),
    };
    response_from_outcome(dispatch(&state, Route::CompatEmbeddings, incoming).await)
}

async fn upstream(
    State(state): State<Arc<GatewayState>>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    Path((host, path)): Path<(String, String)>,
    req: axum::extract::Request,
) -> Response {
    let incoming = match incoming_request(req, Some(addr)).await {
        Ok(incoming) => incoming,
        Err(err) => return body_too_large_response(err),
    };
    let route = Route::Upstream {
        host,
        upstream_path: path,
    };
    response_from_outcome(dispatch(&state, route, incoming).await)
}

fn body_too_large_response(err: ProxyError) -> Response {
    let mut response = Response::new(Body::from(err.body));
    *response.status_mut() = err.status;
    response
}

/// Buffers the request body into `IncomingRequest`, capped at
/// `probe::MAX_BODY_BYTES` so a client that omits `Content-Length` and
/// streams an oversized body can't bypass the probe filter's size check by
/// exhausting memory before `dispatch` ever runs.
async fn incoming_request(
    req: axum::extract::Request,
    peer_addr: Option<SocketAddr>,
) -> Result<IncomingRequest, ProxyError> {
    let (parts, body) = req.into_parts();
    let body = axum::body::to_bytes(body, probe::MAX_BODY_BYTES as usize)
        .await
        .map_err(|_| ProxyError::payload_too_large(ProxyError::json_body("request body too large", "invalid_request_error")))?;
    Ok(IncomingRequest {
        method: parts.method,
        headers: parts.headers,
        body,
        peer_addr: peer_addr.map(|addr| addr.ip().to_string()),
    })
}

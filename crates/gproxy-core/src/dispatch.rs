//! Ties probe filter, registry, auth translator, transcoder, forwarder and
//! recorder together into the one request pipeline spec §4.1 describes.
//! Grounded on `gproxy-core/src/core.rs`'s `CoreState`/`Core` shape (kept
//! as `GatewayState`/the `dispatch` entry point here) and
//! `gproxy-router/src/proxy.rs`'s route-table style, which is mirrored by
//! the router crate that calls into this module.

use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use gproxy_common::{AuthScheme, GatewayConfig, ProbeFilterConfig};
use gproxy_protocol::gemini::content::GenerateContentResponse;
use gproxy_protocol::openai::chat::{ChatCompletionRequest, ChatCompletionResponse};
use gproxy_protocol::{SseEvent, SseParser};
use gproxy_storage::InteractionStorage;
use gproxy_transform::generate_content::gemini_to_openai::{self, GeminiToOpenAiStreamState};
use gproxy_transform::generate_content::openai_to_gemini;
use http::{HeaderMap, Method, StatusCode};
use serde_json::Value;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::auth;
use crate::error::ProxyError;
use crate::forwarder::{self, ForwardRequest, ForwardedBody, Forwarder, TeeOutcome};
use crate::probe::{self, ProbeCounter};
use crate::recorder::{self, RequestShape};
use crate::registry::{self, Registry};

/// Shared, immutable process state the router hands to every request.
/// Mirrors the teacher's `CoreState`, narrowed to what this gateway needs:
/// no per-provider lookup closure, no auth snapshot (auth is outbound-only
/// here), no proxy resolver (this gateway dials upstreams directly).
pub struct GatewayState {
    pub registry: Registry,
    pub probe_config: ProbeFilterConfig,
    pub probe_counter: ProbeCounter,
    pub forwarder: Forwarder,
    pub storage: InteractionStorage,
    pub default_upstream: Option<String>,
}

impl GatewayState {
    pub fn new(config: &GatewayConfig, storage: InteractionStorage, forwarder: Forwarder) -> Self {
        Self {
            registry: registry::build(config.registry.clone()),
            probe_config: config.probe.clone(),
            probe_counter: ProbeCounter::default(),
            forwarder,
            storage,
            default_upstream: config.default_upstream.clone(),
        }
    }
}

/// What the router extracted from the incoming HTTP request before handing
/// it to `dispatch`.
pub struct IncomingRequest {
    pub method: Method,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub peer_addr: Option<String>,
}

/// The three ways a request can be parsed per spec §4.1 step 3.
pub enum Route {
    /// `/{host}/{*upstream_path}`, `host` already percent-decoded by the
    /// router's path extractor.
    Upstream { host: String, upstream_path: String },
    CompatChat,
    CompatEmbeddings,
    Health,
}

pub enum DispatchOutcome {
    Buffered {
        status: StatusCode,
        headers: HeaderMap,
        body: Bytes,
    },
    Streamed {
        status: StatusCode,
        headers: HeaderMap,
        receiver: mpsc::Receiver<Bytes>,
    },
}

fn error_outcome(err: ProxyError) -> DispatchOutcome {
    DispatchOutcome::Buffered {
        status: err.status,
        headers: HeaderMap::new(),
        body: err.body,
    }
}

fn json_outcome(status: StatusCode, value: Value) -> DispatchOutcome {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("application/json"),
    );
    DispatchOutcome::Buffered {
        status,
        headers,
        body: Bytes::from(value.to_string()),
    }
}

fn route_path(route: &Route) -> String {
    match route {
        Route::Upstream { host, upstream_path } => format!("/{host}/{upstream_path}"),
        Route::CompatChat => "/v1/chat/completions".to_string(),
        Route::CompatEmbeddings => "/v1/embeddings".to_string(),
        Route::Health => "/health".to_string(),
    }
}

fn now_rfc3339() -> String {
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    humantime_epoch(secs)
}

/// Minimal `YYYY-MM-DDTHH:MM:SSZ` formatter so this crate doesn't need a
/// dedicated time-formatting dependency for one timestamp column.
fn humantime_epoch(secs: u64) -> String {
    let days = secs / 86_400;
    let rem = secs % 86_400;
    let (hour, minute, second) = (rem / 3600, (rem % 3600) / 60, rem % 60);
    let (year, month, day) = civil_from_days(days as i64);
    format!("{year:04}-{month:02}-{day:02}T{hour:02}:{minute:02}:{second:02}Z")
}

/// Howard Hinnant's days-from-civil algorithm, inverted; avoids pulling in a
/// chrono/time dependency purely to stamp `created_at`.
fn civil_from_days(z: i64) -> (i64, u32, u32) {
    let z = z + 719_468;
    let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
    let doe = (z - era * 146_097) as u64;
    let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146_096) / 365;
    let y = yoe as i64 + era * 400;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
    let y = if m <= 2 { y + 1 } else { y };
    (y, m, d)
}

/// Entry point: runs the probe filter, then dispatches to the matched route.
pub async fn dispatch(state: &GatewayState, route: Route, req: IncomingRequest) -> DispatchOutcome {
    let content_length = req
        .headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .or(Some(req.body.len() as u64));

    if let Err(err) = probe::check(
        &state.probe_config,
        &state.probe_counter,
        &req.method,
        &route_path(&route),
        &req.headers,
        req.peer_addr.as_deref(),
        content_length,
    ) {
        return error_outcome(err);
    }

    match route {
        Route::Health => json_outcome(StatusCode::OK, serde_json::json!({ "status": "ok" })),
        Route::CompatChat => dispatch_compat(state, req, CompatKind::Chat).await,
        Route::CompatEmbeddings => dispatch_compat(state, req, CompatKind::Embeddings).await,
        Route::Upstream { host, upstream_path } => dispatch_upstream(state, host, upstream_path, req).await,
    }
}

enum CompatKind {
    Chat,
    Embeddings,
}

/// Resolves the OpenAI-compat facade's upstream by the `model` field's
/// pattern: `gemini-*` -> Google, else -> the configured default upstream.
/// A request with no configured default and a non-Gemini model is a 400
/// (Open Question 1; see DESIGN.md).
async fn dispatch_compat(state: &GatewayState, req: IncomingRequest, kind: CompatKind) -> DispatchOutcome {
    let body: Value = match serde_json::from_slice(&req.body) {
        Ok(value) => value,
        Err(_) => return error_outcome(ProxyError::bad_request(ProxyError::json_body("invalid JSON body", "invalid_request_error"))),
    };
    let model = body.get("model").and_then(Value::as_str).unwrap_or("");

    let host = if model.starts_with("gemini-") {
        "generativelanguage.googleapis.com".to_string()
    } else {
        match &state.default_upstream {
            Some(host) => host.clone(),
            None => {
                return error_outcome(ProxyError::bad_request(ProxyError::json_body(
                    "no default upstream configured for this model",
                    "invalid_request_error",
                )))
            }
        }
    };

    let upstream_path = match kind {
        CompatKind::Chat => "v1/chat/completions".to_string(),
        CompatKind::Embeddings => "v1/embeddings".to_string(),
    };

    dispatch_upstream(state, host, upstream_path, req).await
}

async fn dispatch_upstream(
    state: &GatewayState,
    host: String,
    upstream_path: String,
    req: IncomingRequest,
) -> DispatchOutcome {
    let Some(entry) = registry::lookup(&state.registry, &host).copied() else {
        return error_outcome(ProxyError::forbidden("upstream not allowed"));
    };
    let auth_scheme = entry
        .auth_scheme
        .unwrap_or_else(|| AuthScheme::infer_from_path(&upstream_path));

    if auth::extract_token(&req.headers).is_empty() {
        return error_outcome(ProxyError::forbidden("missing credential"));
    }

    let translated = auth::translate(auth_scheme, &req.headers);

    // Step 7: transcode forward only when the upstream is Google and the
    // body parses as an OpenAI chat-completion request.
    let openai_request: Option<ChatCompletionRequest> = if matches!(auth_scheme, AuthScheme::Google) {
        serde_json::from_slice(&req.body).ok()
    } else {
        None
    };

    let scheme_str = entry.scheme.as_str();
    let (url, outbound_body, is_stream) = match (&auth_scheme, &openai_request) {
        (AuthScheme::Google, Some(parsed)) => {
            let transcoded = openai_to_gemini::transform_request(parsed);
            let body = serde_json::to_vec(&transcoded.body).unwrap_or_default();
            let url = format!("{scheme_str}://{host}/v1beta/{}", transcoded.path_suffix);
            (url, body, transcoded.is_stream)
        }
        _ => {
            let url = format!("{scheme_str}://{host}/{}", upstream_path.trim_start_matches('/'));
            let stream = looks_like_stream(&req.body, &upstream_path);
            (url, req.body.to_vec(), stream)
        }
    };

    let url = match &translated.query_suffix {
        Some(suffix) => forwarder::append_query(&url, suffix),
        None => url,
    };

    let forward_req = ForwardRequest {
        method: req.method.clone(),
        url,
        headers: translated.headers,
        body: Bytes::from(outbound_body),
        is_stream,
    };

    let raw_request = String::from_utf8_lossy(&req.body).to_string();
    let model = openai_request
        .as_ref()
        .map(|r| r.model.clone())
        .or_else(|| extract_model_field(&req.body));

    let started_at = std::time::Instant::now();
    tracing::info!(
        event = "upstream_dispatched",
        provider = %host,
        model = ?model,
        method = %req.method,
        is_stream,
    );

    // Only a compat-facade call to Google ever needs its response transcoded
    // back to the OpenAI shape before it reaches the client; a raw path call
    // to Google is passed through untouched, same as any other upstream.
    let transcode_response = matches!(auth_scheme, AuthScheme::Google) && openai_request.is_some();

    match state.forwarder.send(forward_req).await {
        Err(err) => {
            tracing::warn!(
                event = "upstream_failed",
                provider = %host,
                status = err.status.as_u16(),
                elapsed_ms = started_at.elapsed().as_millis() as u64,
            );
            error_outcome(err)
        }
        Ok(resp) => match resp.body {
            ForwardedBody::Complete(body) => {
                tracing::info!(
                    event = "upstream_responded",
                    provider = %host,
                    status = resp.status.as_u16(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    is_stream = false,
                );
                if transcode_response {
                    let request = openai_request
                        .as_ref()
                        .expect("transcode_response implies openai_request is Some");
                    let synthetic = serde_json::from_slice::<GenerateContentResponse>(&body)
                        .ok()
                        .map(|parsed| gemini_to_openai::transform_response(&parsed, &request.model, chat_completion_id(), now_epoch_secs()));
                    let out_body = synthetic
                        .as_ref()
                        .and_then(|value| serde_json::to_vec(value).ok())
                        .map(Bytes::from)
                        .unwrap_or_else(|| body.clone());
                    let headers = if synthetic.is_some() {
                        json_headers()
                    } else {
                        resp.headers
                    };
                    record_complete(
                        state,
                        &host,
                        auth_scheme,
                        model,
                        openai_request.as_ref(),
                        synthetic.as_ref(),
                        &raw_request,
                        &body,
                        false,
                    );
                    DispatchOutcome::Buffered {
                        status: resp.status,
                        headers,
                        body: out_body,
                    }
                } else {
                    record_complete(
                        state,
                        &host,
                        auth_scheme,
                        model,
                        openai_request.as_ref(),
                        None,
                        &raw_request,
                        &body,
                        false,
                    );
                    DispatchOutcome::Buffered {
                        status: resp.status,
                        headers: resp.headers,
                        body,
                    }
                }
            }
            ForwardedBody::Streamed { receiver, tee } => {
                tracing::info!(
                    event = "upstream_responded",
                    provider = %host,
                    status = resp.status.as_u16(),
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    is_stream = true,
                );
                if transcode_response {
                    // The raw tee'd copy is redundant here: the transcoder
                    // below is the sole consumer of `receiver` and records
                    // the same synthetic response it streams to the client.
                    drop(tee);
                    let request = openai_request.expect("transcode_response implies openai_request is Some");
                    let out_receiver =
                        spawn_gemini_stream_transcoder(state.storage.clone(), host, model, request, raw_request, receiver);
                    DispatchOutcome::Streamed {
                        status: resp.status,
                        headers: event_stream_headers(),
                        receiver: out_receiver,
                    }
                } else {
                    spawn_stream_recorder(
                        state.storage.clone(),
                        host,
                        auth_scheme,
                        model,
                        openai_request,
                        raw_request,
                        tee,
                    );
                    DispatchOutcome::Streamed {
                        status: resp.status,
                        headers: resp.headers,
                        receiver,
                    }
                }
            }
        },
    }
}

fn json_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("application/json"));
    headers
}

fn event_stream_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::CONTENT_TYPE, http::HeaderValue::from_static("text/event-stream"));
    headers
}

fn chat_completion_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

fn now_epoch_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Drives the upstream Google SSE stream through `GeminiToOpenAiStreamState`
/// so the client sees OpenAI `chat.completion.chunk` frames, and records the
/// same transcoded state once the stream ends instead of re-deriving it from
/// a second, independently tee'd copy of the raw bytes.
fn spawn_gemini_stream_transcoder(
    storage: InteractionStorage,
    host: String,
    model: Option<String>,
    request: ChatCompletionRequest,
    raw_request: String,
    mut receiver: mpsc::Receiver<Bytes>,
) -> mpsc::Receiver<Bytes> {
    let (tx, out_rx) = mpsc::channel(16);
    tokio::spawn(async move {
        let id = chat_completion_id();
        let created = now_epoch_secs();
        let mut stream_state = GeminiToOpenAiStreamState::new(id.clone(), request.model.clone(), created);
        let mut parser = SseParser::new();
        let mut raw_frames: Vec<String> = Vec::new();
        let mut last_response: Option<ChatCompletionResponse> = None;
        let mut client_gone = false;

        while let Some(chunk) = receiver.recv().await {
            for event in parser.push_bytes(&chunk) {
                if event.data == "[DONE]" {
                    continue;
                }
                raw_frames.push(event.data.clone());
                let Ok(parsed) = serde_json::from_str::<GenerateContentResponse>(&event.data) else {
                    continue;
                };
                last_response = Some(gemini_to_openai::transform_response(&parsed, &request.model, id.clone(), created));
                if !client_gone {
                    for out_chunk in stream_state.push(&parsed) {
                        let line = format!("data: {}\n\n", serde_json::to_string(&out_chunk).unwrap_or_default());
                        if tx.send(Bytes::from(line)).await.is_err() {
                            client_gone = true;
                        }
                    }
                }
            }
        }
        for event in parser.finish() {
            if event.data == "[DONE]" {
                continue;
            }
            raw_frames.push(event.data.clone());
            let Ok(parsed) = serde_json::from_str::<GenerateContentResponse>(&event.data) else {
                continue;
            };
            last_response = Some(gemini_to_openai::transform_response(&parsed, &request.model, id.clone(), created));
            if !client_gone {
                for out_chunk in stream_state.push(&parsed) {
                    let line = format!("data: {}\n\n", serde_json::to_string(&out_chunk).unwrap_or_default());
                    if tx.send(Bytes::from(line)).await.is_err() {
                        client_gone = true;
                    }
                }
            }
        }
        if !client_gone {
            let _ = tx.send(Bytes::from_static(b"data: [DONE]\n\n")).await;
        }

        let raw_response = raw_frames.join("\n");
        let record = recorder::build_record(
            now_rfc3339(),
            model,
            host,
            "google".to_string(),
            RequestShape::OpenAiChat {
                request: &request,
                response: last_response.as_ref(),
            },
            raw_request,
            raw_response,
            false,
        );
        storage.record(record);
    });
    out_rx
}

/// spec §3's `is_streaming`: an explicit `"stream": true` body field, or a
/// raw path-prefixed call to Google's `:streamGenerateContent` method (which
/// carries no such field of its own).
fn looks_like_stream(body: &[u8], upstream_path: &str) -> bool {
    if upstream_path.contains("streamGenerateContent") {
        return true;
    }
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("stream").and_then(Value::as_bool))
        .unwrap_or(false)
}

fn extract_model_field(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()
        .and_then(|v| v.get("model").and_then(Value::as_str).map(str::to_string))
}

#[allow(clippy::too_many_arguments)]
fn record_complete(
    state: &GatewayState,
    host: &str,
    auth_scheme: AuthScheme,
    model: Option<String>,
    openai_request: Option<&ChatCompletionRequest>,
    google_synthetic: Option<&ChatCompletionResponse>,
    raw_request: &str,
    raw_response: &Bytes,
    truncated: bool,
) {
    let raw_response_str = String::from_utf8_lossy(raw_response).to_string();
    let record = build_record_for(
        host,
        auth_scheme,
        model,
        openai_request,
        google_synthetic,
        raw_request,
        &raw_response_str,
        truncated,
    );
    state.storage.record(record);
}

/// Builds the canonical record for a single, complete (request, response)
/// pair. For Google, `google_synthetic` is the same OpenAI-shaped response
/// already computed for the client in `dispatch_upstream`, passed through
/// rather than re-parsed from `raw_response`.
#[allow(clippy::too_many_arguments)]
fn build_record_for(
    host: &str,
    auth_scheme: AuthScheme,
    model: Option<String>,
    openai_request: Option<&ChatCompletionRequest>,
    google_synthetic: Option<&ChatCompletionResponse>,
    raw_request: &str,
    raw_response: &str,
    truncated: bool,
) -> gproxy_storage::InteractionRecord {
    let source_provider = host.to_string();
    let scheme_label = match auth_scheme {
        AuthScheme::OpenAi => "openai",
        AuthScheme::Anthropic => "anthropic",
        AuthScheme::Google => "google",
    }
    .to_string();

    // Each branch owns whatever it parses for the lifetime of the
    // `build_record` call, then returns immediately: a `RequestShape`
    // borrows from locals that would otherwise not outlive one shared match
    // expression.
    match (auth_scheme, openai_request) {
        (AuthScheme::Google, Some(request)) => recorder::build_record(
            now_rfc3339(),
            model,
            source_provider,
            scheme_label,
            RequestShape::OpenAiChat {
                request,
                response: google_synthetic,
            },
            raw_request.to_string(),
            raw_response.to_string(),
            truncated,
        ),
        (AuthScheme::OpenAi, _) => {
            let request_parsed: Option<ChatCompletionRequest> = serde_json::from_str(raw_request).ok();
            let response_parsed: Option<ChatCompletionResponse> = serde_json::from_str(raw_response).ok();
            let shape = match &request_parsed {
                Some(request) => RequestShape::OpenAiChat {
                    request,
                    response: response_parsed.as_ref(),
                },
                None => RequestShape::Other,
            };
            recorder::build_record(
                now_rfc3339(),
                model,
                source_provider,
                scheme_label,
                shape,
                raw_request.to_string(),
                raw_response.to_string(),
                truncated,
            )
        }
        (AuthScheme::Anthropic, _) => {
            let request_json: Value = serde_json::from_str(raw_request).unwrap_or(Value::Null);
            let response_json: Value = serde_json::from_str(raw_response).unwrap_or(Value::Null);
            recorder::build_record(
                now_rfc3339(),
                model,
                source_provider,
                scheme_label,
                RequestShape::AnthropicMessages {
                    request_json: &request_json,
                    response_json: &response_json,
                },
                raw_request.to_string(),
                raw_response.to_string(),
                truncated,
            )
        }
        _ => recorder::build_record(
            now_rfc3339(),
            model,
            source_provider,
            scheme_label,
            RequestShape::Other,
            raw_request.to_string(),
            raw_response.to_string(),
            truncated,
        ),
    }
}

/// Streaming responses can't be recorded until the tee buffer finishes, and
/// recording must never delay the client's bytes (spec §4.1 step 9), so this
/// runs as a detached task that wakes up once `tee` resolves.
fn spawn_stream_recorder(
    storage: InteractionStorage,
    host: String,
    auth_scheme: AuthScheme,
    model: Option<String>,
    openai_request: Option<ChatCompletionRequest>,
    raw_request: String,
    tee: tokio::sync::oneshot::Receiver<TeeOutcome>,
) {
    tokio::spawn(async move {
        let outcome = match tee.await {
            Ok(outcome) => outcome,
            Err(_) => return,
        };
        let (body, truncated) = match outcome {
            TeeOutcome::Cancelled => return,
            TeeOutcome::Complete { body, truncated } => (body, truncated),
        };

        let frames = collect_sse_frames(&body);
        let raw_response = frames.join("\n");

        // Google streaming with a parsed compat request is handled entirely
        // by `spawn_gemini_stream_transcoder` instead; this task only ever
        // sees Google here for raw (non-compat) path calls, which have no
        // OpenAI shape to record.
        let record = match (auth_scheme, &openai_request) {
            (AuthScheme::OpenAi, _) => {
                let request_parsed: Option<ChatCompletionRequest> = serde_json::from_str(&raw_request).ok();
                let synthetic = accumulate_openai_stream(&frames);
                match &request_parsed {
                    Some(request) => recorder::build_record(
                        now_rfc3339(),
                        model,
                        host,
                        "openai".to_string(),
                        RequestShape::OpenAiChat {
                            request,
                            response: synthetic.as_ref(),
                        },
                        raw_request,
                        raw_response,
                        truncated,
                    ),
                    None => recorder::build_record(
                        now_rfc3339(),
                        model,
                        host,
                        "openai".to_string(),
                        RequestShape::Other,
                        raw_request,
                        raw_response,
                        truncated,
                    ),
                }
            }
            _ => {
                let scheme_label = match auth_scheme {
                    AuthScheme::OpenAi => "openai",
                    AuthScheme::Anthropic => "anthropic",
                    AuthScheme::Google => "google",
                }
                .to_string();
                recorder::build_record(
                    now_rfc3339(),
                    model,
                    host,
                    scheme_label,
                    RequestShape::Other,
                    raw_request,
                    raw_response,
                    truncated,
                )
            }
        };

        storage.record(record);
    });
}

fn collect_sse_frames(body: &Bytes) -> Vec<String> {
    let mut parser = SseParser::new();
    let mut events: Vec<SseEvent> = parser.push_bytes(body);
    events.extend(parser.finish());
    events
        .into_iter()
        .map(|e| e.data)
        .filter(|data| data != "[DONE]")
        .collect()
}

/// OpenAI streams send incremental deltas, unlike Google's cumulative
/// frames, so the final record has to be rebuilt by concatenation.
fn accumulate_openai_stream(frames: &[String]) -> Option<ChatCompletionResponse> {
    use gproxy_protocol::openai::chat::{ChatCompletionChunk, Choice, FinishReason, ResponseMessage};

    let mut id = String::new();
    let mut model = String::new();
    let mut created = 0_i64;
    let mut content = String::new();
    let mut finish_reason = None;

    for frame in frames {
        let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(frame) else {
            continue;
        };
        id = chunk.id;
        model = chunk.model;
        created = chunk.created;
        if let Some(choice) = chunk.choices.into_iter().next() {
            if let Some(text) = choice.delta.content {
                content.push_str(&text);
            }
            if choice.finish_reason.is_some() {
                finish_reason = choice.finish_reason;
            }
        }
    }

    if id.is_empty() {
        return None;
    }

    Some(ChatCompletionResponse {
        id,
        object: "chat.completion".to_string(),
        created,
        model,
        choices: vec![Choice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: Some(content),
                tool_calls: None,
            },
            finish_reason: finish_reason.or(Some(FinishReason::Stop)),
        }],
        usage: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_path_formats_upstream_route() {
        let route = Route::Upstream {
            host: "api.openai.com".to_string(),
            upstream_path: "v1/chat/completions".to_string(),
        };
        assert_eq!(route_path(&route), "/api.openai.com/v1/chat/completions");
    }

    #[test]
    fn looks_like_stream_reads_stream_field() {
        assert!(looks_like_stream(br#"{"stream":true}"#, "v1/chat/completions"));
        assert!(!looks_like_stream(br#"{"stream":false}"#, "v1/chat/completions"));
        assert!(!looks_like_stream(br#"{}"#, "v1/chat/completions"));
    }

    #[test]
    fn looks_like_stream_detects_gemini_stream_method_with_no_body_field() {
        let path = "v1beta/models/gemini-2.0-flash-exp:streamGenerateContent?alt=sse";
        assert!(looks_like_stream(br#"{}"#, path));
    }

    #[test]
    fn civil_date_formats_a_known_epoch_second() {
        // 2024-01-01T00:00:00Z
        assert_eq!(humantime_epoch(1_704_067_200), "2024-01-01T00:00:00Z");
    }

    #[test]
    fn accumulate_openai_stream_concatenates_deltas() {
        let frames = vec![
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"role":"assistant"}}]}"#.to_string(),
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"content":"he"}}]}"#.to_string(),
            r#"{"id":"c1","object":"chat.completion.chunk","created":1,"model":"m","choices":[{"index":0,"delta":{"content":"llo"},"finish_reason":"stop"}]}"#.to_string(),
        ];
        let response = accumulate_openai_stream(&frames).unwrap();
        assert_eq!(response.choices[0].message.content.as_deref(), Some("hello"));
    }
}

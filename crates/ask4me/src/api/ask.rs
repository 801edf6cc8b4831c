// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `/v1/ask`: the programmatic long-poll / streaming endpoint (spec §4.F).
//!
//! The streaming branch follows the same create → stream lifecycle
//! events → terminate-on-terminal-event shape as
//! `other_examples`'s `routes/interaction.rs` (the same human-in-the-loop
//! SSE pattern), built on axum's own `sse::{Sse, Event}` rather than a
//! hand-rolled writer since axum (already the teacher's framework) ships
//! it natively. Replay is driven by `futures_util::stream::unfold` over
//! an explicit phase state machine, not `async-stream` — `unfold` is
//! already a workspace dependency and keeps the phase transitions
//! (replay → live subscribe → done) as ordinary owned state instead of a
//! generator macro.

use std::collections::{HashSet, VecDeque};
use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::http::{HeaderName, HeaderValue, Method, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::json;

use crate::api::auth;
use crate::engine::{self, QuestionInput, WireEvent};
use crate::error::AskError;
use crate::hub::Hub;
use crate::state::AppState;

const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-ask4me-request-id");

#[derive(Debug, Deserialize, Default)]
pub struct AskQuery {
    pub request_id: Option<String>,
    pub stream: Option<String>,
    pub last_event_id: Option<String>,
    pub key: Option<String>,
    pub title: Option<String>,
    pub body: Option<String>,
    pub mcd: Option<String>,
    pub expires_in_seconds: Option<i64>,
}

#[derive(Debug, Deserialize, Default)]
struct AskBody {
    title: Option<String>,
    body: Option<String>,
    mcd: Option<String>,
    expires_in_seconds: Option<i64>,
}

fn parse_stream_flag(value: Option<&str>) -> bool {
    matches!(
        value.map(str::to_ascii_lowercase).as_deref(),
        Some("1") | Some("t") | Some("true") | Some("y") | Some("yes") | Some("on")
    )
}

pub async fn ask_get(
    State(state): State<AppState>,
    method: Method,
    headers: axum::http::HeaderMap,
    Query(query): Query<AskQuery>,
) -> Response {
    handle_ask(state, method, headers, query, None).await
}

pub async fn ask_post(
    State(state): State<AppState>,
    method: Method,
    headers: axum::http::HeaderMap,
    Query(query): Query<AskQuery>,
    body: Bytes,
) -> Response {
    handle_ask(state, method, headers, query, Some(body)).await
}

async fn handle_ask(
    state: AppState,
    method: Method,
    headers: axum::http::HeaderMap,
    query: AskQuery,
    body_bytes: Option<Bytes>,
) -> Response {
    if let Err(err) = auth::require_api_key(&state.config, &method, &headers, query.key.as_deref()) {
        return err.into_response();
    }

    let question_input = match body_bytes {
        Some(bytes) if !bytes.is_empty() => match serde_json::from_slice::<AskBody>(&bytes) {
            Ok(parsed) => QuestionInput {
                title: parsed.title,
                body: parsed.body,
                mcd: parsed.mcd,
                expires_in_seconds: parsed.expires_in_seconds,
            },
            Err(_) => return AskError::BadRequest.into_response(),
        },
        Some(_) => QuestionInput::default(),
        None => QuestionInput {
            title: query.title.clone(),
            body: query.body.clone(),
            mcd: query.mcd.clone(),
            expires_in_seconds: query.expires_in_seconds,
        },
    };
    let question = question_input.has_any_field().then_some(question_input);

    let outcome =
        match engine::create_or_join(&state.store, &state.hub, &state.config, query.request_id.clone(), question).await {
            Ok(outcome) => outcome,
            Err(err) => return err.into_response(),
        };
    let request_id = outcome.request_id().to_owned();

    if parse_stream_flag(query.stream.as_deref()) {
        stream_response(state, request_id, query.last_event_id.clone()).await
    } else {
        long_poll_response(state, request_id).await
    }
}

fn with_request_id_header(mut response: Response, request_id: &str) -> Response {
    if let Ok(value) = HeaderValue::from_str(request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Wait for the terminal event (hub cache → durable log → fresh
/// subscription, per `engine::wait_for_terminal`) and return the single
/// JSON document the long-poll contract promises (spec §4.F).
async fn long_poll_response(state: AppState, request_id: String) -> Response {
    let Some(event) = engine::wait_for_terminal(&state.store, &state.hub, &request_id).await else {
        return with_request_id_header(AskError::Internal.into_response(), &request_id);
    };

    let wire = event.to_wire();
    let body = json!({
        "request_id": request_id,
        "last_event_type": wire.event_type,
        "last_event_id": wire.id,
        "data": wire.data,
    });
    with_request_id_header((StatusCode::OK, Json(body)).into_response(), &request_id)
}

enum Phase {
    Replay(VecDeque<crate::store::StoredEvent>),
    Live { subscription: crate::hub::Subscription, next_heartbeat: tokio::time::Instant },
    SendDone,
    Finished,
}

struct StreamCtx {
    hub: Hub,
    request_id: String,
    heartbeat_interval: Duration,
    seen: HashSet<String>,
    phase: Phase,
}

fn to_sse_event(wire: &WireEvent) -> Event {
    Event::default().data(serde_json::to_string(wire).unwrap_or_else(|_| "{}".to_owned()))
}

async fn step(mut ctx: StreamCtx) -> Option<(Result<Event, Infallible>, StreamCtx)> {
    loop {
        let phase = std::mem::replace(&mut ctx.phase, Phase::Finished);
        match phase {
            Phase::Replay(mut queue) => match queue.pop_front() {
                Some(stored) => {
                    ctx.seen.insert(stored.event_id.clone());
                    let terminal = engine::is_terminal_type(&stored.event_type);
                    let wire = engine::stored_to_ask_event(stored).to_wire();
                    let sse = to_sse_event(&wire);
                    ctx.phase = if terminal { Phase::SendDone } else { Phase::Replay(queue) };
                    return Some((Ok(sse), ctx));
                }
                None => {
                    let subscription = ctx.hub.subscribe(&ctx.request_id).await;
                    let next_heartbeat = tokio::time::Instant::now() + ctx.heartbeat_interval;
                    ctx.phase = Phase::Live { subscription, next_heartbeat };
                    continue;
                }
            },
            Phase::Live { mut subscription, next_heartbeat } => {
                tokio::select! {
                    received = subscription.receiver.recv() => {
                        match received {
                            Some(event) => {
                                if ctx.seen.contains(&event.event_id) {
                                    ctx.phase = Phase::Live { subscription, next_heartbeat };
                                    continue;
                                }
                                ctx.seen.insert(event.event_id.clone());
                                let terminal = event.is_terminal();
                                let sse = to_sse_event(&event.to_wire());
                                ctx.phase = if terminal {
                                    Phase::SendDone
                                } else {
                                    Phase::Live { subscription, next_heartbeat }
                                };
                                return Some((Ok(sse), ctx));
                            }
                            None => {
                                ctx.phase = Phase::Finished;
                                return None;
                            }
                        }
                    }
                    _ = tokio::time::sleep_until(next_heartbeat) => {
                        let sse = to_sse_event(&engine::heartbeat_event(&ctx.request_id).to_wire());
                        let next_heartbeat = tokio::time::Instant::now() + ctx.heartbeat_interval;
                        ctx.phase = Phase::Live { subscription, next_heartbeat };
                        return Some((Ok(sse), ctx));
                    }
                }
            }
            Phase::SendDone => {
                ctx.phase = Phase::Finished;
                return Some((Ok(Event::default().data("[DONE]")), ctx));
            }
            Phase::Finished => return None,
        }
    }
}

/// Drain durable events after `last_event_id` (or the full history when
/// absent), then subscribe for live events with an `event_id` dedup set
/// over the two sources — the two-source resumption pattern spec §9
/// requires a purely-hub or purely-poll stream would violate.
async fn stream_response(state: AppState, request_id: String, last_event_id: Option<String>) -> Response {
    let replay = match state.store.list_events_after(&request_id, last_event_id.as_deref()).await {
        Ok(events) => events,
        Err(err) => {
            tracing::error!(err = %err, request_id = %request_id, "failed to load replay events for stream");
            return with_request_id_header(AskError::Internal.into_response(), &request_id);
        }
    };

    let ctx = StreamCtx {
        hub: state.hub.clone(),
        request_id: request_id.clone(),
        heartbeat_interval: state.config.sse_heartbeat_interval(),
        seen: HashSet::new(),
        phase: Phase::Replay(VecDeque::from(replay)),
    };

    let stream = futures_util::stream::unfold(ctx, step);
    with_request_id_header(Sse::new(stream).into_response(), &request_id)
}

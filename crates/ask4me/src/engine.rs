// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Lifecycle engine: creates requests, mints tokens, runs the expiry
//! timer, records the one permitted submission, and emits events in
//! canonical order (spec §4.E).
//!
//! Generalizes the teacher's create-or-rejoin-by-id shape
//! (`register_session`, `transport/http.rs`) and its detached-background-task
//! pattern (credential push spawned fire-and-forget after registration
//! returns) to a request whose background work — notification and expiry —
//! must outlive the registering connection entirely, not just the
//! registration call.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::Serialize;
use serde_json::{json, Value};

use crate::config::AskConfig;
use crate::error::AskError;
use crate::hub::Hub;
use crate::ids;
use crate::mcd;
use crate::notifier::{self, NotifyOutcome};
use crate::store::{NewEvent, NewRequest, RequestStatus, Store, StoreError};

/// The three event types that terminate a request's lifecycle (spec §3).
pub const TERMINAL_TYPES: &[&str] = &["user.submitted", "request.expired", "notify.failed"];

pub fn is_terminal_type(event_type: &str) -> bool {
    TERMINAL_TYPES.contains(&event_type)
}

const PLACEHOLDER_TITLE: &str = "Question";
const PLACEHOLDER_BODY: &str = "(no additional details provided)";

const PATH_SEGMENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');
const QUERY_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_').remove(b'.').remove(b'~');

/// An event as it exists in memory: the durable row plus a handle the hub
/// can clone cheaply to every subscriber.
#[derive(Debug, Clone)]
pub struct AskEvent {
    /// Empty for heartbeat events, which are never persisted (spec §3).
    pub event_id: String,
    pub request_id: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

impl AskEvent {
    pub fn is_terminal(&self) -> bool {
        is_terminal_type(&self.event_type)
    }

    fn heartbeat(request_id: &str) -> Self {
        Self {
            event_id: String::new(),
            request_id: request_id.to_owned(),
            event_type: "heartbeat".to_owned(),
            payload: json!({}),
            created_at: Utc::now(),
        }
    }

    /// Render the wire shape. `time` is stamped at serialization, never
    /// the stored `created_at` (spec §3, §6).
    pub fn to_wire(&self) -> WireEvent {
        WireEvent {
            id: self.event_id.clone(),
            event_type: self.event_type.clone(),
            time: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            request_id: self.request_id.clone(),
            data: self.payload.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct WireEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub time: String,
    pub request_id: String,
    pub data: Value,
}

/// Caller-supplied question fields, all optional before normalization.
#[derive(Debug, Clone, Default)]
pub struct QuestionInput {
    pub title: Option<String>,
    pub body: Option<String>,
    pub mcd: Option<String>,
    pub expires_in_seconds: Option<i64>,
}

impl QuestionInput {
    /// A caller-level heuristic for "a question was actually supplied",
    /// distinct from `Option::is_some` at the API layer: any recognized
    /// field present counts, even if its value resolves to a default.
    pub fn has_any_field(&self) -> bool {
        self.title.is_some() || self.body.is_some() || self.mcd.is_some() || self.expires_in_seconds.is_some()
    }
}

struct NormalizedQuestion {
    title: String,
    body: String,
    mcd: String,
    expires_in_seconds: i64,
}

fn normalize_question(question: QuestionInput, default_expires_in_seconds: i64) -> NormalizedQuestion {
    let title = question.title.filter(|s| !s.trim().is_empty()).unwrap_or_else(|| PLACEHOLDER_TITLE.to_owned());
    let body = question.body.unwrap_or_default();
    let mcd = question.mcd.unwrap_or_default();
    let expires_in_seconds = question.expires_in_seconds.filter(|s| *s > 0).unwrap_or(default_expires_in_seconds);
    NormalizedQuestion { title, body, mcd, expires_in_seconds }
}

/// Outcome of [`create_or_join`] — the three cases from spec §4.E.
#[derive(Debug)]
pub enum CreateOrJoinOutcome {
    /// A brand-new request was created; `first_event_id` is `request.created`'s id.
    Created { request_id: String, first_event_id: String },
    /// An existing, still-pending request was found; nothing new emitted.
    Joined { request_id: String },
    /// An existing request already reached a terminal status; the caller
    /// should read it from the hub's terminal cache or the durable log.
    JoinedTerminal { request_id: String },
}

impl CreateOrJoinOutcome {
    pub fn request_id(&self) -> &str {
        match self {
            Self::Created { request_id, .. } => request_id,
            Self::Joined { request_id } => request_id,
            Self::JoinedTerminal { request_id } => request_id,
        }
    }
}

#[derive(Debug)]
pub enum SubmitOutcome {
    Submitted,
    /// A unique-violation on the answer insert, or a status already
    /// `submitted` — the caller redirects rather than erroring (spec §7).
    AlreadySubmitted,
}

fn build_interaction_url(base_url: &str, request_id: &str, token_plaintext: &str) -> String {
    let path = utf8_percent_encode(request_id, PATH_SEGMENT);
    let query = utf8_percent_encode(token_plaintext, QUERY_COMPONENT);
    format!("{base_url}/r/{path}/?k={query}")
}

/// Persist `event_type`/`payload` for `request_id`, publish it on the hub,
/// and — if it is one of the three terminal types — install it as the
/// hub's terminal cache entry. Every lifecycle transition goes through
/// this single path so the "exactly one terminal event" invariant holds
/// (spec §4.E emission discipline).
pub async fn emit(store: &Store, hub: &Hub, request_id: &str, event_type: &str, payload: Value) -> Result<AskEvent, StoreError> {
    let event_id = ids::generate_event_id();
    let created_at = Utc::now();

    store
        .insert_event(&NewEvent {
            request_id,
            event_id: &event_id,
            event_type,
            payload: &payload,
            created_at,
        })
        .await?;

    let event = AskEvent { event_id, request_id: request_id.to_owned(), event_type: event_type.to_owned(), payload, created_at };

    hub.publish(request_id, event.clone()).await;
    if event.is_terminal() {
        hub.set_terminal(request_id, event.clone()).await;
    }

    Ok(event)
}

/// Create a brand-new request, or join one that already exists under
/// `request_id_hint` (spec §4.E). On creation, spawns the notifier and
/// expiry background tasks detached from the caller's connection.
pub async fn create_or_join(
    store: &Store,
    hub: &Hub,
    config: &Arc<AskConfig>,
    request_id_hint: Option<String>,
    question: Option<QuestionInput>,
) -> Result<CreateOrJoinOutcome, AskError> {
    let request_id = match request_id_hint {
        Some(hint) => {
            if !ids::is_valid_request_id(&hint) {
                return Err(AskError::BadRequest);
            }
            hint
        }
        None => ids::generate_request_id(),
    };

    let existing = store.get_request_status(&request_id).await.map_err(|e| {
        tracing::error!(err = %e, request_id = %request_id, "failed to read request status");
        AskError::Internal
    })?;

    match existing {
        Some(status) if status.is_terminal() => Ok(CreateOrJoinOutcome::JoinedTerminal { request_id }),
        Some(_) => Ok(CreateOrJoinOutcome::Joined { request_id }),
        None => {
            let Some(question) = question else {
                return Err(AskError::BadRequest);
            };
            create_request(store, hub, config, request_id, question).await
        }
    }
}

async fn create_request(
    store: &Store,
    hub: &Hub,
    config: &Arc<AskConfig>,
    request_id: String,
    question: QuestionInput,
) -> Result<CreateOrJoinOutcome, AskError> {
    let normalized = normalize_question(question, config.default_expires_in_seconds);
    let now = Utc::now();
    let expires_at = now + chrono::Duration::seconds(normalized.expires_in_seconds);

    store
        .create_request(&NewRequest {
            request_id: &request_id,
            title: &normalized.title,
            body: &normalized.body,
            mcd: &normalized.mcd,
            expires_at,
            created_at: now,
        })
        .await
        .map_err(|e| {
            tracing::error!(err = %e, request_id = %request_id, "failed to create request");
            AskError::Internal
        })?;

    let token_plaintext = ids::generate_token_plaintext();
    let token_hash = ids::hash_token(&token_plaintext);
    store.insert_token(&request_id, &token_hash, expires_at, now).await.map_err(|e| {
        tracing::error!(err = %e, request_id = %request_id, "failed to insert token");
        AskError::Internal
    })?;

    let interaction_url = build_interaction_url(&config.base_url, &request_id, &token_plaintext);

    let created_event = emit(
        store,
        hub,
        &request_id,
        "request.created",
        json!({
            "interaction_url": interaction_url,
            "expires_at": expires_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }),
    )
    .await
    .map_err(|e| {
        tracing::error!(err = %e, request_id = %request_id, "failed to emit request.created");
        AskError::Internal
    })?;

    spawn_notifier_task(
        store.clone(),
        hub.clone(),
        Arc::clone(config),
        request_id.clone(),
        normalized.title,
        normalized.body,
        interaction_url,
    );
    spawn_expiry_task(store.clone(), hub.clone(), request_id.clone(), expires_at);

    Ok(CreateOrJoinOutcome::Created { request_id, first_event_id: created_event.event_id })
}

/// Dispatch the notifier as a detached task. It owns clones of the store,
/// hub, and config rather than borrowing from the registering request's
/// connection — cancelling the caller must not cancel notification
/// (spec §5).
fn spawn_notifier_task(
    store: Store,
    hub: Hub,
    config: Arc<AskConfig>,
    request_id: String,
    title: String,
    body: String,
    interaction_url: String,
) {
    tokio::spawn(async move {
        let notify_body = if body.trim().is_empty() { PLACEHOLDER_BODY } else { body.as_str() };
        let outcome = notifier::notify(&config, &title, notify_body, &interaction_url).await;

        // A terminal event (submission or expiry) may have already fired
        // while the transport or subprocess call was in flight; never
        // clobber it, to preserve "exactly one terminal event per request".
        match store.get_request_status(&request_id).await {
            Ok(Some(status)) if status.is_terminal() => {
                tracing::debug!(request_id = %request_id, "request already terminal, dropping notify outcome");
                return;
            }
            Err(e) => {
                tracing::warn!(err = %e, request_id = %request_id, "failed to read status before applying notify outcome");
                return;
            }
            _ => {}
        }

        let now = Utc::now();
        match outcome {
            NotifyOutcome::Sent { payload } => {
                if let Err(e) = store.update_request_status(&request_id, RequestStatus::Delivered, now).await {
                    tracing::warn!(err = %e, request_id = %request_id, "failed to mark request delivered");
                }
                if let Err(e) = emit(&store, &hub, &request_id, "notify.sent", payload).await {
                    tracing::warn!(err = %e, request_id = %request_id, "failed to emit notify.sent");
                }
            }
            NotifyOutcome::Failed { payload } => {
                if let Err(e) = store.update_request_status(&request_id, RequestStatus::NotifyFailed, now).await {
                    tracing::warn!(err = %e, request_id = %request_id, "failed to mark request notify_failed");
                }
                if let Err(e) = emit(&store, &hub, &request_id, "notify.failed", payload).await {
                    tracing::warn!(err = %e, request_id = %request_id, "failed to emit notify.failed");
                }
            }
            NotifyOutcome::NoChannelConfigured => {
                if let Err(e) = store.update_request_status(&request_id, RequestStatus::NotifyFailed, now).await {
                    tracing::warn!(err = %e, request_id = %request_id, "failed to mark request notify_failed");
                }
                let payload = json!({"error": "no channel configured"});
                if let Err(e) = emit(&store, &hub, &request_id, "notify.failed", payload).await {
                    tracing::warn!(err = %e, request_id = %request_id, "failed to emit notify.failed");
                }
            }
        }
    });
}

/// Dispatch the expiry timer as a detached task that sleeps until
/// `expires_at` and, unless an answer already landed, transitions the
/// request to `expired`. Must survive independently of any waiting
/// connection (spec §4.E, §5).
fn spawn_expiry_task(store: Store, hub: Hub, request_id: String, expires_at: DateTime<Utc>) {
    tokio::spawn(async move {
        let delay = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(delay).await;

        match store.get_request_status(&request_id).await {
            Ok(Some(status)) if status.is_terminal() => return,
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(err = %e, request_id = %request_id, "failed to read status at expiry wake-up");
                return;
            }
        }

        match store.has_answer(&request_id).await {
            Ok(true) => return,
            Ok(false) => {}
            Err(e) => {
                tracing::warn!(err = %e, request_id = %request_id, "failed to check answer at expiry wake-up");
                return;
            }
        }

        if let Err(e) = store.update_request_status(&request_id, RequestStatus::Expired, Utc::now()).await {
            tracing::warn!(err = %e, request_id = %request_id, "failed to mark request expired");
            return;
        }
        if let Err(e) = emit(&store, &hub, &request_id, "request.expired", json!({})).await {
            tracing::warn!(err = %e, request_id = %request_id, "failed to emit request.expired");
        }
    });
}

/// Record the human's submission (spec §4.E). Invoked by the interaction
/// surface's submit endpoint.
pub async fn submit(
    store: &Store,
    hub: &Hub,
    request_id: &str,
    token_plaintext: &str,
    action: Option<&str>,
    text: Option<&str>,
) -> Result<SubmitOutcome, AskError> {
    let token_hash = ids::hash_token(token_plaintext);
    let now = Utc::now();

    let display = store
        .read_request_display_fields(request_id)
        .await
        .map_err(|e| {
            tracing::error!(err = %e, request_id = %request_id, "failed to read request for submit");
            AskError::Internal
        })?
        .ok_or(AskError::NotFound)?;

    if display.status.is_terminal() {
        if matches!(display.status, RequestStatus::Submitted) {
            return Ok(SubmitOutcome::AlreadySubmitted);
        }
        // Expired or notify_failed: the owning request's terminal status
        // invalidates the token even if its own row hasn't aged out yet
        // (spec §3 token validity invariant).
        return Err(AskError::Forbidden);
    }

    // Check the request's own expiry before the token's TTL, which lines
    // up with it: once both lapse, `verify_token` would already report the
    // token invalid and mask the gone-request case behind a plain 403
    // (spec §4.E / §7: an expired request answers 410, not 403).
    if now > display.expires_at {
        return Err(AskError::Gone);
    }

    let valid = store.verify_token(request_id, &token_hash, now).await.map_err(|e| {
        tracing::error!(err = %e, request_id = %request_id, "failed to verify token");
        AskError::Internal
    })?;
    if !valid {
        return Err(AskError::Forbidden);
    }

    let action = action.map(str::trim).filter(|s| !s.is_empty());
    let text = text.map(str::trim).filter(|s| !s.is_empty());
    if action.is_none() && text.is_none() {
        return Err(AskError::BadRequest);
    }

    match store.insert_answer(request_id, action, text, now).await {
        Ok(()) => {}
        Err(StoreError::AlreadyAnswered) => return Ok(SubmitOutcome::AlreadySubmitted),
        Err(e) => {
            tracing::error!(err = %e, request_id = %request_id, "failed to insert answer");
            return Err(AskError::Internal);
        }
    }

    if let Err(e) = store.mark_token_used(request_id, &token_hash, now).await {
        tracing::warn!(err = %e, request_id = %request_id, "failed to mark token used");
    }
    if let Err(e) = store.update_request_status(request_id, RequestStatus::Submitted, now).await {
        tracing::warn!(err = %e, request_id = %request_id, "failed to mark request submitted");
    }

    let payload = json!({"action": action.unwrap_or(""), "text": text.unwrap_or("")});
    emit(store, hub, request_id, "user.submitted", payload).await.map_err(|e| {
        tracing::error!(err = %e, request_id = %request_id, "failed to emit user.submitted");
        AskError::Internal
    })?;

    Ok(SubmitOutcome::Submitted)
}

/// Record a page view. Observational only (spec §4.F); failures are
/// logged and swallowed rather than surfaced to the browser.
pub async fn record_page_loaded(store: &Store, hub: &Hub, request_id: &str) {
    if let Err(e) = emit(store, hub, request_id, "user.page_loaded", json!({})).await {
        tracing::warn!(err = %e, request_id = %request_id, "failed to emit user.page_loaded");
    }
}

/// Wait for the terminal event for `request_id`, consulting in order the
/// hub's terminal cache, the durable log, and finally a fresh
/// subscription (spec §4.F long-poll contract). Returns `None` only if
/// the hub subscription is torn down without ever delivering a terminal
/// event (e.g. the sweeper dropped an orphaned entry), which callers
/// should treat as an internal error.
pub async fn wait_for_terminal(store: &Store, hub: &Hub, request_id: &str) -> Option<AskEvent> {
    if let Some(event) = hub.get_terminal(request_id).await {
        return Some(event);
    }

    if let Ok(Some(stored)) = store.latest_event_of_types(request_id, TERMINAL_TYPES).await {
        return Some(stored_to_ask_event(stored));
    }

    let mut subscription = hub.subscribe(request_id).await;

    // The terminal event may have landed between the checks above and
    // registering this subscription; re-check once more before waiting.
    if let Some(event) = hub.get_terminal(request_id).await {
        return Some(event);
    }

    loop {
        match subscription.receiver.recv().await {
            Some(event) if event.is_terminal() => return Some(event),
            Some(_) => continue,
            // The channel can close because `set_terminal` ran (after
            // delivering any buffered event) rather than because the
            // request never terminated — re-consult the cache and the
            // durable log once more before giving up (spec §4.C).
            None => {
                if let Some(event) = hub.get_terminal(request_id).await {
                    return Some(event);
                }
                if let Ok(Some(stored)) = store.latest_event_of_types(request_id, TERMINAL_TYPES).await {
                    return Some(stored_to_ask_event(stored));
                }
                return None;
            }
        }
    }
}

pub fn stored_to_ask_event(stored: crate::store::StoredEvent) -> AskEvent {
    AskEvent {
        event_id: stored.event_id,
        request_id: stored.request_id,
        event_type: stored.event_type,
        payload: stored.payload,
        created_at: stored.created_at,
    }
}

/// The control description parsed from a request's `mcd` field, for the
/// interaction page renderer.
pub fn parse_controls(mcd_source: &str) -> mcd::ControlDescription {
    mcd::parse(mcd_source)
}

pub fn heartbeat_event(request_id: &str) -> AskEvent {
    AskEvent::heartbeat(request_id)
}

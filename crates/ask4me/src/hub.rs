// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory event hub: fans each request's events out to its own
//! subscribers and caches the terminal event briefly so a waiter that
//! arrives just after the fact still observes it (spec §4.C).
//!
//! The teacher's `Aggregator` (crates/mux/src/events.rs) multiplexes
//! *all* session traffic through one `tokio::sync::broadcast` channel
//! and leaves each subscriber to filter out events it doesn't care
//! about. That shape doesn't fit here: a hub serving many concurrent
//! requests would force every waiter to pay the cost of every other
//! request's events. Instead this hub keeps one bounded `mpsc` channel
//! per `(request_id, subscriber)` pair, grouped in a map keyed by
//! request id — the same "per-key channel set" shape the teacher uses
//! for per-session state in `state.rs::SessionEntry`, just applied to
//! event fan-out instead of session bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};

use crate::engine::AskEvent;

const SUBSCRIBER_CHANNEL_CAPACITY: usize = 16;

struct RequestChannel {
    subscribers: HashMap<u64, mpsc::Sender<AskEvent>>,
    next_subscriber_id: u64,
    terminal: Option<(AskEvent, Instant)>,
}

impl Default for RequestChannel {
    fn default() -> Self {
        Self { subscribers: HashMap::new(), next_subscriber_id: 0, terminal: None }
    }
}

/// Handle returned by [`Hub::subscribe`]; dropping it unregisters the
/// subscriber on its next publish or sweep.
pub struct Subscription {
    pub receiver: mpsc::Receiver<AskEvent>,
    request_id: String,
    subscriber_id: u64,
    hub: Hub,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let hub = self.hub.clone();
        let request_id = self.request_id.clone();
        let subscriber_id = self.subscriber_id;
        tokio::spawn(async move {
            hub.unsubscribe(&request_id, subscriber_id).await;
        });
    }
}

#[derive(Clone)]
pub struct Hub {
    inner: Arc<Mutex<HashMap<String, RequestChannel>>>,
    terminal_ttl: Duration,
}

impl Hub {
    pub fn new(terminal_ttl: Duration) -> Self {
        Self { inner: Arc::new(Mutex::new(HashMap::new())), terminal_ttl }
    }

    /// Register a new waiter for `request_id`. If a terminal event is
    /// already cached and still fresh, it is not replayed here — callers
    /// check [`Hub::get_terminal`] first and only subscribe when the
    /// request is still live, matching the engine's long-poll sequencing.
    pub async fn subscribe(&self, request_id: &str) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let mut guard = self.inner.lock().await;
        let entry = guard.entry(request_id.to_owned()).or_default();
        let subscriber_id = entry.next_subscriber_id;
        entry.next_subscriber_id += 1;
        entry.subscribers.insert(subscriber_id, tx);
        Subscription { receiver: rx, request_id: request_id.to_owned(), subscriber_id, hub: self.clone() }
    }

    async fn unsubscribe(&self, request_id: &str, subscriber_id: u64) {
        let mut guard = self.inner.lock().await;
        if let Some(entry) = guard.get_mut(request_id) {
            entry.subscribers.remove(&subscriber_id);
            if entry.subscribers.is_empty() && entry.terminal.is_none() {
                guard.remove(request_id);
            }
        }
    }

    /// Fan `event` out to every current subscriber of `request_id`. A
    /// subscriber whose channel is full is dropped silently rather than
    /// blocking the publisher — a slow SSE client cannot stall the
    /// engine (spec §4.C).
    pub async fn publish(&self, request_id: &str, event: AskEvent) {
        let mut guard = self.inner.lock().await;
        let entry = guard.entry(request_id.to_owned()).or_default();
        entry.subscribers.retain(|_, tx| match tx.try_send(event.clone()) {
            // Full channel means a slow reader; drop the event, not the subscriber.
            Ok(()) | Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Record `event` as the terminal event for `request_id`, cached for
    /// `terminal_ttl` so a waiter arriving just after termination still
    /// observes it without re-reading the durable log, and drop the
    /// subscriber set: every current waiter has either already received
    /// this event via `publish` (its sender is dropped only after the
    /// buffered message) or will pick it up from the cache / durable log
    /// on reconnect (spec §4.C).
    pub async fn set_terminal(&self, request_id: &str, event: AskEvent) {
        let mut guard = self.inner.lock().await;
        let entry = guard.entry(request_id.to_owned()).or_default();
        entry.terminal = Some((event, Instant::now()));
        entry.subscribers.clear();
    }

    /// The cached terminal event for `request_id`, if one was recorded
    /// and hasn't aged out of the TTL window yet.
    pub async fn get_terminal(&self, request_id: &str) -> Option<AskEvent> {
        let guard = self.inner.lock().await;
        let (event, at) = guard.get(request_id)?.terminal.as_ref()?;
        if at.elapsed() < self.terminal_ttl {
            Some(event.clone())
        } else {
            None
        }
    }

    /// Drop request entries whose terminal cache has expired and which
    /// have no live subscribers. Intended to run on a periodic tick from
    /// the server's background task set (spec §4.C); never required for
    /// correctness, only for bounding memory.
    pub async fn sweep_expired(&self) {
        let mut guard = self.inner.lock().await;
        guard.retain(|_, entry| {
            let terminal_live = entry.terminal.as_ref().is_some_and(|(_, at)| at.elapsed() < self.terminal_ttl);
            terminal_live || !entry.subscribers.is_empty()
        });
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable store: requests, tokens, answers, and the append-only event
//! log (spec §4.A). Backed by SQLite in WAL mode through `sqlx`, capped
//! at a single connection per the spec's single-writer policy — the
//! same discipline the teacher applies to its own on-disk state in
//! `credential/persist.rs`, just promoted here from a JSON file to a
//! proper embedded SQL engine because the event log needs real
//! queryable ordering.

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("request already answered")]
    AlreadyAnswered,
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Sql(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Request lifecycle status (spec §3). Once a terminal variant is
/// reached it never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Created,
    Delivered,
    Submitted,
    Expired,
    NotifyFailed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Delivered => "delivered",
            Self::Submitted => "submitted",
            Self::Expired => "expired",
            Self::NotifyFailed => "notify_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Submitted | Self::Expired | Self::NotifyFailed)
    }

    fn from_str(s: &str) -> Self {
        match s {
            "delivered" => Self::Delivered,
            "submitted" => Self::Submitted,
            "expired" => Self::Expired,
            "notify_failed" => Self::NotifyFailed,
            _ => Self::Created,
        }
    }
}

/// Fields needed to insert a brand-new request row.
pub struct NewRequest<'a> {
    pub request_id: &'a str,
    pub title: &'a str,
    pub body: &'a str,
    pub mcd: &'a str,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

/// The subset of request fields the interaction page needs to render.
pub struct RequestDisplay {
    pub title: String,
    pub body: String,
    pub mcd: String,
    pub status: RequestStatus,
    pub expires_at: DateTime<Utc>,
}

/// One row of the append-only event log.
#[derive(Debug, Clone)]
pub struct StoredEvent {
    pub seq: i64,
    pub request_id: String,
    pub event_id: String,
    pub event_type: String,
    pub payload: Value,
    pub created_at: DateTime<Utc>,
}

pub struct NewEvent<'a> {
    pub request_id: &'a str,
    pub event_id: &'a str,
    pub event_type: &'a str,
    pub payload: &'a Value,
    pub created_at: DateTime<Utc>,
}

fn to_millis(t: DateTime<Utc>) -> i64 {
    t.timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_else(Utc::now)
}

/// Shared handle to the durable store. Cheap to clone (wraps a pool).
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (creating if missing) the SQLite database at `path`, enable
    /// WAL mode, cap the pool at a single connection, and run migrations.
    pub async fn connect(path: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(path)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new().max_connections(1).connect_with(options).await?;

        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }

    #[cfg(test)]
    pub async fn connect_in_memory() -> StoreResult<Self> {
        Self::connect(":memory:").await
    }

    pub async fn create_request(&self, req: &NewRequest<'_>) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO requests (request_id, title, body, mcd, status, expires_at, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
        )
        .bind(req.request_id)
        .bind(req.title)
        .bind(req.body)
        .bind(req.mcd)
        .bind(RequestStatus::Created.as_str())
        .bind(to_millis(req.expires_at))
        .bind(to_millis(req.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn update_request_status(
        &self,
        request_id: &str,
        status: RequestStatus,
        updated_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query("UPDATE requests SET status = ?1, updated_at = ?2 WHERE request_id = ?3")
            .bind(status.as_str())
            .bind(to_millis(updated_at))
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_request_status(&self, request_id: &str) -> StoreResult<Option<RequestStatus>> {
        let row = sqlx::query("SELECT status FROM requests WHERE request_id = ?1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(|r| RequestStatus::from_str(r.try_get::<String, _>("status").unwrap_or_default().as_str())))
    }

    pub async fn read_request_display_fields(
        &self,
        request_id: &str,
    ) -> StoreResult<Option<RequestDisplay>> {
        let row = sqlx::query(
            "SELECT title, body, mcd, status, expires_at FROM requests WHERE request_id = ?1",
        )
        .bind(request_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| RequestDisplay {
            title: r.get("title"),
            body: r.get("body"),
            mcd: r.get("mcd"),
            status: RequestStatus::from_str(r.get::<String, _>("status").as_str()),
            expires_at: from_millis(r.get("expires_at")),
        }))
    }

    pub async fn insert_token(
        &self,
        request_id: &str,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tokens (request_id, token_hash, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(request_id)
        .bind(token_hash)
        .bind(to_millis(expires_at))
        .bind(to_millis(created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn mark_token_used(
        &self,
        request_id: &str,
        token_hash: &str,
        used_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE tokens SET used_at = ?1 WHERE request_id = ?2 AND token_hash = ?3",
        )
        .bind(to_millis(used_at))
        .bind(request_id)
        .bind(token_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// True only when a matching `(request_id, token_hash)` row exists
    /// and `now` is before its `expires_at`. Does not check request
    /// status — the caller layers that check (spec §4.A).
    pub async fn verify_token(
        &self,
        request_id: &str,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let row = sqlx::query(
            "SELECT 1 AS present FROM tokens WHERE request_id = ?1 AND token_hash = ?2 AND expires_at > ?3",
        )
        .bind(request_id)
        .bind(token_hash)
        .bind(to_millis(now))
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Insert the (at most one) answer for a request. A second attempt
    /// for the same `request_id` fails with [`StoreError::AlreadyAnswered`].
    pub async fn insert_answer(
        &self,
        request_id: &str,
        action: Option<&str>,
        text: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "INSERT INTO answers (request_id, action, text, created_at) VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(request_id)
        .bind(action)
        .bind(text)
        .bind(to_millis(created_at))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => Err(StoreError::AlreadyAnswered),
            Err(e) => Err(StoreError::Sql(e)),
        }
    }

    pub async fn has_answer(&self, request_id: &str) -> StoreResult<bool> {
        let row = sqlx::query("SELECT 1 AS present FROM answers WHERE request_id = ?1")
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.is_some())
    }

    pub async fn insert_event(&self, event: &NewEvent<'_>) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO events (request_id, event_id, type, payload_json, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(event.request_id)
        .bind(event.event_id)
        .bind(event.event_type)
        .bind(event.payload.to_string())
        .bind(to_millis(event.created_at))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// All events for `request_id` in `seq` order. With `after_event_id`
    /// set, returns strictly greater `seq` than that event's — an
    /// unknown cursor yields an empty result (spec §4.A).
    pub async fn list_events_after(
        &self,
        request_id: &str,
        after_event_id: Option<&str>,
    ) -> StoreResult<Vec<StoredEvent>> {
        let cursor_seq = match after_event_id {
            None => None,
            Some(cursor) => {
                let row = sqlx::query("SELECT seq FROM events WHERE request_id = ?1 AND event_id = ?2")
                    .bind(request_id)
                    .bind(cursor)
                    .fetch_optional(&self.pool)
                    .await?;
                match row {
                    Some(r) => Some(r.get::<i64, _>("seq")),
                    // Unknown cursor: no events can follow it.
                    None => return Ok(Vec::new()),
                }
            }
        };

        let rows = match cursor_seq {
            Some(seq) => {
                sqlx::query(
                    "SELECT seq, request_id, event_id, type, payload_json, created_at FROM events \
                     WHERE request_id = ?1 AND seq > ?2 ORDER BY seq ASC",
                )
                .bind(request_id)
                .bind(seq)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT seq, request_id, event_id, type, payload_json, created_at FROM events \
                     WHERE request_id = ?1 ORDER BY seq ASC",
                )
                .bind(request_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.into_iter().map(row_to_event).collect())
    }

    /// The most recent event for `request_id` whose type is in `types`,
    /// if any — used to recover the terminal event from the durable log
    /// when the in-memory terminal cache has expired (spec §4.F, §9).
    pub async fn latest_event_of_types(
        &self,
        request_id: &str,
        types: &[&str],
    ) -> StoreResult<Option<StoredEvent>> {
        if types.is_empty() {
            return Ok(None);
        }
        let placeholders = (1..=types.len()).map(|i| format!("?{}", i + 1)).collect::<Vec<_>>().join(", ");
        let query_str = format!(
            "SELECT seq, request_id, event_id, type, payload_json, created_at FROM events \
             WHERE request_id = ?1 AND type IN ({placeholders}) ORDER BY seq DESC LIMIT 1"
        );
        let mut query = sqlx::query(&query_str).bind(request_id);
        for t in types {
            query = query.bind(*t);
        }
        let row = query.fetch_optional(&self.pool).await?;
        Ok(row.map(row_to_event))
    }
}

fn row_to_event(row: sqlx::sqlite::SqliteRow) -> StoredEvent {
    let payload_json: String = row.get("payload_json");
    StoredEvent {
        seq: row.get("seq"),
        request_id: row.get("request_id"),
        event_id: row.get("event_id"),
        event_type: row.get("type"),
        payload: serde_json::from_str(&payload_json).unwrap_or(Value::Null),
        created_at: from_millis(row.get("created_at")),
    }
}

#[cfg(test)]
mod store_tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[tokio::test]
    async fn create_and_read_request_round_trips() -> anyhow::Result<()> {
        let store = Store::connect_in_memory().await?;
        let t = now();
        store
            .create_request(&NewRequest {
                request_id: "req_abc",
                title: "T",
                body: "B",
                mcd: ":::buttons\n- [OK](ok)\n:::",
                expires_at: t + chrono::Duration::seconds(60),
                created_at: t,
            })
            .await?;

        let display = store
            .read_request_display_fields("req_abc")
            .await?
            .ok_or_else(|| anyhow::anyhow!("row should exist"))?;
        assert_eq!(display.title, "T");
        assert_eq!(display.status.as_str(), "created");
        Ok(())
    }

    #[tokio::test]
    async fn insert_answer_twice_is_rejected() -> anyhow::Result<()> {
        let store = Store::connect_in_memory().await?;
        store
            .create_request(&NewRequest {
                request_id: "req_one",
                title: "T",
                body: "B",
                mcd: "",
                expires_at: now() + chrono::Duration::seconds(60),
                created_at: now(),
            })
            .await?;

        store.insert_answer("req_one", Some("ok"), None, now()).await?;
        let second = store.insert_answer("req_one", Some("ok"), None, now()).await;
        assert!(matches!(second, Err(StoreError::AlreadyAnswered)));
        Ok(())
    }

    #[tokio::test]
    async fn verify_token_respects_expiry() -> anyhow::Result<()> {
        let store = Store::connect_in_memory().await?;
        let t = now();
        store.insert_token("req_x", "hash1", t + chrono::Duration::seconds(10), t).await?;

        assert!(store.verify_token("req_x", "hash1", t).await?);
        assert!(!store.verify_token("req_x", "hash1", t + chrono::Duration::seconds(20)).await?);
        assert!(!store.verify_token("req_x", "wrong-hash", t).await?);
        Ok(())
    }

    #[tokio::test]
    async fn list_events_after_is_monotone_and_cursor_resumable() -> anyhow::Result<()> {
        let store = Store::connect_in_memory().await?;
        for (id, ty) in [("evt_1", "request.created"), ("evt_2", "notify.sent"), ("evt_3", "user.submitted")] {
            store
                .insert_event(&NewEvent {
                    request_id: "req_y",
                    event_id: id,
                    event_type: ty,
                    payload: &json!({}),
                    created_at: now(),
                })
                .await?;
        }

        let all = store.list_events_after("req_y", None).await?;
        assert_eq!(all.iter().map(|e| e.event_id.as_str()).collect::<Vec<_>>(), vec!["evt_1", "evt_2", "evt_3"]);
        assert!(all.windows(2).all(|w| w[0].seq < w[1].seq));

        let prefix = store.list_events_after("req_y", Some("evt_1")).await?;
        let resumed = store.list_events_after("req_y", Some(prefix[0].event_id.as_str())).await?;
        assert_eq!(resumed.len(), 1);
        assert_eq!(resumed[0].event_id, "evt_3");
        Ok(())
    }

    #[tokio::test]
    async fn unknown_cursor_yields_empty_result() -> anyhow::Result<()> {
        let store = Store::connect_in_memory().await?;
        store
            .insert_event(&NewEvent {
                request_id: "req_z",
                event_id: "evt_1",
                event_type: "request.created",
                payload: &json!({}),
                created_at: now(),
            })
            .await?;
        let events = store.list_events_after("req_z", Some("evt_does_not_exist")).await?;
        assert!(events.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn latest_event_of_types_returns_most_recent_terminal() -> anyhow::Result<()> {
        let store = Store::connect_in_memory().await?;
        store
            .insert_event(&NewEvent {
                request_id: "req_w",
                event_id: "evt_1",
                event_type: "request.created",
                payload: &json!({}),
                created_at: now(),
            })
            .await?;
        store
            .insert_event(&NewEvent {
                request_id: "req_w",
                event_id: "evt_2",
                event_type: "user.submitted",
                payload: &json!({"action": "ok", "text": ""}),
                created_at: now(),
            })
            .await?;

        let terminal = store
            .latest_event_of_types("req_w", &["user.submitted", "request.expired", "notify.failed"])
            .await?
            .ok_or_else(|| anyhow::anyhow!("terminal event should exist"))?;
        assert_eq!(terminal.event_id, "evt_2");
        Ok(())
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios that spawn the real `ask4me` binary and drive it
//! over plain HTTP, matching the six literal-input scenarios from the
//! testable-properties section of the design (button submission, input
//! submission with a caller-chosen id, expiry, no-channel-configured,
//! stream replay, and resumption after a client timeout).

use std::time::Duration;

use ask4me_e2e::{next_sse_payload, parse_interaction_url, read_until_event_type, AskProcess, API_KEY};
use serde_json::json;

const TIMEOUT: Duration = Duration::from_secs(10);

fn auth(req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
    req.bearer_auth(API_KEY)
}

#[tokio::test]
async fn button_submission_long_poll() -> anyhow::Result<()> {
    let ask = AskProcess::build().configure_notifier().spawn()?;
    ask.wait_ready(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let mut stream_resp = auth(client.get(format!("{}/v1/ask", ask.base_url())))
        .query(&[("stream", "true"), ("title", "T"), ("body", "B"), ("mcd", ":::buttons\n- [OK](ok)\n:::")])
        .send()
        .await?;
    let mut buf = String::new();
    let created = read_until_event_type(&mut stream_resp, &mut buf, "request.created").await?;
    let interaction_url = created["data"]["interaction_url"].as_str().ok_or_else(|| anyhow::anyhow!("missing interaction_url"))?;
    let (request_id, token) = parse_interaction_url(interaction_url)?;

    let submit_resp = client
        .post(format!("{}/r/{request_id}/submit?k={token}", ask.base_url()))
        .form(&[("action", "ok")])
        .send()
        .await?;
    assert!(submit_resp.status().is_redirection() || submit_resp.status().is_success());

    let terminal = tokio::time::timeout(TIMEOUT, read_until_event_type(&mut stream_resp, &mut buf, "user.submitted")).await??;
    assert_eq!(terminal["data"]["action"], "ok");
    assert_eq!(terminal["data"]["text"], "");

    Ok(())
}

#[tokio::test]
async fn input_submission_with_caller_chosen_id() -> anyhow::Result<()> {
    let ask = AskProcess::build().configure_notifier().spawn()?;
    ask.wait_ready(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let mut stream_resp = auth(client.get(format!("{}/v1/ask", ask.base_url())))
        .query(&[("stream", "true"), ("request_id", "req_myjob_1"), ("mcd", ":::input name=\"note\" label=\"L\" submit=\"S\"\n:::")])
        .send()
        .await?;
    let mut buf = String::new();
    let created = read_until_event_type(&mut stream_resp, &mut buf, "request.created").await?;
    let interaction_url = created["data"]["interaction_url"].as_str().ok_or_else(|| anyhow::anyhow!("missing interaction_url"))?;
    let (request_id, token) = parse_interaction_url(interaction_url)?;
    assert_eq!(request_id, "req_myjob_1");

    client
        .post(format!("{}/r/{request_id}/submit?k={token}", ask.base_url()))
        .form(&[("text", "hello")])
        .send()
        .await?;

    let terminal = tokio::time::timeout(TIMEOUT, read_until_event_type(&mut stream_resp, &mut buf, "user.submitted")).await??;
    assert_eq!(terminal["data"]["action"], "");
    assert_eq!(terminal["data"]["text"], "hello");

    Ok(())
}

#[tokio::test]
async fn expiry_fires_when_nothing_is_submitted() -> anyhow::Result<()> {
    let ask = AskProcess::build().configure_notifier().spawn()?;
    ask.wait_ready(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let resp: serde_json::Value = auth(client.post(format!("{}/v1/ask", ask.base_url())))
        .json(&json!({"expires_in_seconds": 1, "mcd": ":::buttons\n- [OK](ok)\n:::"}))
        .timeout(Duration::from_secs(15))
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(resp["last_event_type"], "request.expired");

    Ok(())
}

#[tokio::test]
async fn no_channel_configured_reports_notify_failed() -> anyhow::Result<()> {
    let ask = AskProcess::start()?;
    ask.wait_ready(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let resp: serde_json::Value = auth(client.post(format!("{}/v1/ask", ask.base_url())))
        .json(&json!({"mcd": ":::buttons\n- [OK](ok)\n:::"}))
        .timeout(TIMEOUT)
        .send()
        .await?
        .json()
        .await?;

    assert_eq!(resp["last_event_type"], "notify.failed");
    let error = resp["data"]["error"].as_str().unwrap_or_default();
    assert!(error.contains("no channel"), "expected a 'no channel' error, got {error:?}");

    Ok(())
}

#[tokio::test]
async fn stream_replay_does_not_resend_request_created() -> anyhow::Result<()> {
    let ask = AskProcess::build().configure_notifier().spawn()?;
    ask.wait_ready(TIMEOUT).await?;
    let client = reqwest::Client::new();

    let mut first = auth(client.get(format!("{}/v1/ask", ask.base_url())))
        .query(&[("stream", "true"), ("expires_in_seconds", "2"), ("mcd", ":::buttons\n- [OK](ok)\n:::")])
        .send()
        .await?;
    let mut buf = String::new();
    let created = read_until_event_type(&mut first, &mut buf, "request.created").await?;
    let last_event_id = created["id"].as_str().ok_or_else(|| anyhow::anyhow!("missing id"))?.to_owned();
    let (request_id, _token) = parse_interaction_url(created["data"]["interaction_url"].as_str().unwrap_or_default())?;
    drop(first);

    let mut second = auth(client.get(format!(
        "{}/v1/ask?stream=true&request_id={request_id}&last_event_id={last_event_id}",
        ask.base_url()
    )))
    .send()
    .await?;
    let mut buf2 = String::new();
    let mut saw_request_created = false;
    let mut saw_terminal = false;
    let mut saw_done = false;
    loop {
        let Some(payload) = tokio::time::timeout(TIMEOUT, next_sse_payload(&mut second, &mut buf2)).await?? else { break };
        if payload == "[DONE]" {
            saw_done = true;
            break;
        }
        let value: serde_json::Value = serde_json::from_str(&payload)?;
        match value["type"].as_str() {
            Some("request.created") => saw_request_created = true,
            Some("request.expired") => saw_terminal = true,
            _ => {}
        }
    }

    assert!(!saw_request_created, "replay must not resend request.created after the given cursor");
    assert!(saw_terminal, "expected request.expired to arrive exactly once");
    assert!(saw_done, "expected a terminating [DONE] frame");

    Ok(())
}

#[tokio::test]
async fn resumption_after_client_timeout_reads_terminal_from_cache_or_log() -> anyhow::Result<()> {
    let ask = AskProcess::build().configure_notifier().spawn()?;
    ask.wait_ready(TIMEOUT).await?;
    let client = reqwest::Client::new();

    // First call: create the request, then abandon it with a very short
    // client-side timeout before it can reach a terminal state.
    let short_lived = reqwest::Client::builder().timeout(Duration::from_millis(500)).build()?;
    let first = auth(short_lived.post(format!("{}/v1/ask?request_id=req_r_1", ask.base_url())))
        .json(&json!({"mcd": ":::buttons\n- [OK](ok)\n:::"}))
        .send()
        .await;
    assert!(first.is_err(), "expected the short client timeout to abandon the long-poll");

    // Recover the interaction url/token by replaying the durable log for
    // the same caller-chosen id (no new request.created is emitted).
    let mut stream_resp = auth(client.get(format!("{}/v1/ask?stream=true&request_id=req_r_1", ask.base_url())))
        .send()
        .await?;
    let mut buf = String::new();
    let created = read_until_event_type(&mut stream_resp, &mut buf, "request.created").await?;
    let (request_id, token) = parse_interaction_url(created["data"]["interaction_url"].as_str().unwrap_or_default())?;
    drop(stream_resp);

    client
        .post(format!("{}/r/{request_id}/submit?k={token}", ask.base_url()))
        .form(&[("action", "ok")])
        .send()
        .await?;

    // Second `/v1/ask` call with the same id, empty body: should resolve
    // immediately from the terminal cache or durable log.
    let resp: serde_json::Value = tokio::time::timeout(
        TIMEOUT,
        auth(client.post(format!("{}/v1/ask?request_id=req_r_1", ask.base_url()))).send(),
    )
    .await??
    .json()
    .await?;

    assert_eq!(resp["last_event_type"], "user.submitted");

    Ok(())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Out-of-band notification dispatch: deliver the interaction link to a
//! human through whichever channel is configured (spec §4.D).
//!
//! The reqwest usage — a client built once with a fixed timeout, plain
//! POST, JSON decode — follows `upstream::client::UpstreamClient`
//! directly. The apprise fallback has no counterpart in the teacher (it
//! has no subprocess notification path at all); it's grounded instead
//! in the pack's webhook-dispatch shape, adapted to a one-shot CLI
//! invocation rather than a queued retry worker, since notification
//! replay is explicitly out of scope here.

use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::config::AskConfig;

const OUTPUT_TRUNCATE_BYTES: usize = 2048;

/// Outcome of a single notification attempt. `Sent`/`Failed` carry the
/// `notify.sent`/`notify.failed` event payload verbatim (spec §3); the
/// engine decides status transitions and hub installation from the
/// variant, not from the payload contents.
#[derive(Debug)]
pub enum NotifyOutcome {
    Sent { payload: Value },
    Failed { payload: Value },
    /// No channel is configured at all — not an error, a deployment fact.
    NoChannelConfigured,
}

#[derive(Serialize)]
struct ServerchanPayload<'a> {
    title: &'a str,
    desp: &'a str,
}

#[derive(Deserialize)]
struct ServerchanResponse {
    code: i64,
    #[serde(default)]
    message: String,
}

/// Send the interaction link for `title`/`body` through the configured
/// channel. Tries the push gateway (`serverchan_sendkey`) first, then
/// the `apprise` notifier URLs, and reports
/// [`NotifyOutcome::NoChannelConfigured`] if neither is set up.
pub async fn notify(config: &AskConfig, title: &str, body: &str, interaction_url: &str) -> NotifyOutcome {
    let message = format!("{body}\n\n{interaction_url}");

    if let Some(sendkey) = &config.serverchan_sendkey {
        return notify_via_push_gateway(sendkey, title, &message).await;
    }

    if !config.apprise_urls.is_empty() {
        return notify_via_apprise(config, title, &message).await;
    }

    NotifyOutcome::NoChannelConfigured
}

/// Delivery via the push-notification gateway. Success is "transport ok
/// and returned status code 0" (spec §4.D.1) — ServerChan's own API
/// convention of `{"code": 0, ...}` on success.
async fn notify_via_push_gateway(sendkey: &str, title: &str, message: &str) -> NotifyOutcome {
    let channel = "serverchan";
    let client = match Client::builder().timeout(Duration::from_secs(10)).build() {
        Ok(c) => c,
        Err(e) => return NotifyOutcome::Failed { payload: json!({"channel": channel, "error": e.to_string()}) },
    };

    let url = format!("https://sctapi.ftqq.com/{sendkey}.send");
    let form = ServerchanPayload { title, desp: message };

    let resp = match client.post(url).form(&form).send().await {
        Ok(resp) => resp,
        Err(e) => return NotifyOutcome::Failed { payload: json!({"channel": channel, "error": e.to_string()}) },
    };

    match resp.json::<ServerchanResponse>().await {
        Ok(body) if body.code == 0 => NotifyOutcome::Sent { payload: json!({"channel": channel}) },
        Ok(body) => NotifyOutcome::Failed {
            payload: json!({"channel": channel, "error": body.message, "code": body.code}),
        },
        Err(e) => NotifyOutcome::Failed { payload: json!({"channel": channel, "error": e.to_string()}) },
    }
}

/// Delivery via the configured `apprise` binary: `<bin> -vv --title
/// <title> --body <body> <url...>`, each URL normalized by rewriting
/// the `serverchan://` scheme to `schan://` (apprise's own scheme name
/// for the same gateway) (spec §4.D.2).
async fn notify_via_apprise(config: &AskConfig, title: &str, message: &str) -> NotifyOutcome {
    let normalized_urls: Vec<String> =
        config.apprise_urls.iter().map(|u| normalize_apprise_url(u)).collect();

    let mut cmd = tokio::process::Command::new(&config.apprise_bin);
    cmd.arg("-vv").arg("--title").arg(title).arg("--body").arg(message);
    for url in &normalized_urls {
        cmd.arg(url);
    }
    cmd.stdin(std::process::Stdio::null());
    cmd.stdout(std::process::Stdio::piped());
    cmd.stderr(std::process::Stdio::piped());

    let shell_command = format!(
        "{} -vv --title {:?} --body {:?} {}",
        config.apprise_bin,
        title,
        message,
        normalized_urls.join(" ")
    );

    match cmd.output().await {
        Ok(output) => {
            let combined = combined_output(&output.stdout, &output.stderr);
            if output.status.success() {
                NotifyOutcome::Sent {
                    payload: json!({"channel": "apprise", "output": combined, "command": shell_command}),
                }
            } else {
                NotifyOutcome::Failed {
                    payload: json!({
                        "channel": "apprise",
                        "error": format!("exit status {}", output.status),
                        "output": combined,
                        "command": shell_command,
                    }),
                }
            }
        }
        Err(e) => NotifyOutcome::Failed {
            payload: json!({"channel": "apprise", "error": e.to_string(), "command": shell_command}),
        },
    }
}

fn normalize_apprise_url(url: &str) -> String {
    match url.strip_prefix("serverchan://") {
        Some(rest) => format!("schan://{rest}"),
        None => url.to_owned(),
    }
}

fn combined_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut combined = String::from_utf8_lossy(stdout).into_owned();
    combined.push('\n');
    combined.push_str(&String::from_utf8_lossy(stderr));
    let trimmed = combined.trim();
    if trimmed.len() > OUTPUT_TRUNCATE_BYTES {
        let mut end = OUTPUT_TRUNCATE_BYTES;
        while !trimmed.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &trimmed[..end])
    } else {
        trimmed.to_owned()
    }
}

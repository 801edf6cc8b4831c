// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `ask4me` binary as a subprocess, configured with a
//! temporary YAML file and an isolated SQLite database, and exercises it
//! over plain HTTP — mirroring the teacher's `coop-specs` harness
//! (`tests/specs/src/lib.rs`), which resolves the compiled binary path
//! under `target/debug` and shells out rather than linking the server
//! in-process.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::sync::Once;
use std::time::Duration;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls. Safe to call
/// multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Resolve the path to the compiled `ask4me` binary.
pub fn ask4me_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/e2e → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("ask4me")
}

/// Find a free TCP port by binding to :0 then releasing.
pub fn free_port() -> anyhow::Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}

pub const API_KEY: &str = "test-api-key";

/// A running `ask4me` process, killed on drop, with its own temp config
/// file, temp SQLite database, and isolated port.
pub struct AskProcess {
    child: Child,
    port: u16,
    _tmp: tempfile::TempDir,
}

/// Builder for the handful of config knobs the end-to-end scenarios vary.
pub struct AskBuilder {
    default_expires_in_seconds: i64,
    terminal_cache_seconds: u64,
    configure_notifier: bool,
}

impl Default for AskBuilder {
    fn default() -> Self {
        Self { default_expires_in_seconds: 3600, terminal_cache_seconds: 60, configure_notifier: false }
    }
}

impl AskBuilder {
    pub fn default_expires_in_seconds(mut self, secs: i64) -> Self {
        self.default_expires_in_seconds = secs;
        self
    }

    pub fn terminal_cache_seconds(mut self, secs: u64) -> Self {
        self.terminal_cache_seconds = secs;
        self
    }

    /// Point `apprise_urls`/`apprise_bin` at a stub script that always
    /// succeeds, so `notify.sent` fires instead of `notify.failed` —
    /// used by scenarios that need the request to survive past
    /// notification and wait for the human submission.
    pub fn configure_notifier(mut self) -> Self {
        self.configure_notifier = true;
        self
    }

    pub fn spawn(self) -> anyhow::Result<AskProcess> {
        ensure_crypto();
        let binary = ask4me_binary();
        anyhow::ensure!(binary.exists(), "ask4me binary not found at {}", binary.display());

        let tmp = tempfile::tempdir()?;
        let port = free_port()?;
        let db_path = tmp.path().join("ask4me.db");

        let mut config = format!(
            "base_url: http://127.0.0.1:{port}\n\
             api_key: {key}\n\
             sqlite_path: {db}\n\
             listen_addr: \"127.0.0.1:{port}\"\n\
             default_expires_in_seconds: {expires}\n\
             terminal_cache_seconds: {cache}\n\
             sse_heartbeat_interval_seconds: 1\n",
            key = API_KEY,
            db = db_path.display(),
            expires = self.default_expires_in_seconds,
            cache = self.terminal_cache_seconds,
        );

        if self.configure_notifier {
            let stub_path = tmp.path().join("apprise-stub.sh");
            std::fs::write(&stub_path, "#!/bin/sh\nexit 0\n")?;
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                std::fs::set_permissions(&stub_path, std::fs::Permissions::from_mode(0o755))?;
            }
            config.push_str(&format!("apprise_bin: {}\n", stub_path.display()));
            config.push_str("apprise_urls:\n  - \"mailto://user@example.test\"\n");
        }

        let config_path = tmp.path().join("ask4me.yaml");
        let mut file = std::fs::File::create(&config_path)?;
        file.write_all(config.as_bytes())?;

        let child = Command::new(&binary)
            .arg("--config")
            .arg(&config_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(AskProcess { child, port, _tmp: tmp })
    }
}

impl AskProcess {
    pub fn build() -> AskBuilder {
        AskBuilder::default()
    }

    pub fn start() -> anyhow::Result<Self> {
        Self::build().spawn()
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Poll `/v1/ask` with an empty, unauthenticated body until the
    /// listener accepts connections — a 401 response still proves the
    /// server is up, since no health endpoint exists in this API surface.
    pub async fn wait_ready(&self, timeout: Duration) -> anyhow::Result<()> {
        let client = reqwest::Client::new();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("ask4me did not become ready within {timeout:?}");
            }
            if client.get(format!("{}/v1/ask", self.base_url())).send().await.is_ok() {
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for AskProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Read the next complete SSE frame off a streaming response, returning
/// its `data:` payload verbatim (`"[DONE]"` included). Frames are
/// separated by a blank line; chunk boundaries rarely align with frame
/// boundaries, so incomplete data accumulates in `buf` across calls.
pub async fn next_sse_payload(response: &mut reqwest::Response, buf: &mut String) -> anyhow::Result<Option<String>> {
    loop {
        if let Some(pos) = buf.find("\n\n") {
            let frame = buf[..pos].to_owned();
            *buf = buf[pos + 2..].to_owned();
            let payload = frame
                .lines()
                .find_map(|line| line.strip_prefix("data: ").or_else(|| line.strip_prefix("data:")))
                .map(str::to_owned);
            if let Some(payload) = payload {
                return Ok(Some(payload));
            }
            continue;
        }

        match response.chunk().await? {
            Some(chunk) => buf.push_str(&String::from_utf8_lossy(&chunk)),
            None => return Ok(None),
        }
    }
}

/// Read SSE frames until one carries the given event `type`, returning
/// its parsed JSON envelope. Heartbeats and other event types are
/// skipped; `"[DONE]"` frames are skipped too since they carry no JSON.
pub async fn read_until_event_type(
    response: &mut reqwest::Response,
    buf: &mut String,
    wanted_type: &str,
) -> anyhow::Result<serde_json::Value> {
    loop {
        let Some(payload) = next_sse_payload(response, buf).await? else {
            anyhow::bail!("stream ended before event type {wanted_type:?} arrived");
        };
        if payload == "[DONE]" {
            continue;
        }
        let value: serde_json::Value = serde_json::from_str(&payload)?;
        if value.get("type").and_then(|t| t.as_str()) == Some(wanted_type) {
            return Ok(value);
        }
    }
}

/// Extract `(request_id, token_plaintext)` from an interaction URL shaped
/// `<base>/r/<request_id>/?k=<token>`.
pub fn parse_interaction_url(url: &str) -> anyhow::Result<(String, String)> {
    let after_r = url.rsplit_once("/r/").map(|(_, rest)| rest).ok_or_else(|| anyhow::anyhow!("missing /r/ segment in {url}"))?;
    let (request_id, rest) = after_r.split_once('/').ok_or_else(|| anyhow::anyhow!("missing trailing slash in {url}"))?;
    let token = rest.rsplit_once("k=").map(|(_, k)| k).ok_or_else(|| anyhow::anyhow!("missing ?k= in {url}"))?;
    Ok((request_id.to_owned(), token.to_owned()))
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Configuration loading: YAML file, `key=value` env file, or process
//! environment — whichever is detected, per spec §6.
//!
//! Mirrors the teacher's `MuxConfig` shape (a flat struct of typed knobs
//! with defaults) but the teacher wires each field to its own `clap`
//! flag; here the CLI surface is a single `--config <path>` flag (spec
//! §6), so the struct is populated by [`AskConfig::load`] instead of by
//! `clap::Parser` directly.

use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use serde::Deserialize;

/// Top-level CLI: the server binary recognizes exactly one flag.
#[derive(Debug, Parser)]
#[command(name = "ask4me", about = "Human-in-the-loop rendezvous service")]
pub struct CliArgs {
    /// Path to a YAML or `key=value` env config file.
    #[arg(long)]
    pub config: Option<PathBuf>,
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct AskConfig {
    pub base_url: String,
    pub api_key: String,
    pub serverchan_sendkey: Option<String>,
    pub apprise_urls: Vec<String>,
    pub apprise_bin: String,
    pub sqlite_path: String,
    pub default_expires_in_seconds: i64,
    pub sse_heartbeat_interval_seconds: u64,
    pub listen_addr: String,
    pub terminal_cache_seconds: u64,
}

impl AskConfig {
    pub fn sse_heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.sse_heartbeat_interval_seconds)
    }

    pub fn terminal_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.terminal_cache_seconds)
    }

    /// `listen_addr` is specified Go-`net`-style (`:8080` means "all
    /// interfaces"); normalize that shorthand to something `TcpListener`
    /// will bind directly.
    pub fn bind_addr(&self) -> String {
        match self.listen_addr.strip_prefix(':') {
            Some(port) => format!("0.0.0.0:{port}"),
            None => self.listen_addr.clone(),
        }
    }

    /// Load configuration from `args.config` if given, otherwise
    /// auto-detect `./.env` then `./ask4me.yaml`/`./ask4me.yml`, with
    /// process-environment values always taking priority over file
    /// contents (same precedence dotenvy itself uses: never clobber an
    /// already-set variable).
    pub fn load(args: &CliArgs) -> anyhow::Result<Self> {
        let raw = match &args.config {
            Some(path) => RawConfig::from_file(path)?,
            None => RawConfig::auto_detect()?,
        };
        raw.resolve()
    }
}

/// Config values collected from a file, before env-override and defaulting.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    base_url: Option<String>,
    api_key: Option<String>,
    serverchan_sendkey: Option<String>,
    #[serde(default)]
    apprise_urls: Vec<String>,
    apprise_bin: Option<String>,
    sqlite_path: Option<String>,
    default_expires_in_seconds: Option<i64>,
    sse_heartbeat_interval_seconds: Option<u64>,
    listen_addr: Option<String>,
    terminal_cache_seconds: Option<u64>,
}

fn is_yaml_path(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("yaml") | Some("yml"))
}

impl RawConfig {
    fn from_file(path: &Path) -> anyhow::Result<Self> {
        if is_yaml_path(path) {
            let contents = std::fs::read_to_string(path)?;
            Ok(serde_yaml::from_str(&contents)?)
        } else {
            // `key=value` env file: load into the process environment
            // (dotenvy never overrides an already-set var) then read back.
            dotenvy::from_path(path)?;
            Ok(RawConfig::default())
        }
    }

    /// Try `./.env`, then `./ask4me.yaml`, then `./ask4me.yml`; fall back
    /// to an empty raw config (process environment only) if none exist.
    fn auto_detect() -> anyhow::Result<Self> {
        if Path::new("./.env").exists() {
            dotenvy::from_filename("./.env")?;
        }
        for candidate in ["./ask4me.yaml", "./ask4me.yml"] {
            let path = Path::new(candidate);
            if path.exists() {
                let contents = std::fs::read_to_string(path)?;
                return Ok(serde_yaml::from_str(&contents)?);
            }
        }
        Ok(RawConfig::default())
    }

    /// Merge process environment (highest priority) over file-sourced
    /// values, apply defaults, and validate required keys are present.
    fn resolve(self) -> anyhow::Result<AskConfig> {
        let base_url = env_value("base_url")
            .or(self.base_url)
            .ok_or_else(|| anyhow::anyhow!("missing required config key: base_url"))?;
        let api_key = env_value("api_key")
            .or(self.api_key)
            .ok_or_else(|| anyhow::anyhow!("missing required config key: api_key"))?;

        let apprise_urls = match env_value("apprise_urls") {
            Some(csv) => csv.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect(),
            None => self.apprise_urls,
        };

        Ok(AskConfig {
            base_url: base_url.trim_end_matches('/').to_owned(),
            api_key,
            serverchan_sendkey: env_value("serverchan_sendkey").or(self.serverchan_sendkey).filter(|s| !s.is_empty()),
            apprise_urls,
            apprise_bin: env_value("apprise_bin").or(self.apprise_bin).unwrap_or_else(|| "apprise".to_owned()),
            sqlite_path: env_value("sqlite_path").or(self.sqlite_path).unwrap_or_else(|| "./ask4me.db".to_owned()),
            default_expires_in_seconds: env_value("default_expires_in_seconds")
                .and_then(|v| v.parse().ok())
                .or(self.default_expires_in_seconds)
                .unwrap_or(3600),
            sse_heartbeat_interval_seconds: env_value("sse_heartbeat_interval_seconds")
                .and_then(|v| v.parse().ok())
                .or(self.sse_heartbeat_interval_seconds)
                .unwrap_or(15),
            listen_addr: env_value("listen_addr").or(self.listen_addr).unwrap_or_else(|| ":8080".to_owned()),
            terminal_cache_seconds: env_value("terminal_cache_seconds")
                .and_then(|v| v.parse().ok())
                .or(self.terminal_cache_seconds)
                .unwrap_or(60),
        })
    }
}

/// Read a config key from the process environment, trying the literal
/// key as written in a `key=value` file and its upper-cased form (the
/// conventional shape for a real process environment variable).
fn env_value(key: &str) -> Option<String> {
    std::env::var(key).ok().or_else(|| std::env::var(key.to_uppercase()).ok())
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Configuration for the marketplace session client.
#[derive(Debug, Clone, clap::Args)]
pub struct ClientConfig {
    /// Base URL of the marketplace REST backend.
    #[arg(long, default_value = "http://127.0.0.1:5000", env = "HARVEST_BASE_URL")]
    pub base_url: String,

    /// Path of the token refresh endpoint.
    #[arg(long, default_value = "/api/auth/refresh-token", env = "HARVEST_REFRESH_ENDPOINT")]
    pub refresh_endpoint: String,

    /// Path of the login endpoint.
    #[arg(long, default_value = "/api/auth/login", env = "HARVEST_LOGIN_ENDPOINT")]
    pub login_endpoint: String,

    /// Navigation location of the login entry point.
    #[arg(long, default_value = "/login", env = "HARVEST_LOGIN_ROUTE")]
    pub login_route: String,

    /// Seconds before expiry at which a token is refreshed proactively.
    #[arg(long, default_value_t = 60, env = "HARVEST_SKEW_MARGIN_SECS")]
    pub skew_margin_secs: u64,

    /// Request timeout in milliseconds (also bounds the refresh call).
    #[arg(long, default_value_t = 15000, env = "HARVEST_TIMEOUT_MS")]
    pub timeout_ms: u64,

    /// Directory for remembered credentials.
    #[arg(long, env = "HARVEST_STATE_DIR")]
    pub state_dir: Option<PathBuf>,

    /// Directory for session-only credentials.
    #[arg(long, env = "HARVEST_SESSION_DIR")]
    pub session_dir: Option<PathBuf>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:5000".to_owned(),
            refresh_endpoint: "/api/auth/refresh-token".to_owned(),
            login_endpoint: "/api/auth/login".to_owned(),
            login_route: "/login".to_owned(),
            skew_margin_secs: 60,
            timeout_ms: 15000,
            state_dir: None,
            session_dir: None,
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!("--base-url must be an http:// or https:// URL");
        }
        for (flag, path) in
            [("--refresh-endpoint", &self.refresh_endpoint), ("--login-endpoint", &self.login_endpoint)]
        {
            if !path.starts_with('/') {
                anyhow::bail!("{flag} must start with '/'");
            }
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("--timeout-ms must be greater than zero");
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn skew_margin(&self) -> Duration {
        Duration::from_secs(self.skew_margin_secs)
    }

    /// Join an endpoint path onto the base URL.
    pub fn url(&self, path: &str) -> String {
        let base = self.base_url.trim_end_matches('/');
        if path.starts_with('/') {
            format!("{base}{path}")
        } else {
            format!("{base}/{path}")
        }
    }

    pub fn refresh_url(&self) -> String {
        self.url(&self.refresh_endpoint)
    }

    pub fn login_url(&self) -> String {
        self.url(&self.login_endpoint)
    }

    /// Resolve the directory for remembered credentials.
    ///
    /// Checks `--state-dir`, then `$XDG_STATE_HOME/harvest`,
    /// then `$HOME/.local/state/harvest`.
    pub fn state_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.state_dir {
            return dir.clone();
        }
        if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
            return PathBuf::from(xdg).join("harvest");
        }
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".local/state/harvest");
        }
        PathBuf::from(".harvest")
    }

    /// Resolve the directory for session-only credentials.
    ///
    /// `$XDG_RUNTIME_DIR` is wiped when the login session ends, which is
    /// the lifetime a session-only login should have.
    pub fn session_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.session_dir {
            return dir.clone();
        }
        if let Ok(runtime) = std::env::var("XDG_RUNTIME_DIR") {
            return PathBuf::from(runtime).join("harvest");
        }
        std::env::temp_dir().join("harvest-session")
    }
}

/// Command-line interface of the `harvest` binary.
#[derive(Debug, Parser)]
#[command(name = "harvest", version, about = "Marketplace session client")]
pub struct Cli {
    #[command(flatten)]
    pub config: ClientConfig,

    /// Log format (text or json). Logs go to stderr.
    #[arg(long, env = "HARVEST_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log filter (trace, debug, info, warn, error, or a `RUST_LOG`-style
    /// directive list).
    #[arg(long, env = "HARVEST_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn validate(&self) -> anyhow::Result<()> {
        self.config.validate()?;
        if !matches!(self.log_format.as_str(), "text" | "json") {
            anyhow::bail!("--log-format must be 'text' or 'json'");
        }
        if let Err(e) = tracing_subscriber::EnvFilter::try_new(&self.log_level) {
            anyhow::bail!("--log-level is not a valid filter: {e}");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Sign in and store the returned credentials.
    Login {
        #[arg(long, env = "HARVEST_EMAIL")]
        email: String,
        #[arg(long, env = "HARVEST_PASSWORD", hide_env_values = true)]
        password: String,
        /// Keep the session across restarts (stores a refresh token).
        #[arg(long)]
        remember: bool,
    },
    /// Forget all stored credentials.
    Logout,
    /// Show the signed-in user without touching the network.
    Status,
    /// Force a token refresh.
    Refresh,
    /// Send an authenticated request and print the response payload.
    Request {
        /// HTTP method (GET, POST, PUT, PATCH, DELETE).
        method: String,
        /// Endpoint path, e.g. `/api/products`.
        path: String,
        /// JSON request body.
        #[arg(long)]
        data: Option<String>,
    },
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;

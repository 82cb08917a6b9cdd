// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end session scenarios.
//!
//! Runs a scripted marketplace backend on a loopback port and builds
//! [`AuthClient`]s pointed at it.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use harvest::config::ClientConfig;
use harvest::pipeline::AuthClient;
use harvest::session::Navigator;
use harvest::store::CredentialStore;

/// How the refresh endpoint answers.
#[derive(Debug, Clone)]
pub enum RefreshPlan {
    /// Issue `fresh-<n>`, optionally rotating the refresh token to `rt-<n>`.
    Issue { rotate: bool, delay: Duration },
    /// Answer with the given status and no token.
    Reject(u16),
    /// Never answer within any reasonable client timeout.
    Stall,
}

impl Default for RefreshPlan {
    fn default() -> Self {
        Self::Issue { rotate: false, delay: Duration::ZERO }
    }
}

#[derive(Default)]
struct BackendState {
    valid: Mutex<HashSet<String>>,
    bearers: Mutex<Vec<Option<String>>>,
    refresh_tokens_seen: Mutex<Vec<String>>,
    refresh_calls: AtomicU32,
    plan: Mutex<RefreshPlan>,
    reject_all: AtomicBool,
}

impl BackendState {
    fn check(&self, headers: &HeaderMap) -> bool {
        let bearer = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(str::to_owned);
        self.bearers.lock().push(bearer.clone());
        if self.reject_all.load(Ordering::Relaxed) {
            return false;
        }
        bearer.is_some_and(|t| self.valid.lock().contains(&t))
    }
}

async fn products(State(s): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if !s.check(&headers) {
        return (StatusCode::UNAUTHORIZED, "token expired").into_response();
    }
    let body = serde_json::json!({
        "success": true,
        "data": [{ "id": 1, "name": "Heirloom tomatoes", "price": 4.5 }]
    });
    body.to_string().into_response()
}

async fn moved(State(s): State<Arc<BackendState>>, headers: HeaderMap) -> Response {
    if !s.check(&headers) {
        return (StatusCode::FOUND, [("location", "/Account/Login")]).into_response();
    }
    r#"{"success":true,"data":"here"}"#.into_response()
}

async fn refresh(
    State(s): State<Arc<BackendState>>,
    Form(form): Form<HashMap<String, String>>,
) -> Response {
    let n = s.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
    if let Some(rt) = form.get("refreshToken") {
        s.refresh_tokens_seen.lock().push(rt.clone());
    }
    let plan = s.plan.lock().clone();
    match plan {
        RefreshPlan::Issue { rotate, delay } => {
            tokio::time::sleep(delay).await;
            let token = format!("fresh-{n}");
            s.valid.lock().insert(token.clone());
            let mut body = serde_json::json!({
                "token": token,
                "expiration": "2099-01-01T00:00:00Z",
            });
            if rotate {
                body["refreshToken"] = format!("rt-{n}").into();
            }
            body.to_string().into_response()
        }
        RefreshPlan::Reject(status) => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_REQUEST);
            (status, r#"{"success":false,"error":"invalid refresh token"}"#).into_response()
        }
        RefreshPlan::Stall => {
            tokio::time::sleep(Duration::from_secs(30)).await;
            StatusCode::GATEWAY_TIMEOUT.into_response()
        }
    }
}

/// A scripted backend served on `127.0.0.1:<random>`. Stops on drop.
pub struct MockBackend {
    base_url: String,
    state: Arc<BackendState>,
    task: JoinHandle<()>,
}

impl MockBackend {
    pub async fn start() -> anyhow::Result<Self> {
        let state = Arc::new(BackendState::default());
        let app = Router::new()
            .route("/api/products", get(products).post(products))
            .route("/api/moved", get(moved))
            .route("/api/unavailable", get(|| async { StatusCode::BAD_GATEWAY }))
            .route("/api/auth/refresh-token", post(refresh))
            .with_state(Arc::clone(&state));

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { base_url: format!("http://{addr}"), state, task })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Client configuration pointed at this backend.
    pub fn config(&self) -> ClientConfig {
        ClientConfig { base_url: self.base_url.clone(), timeout_ms: 5000, ..ClientConfig::default() }
    }

    pub fn client(
        &self,
        store: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> anyhow::Result<AuthClient> {
        AuthClient::new(self.config(), store, navigator)
    }

    /// Treat `token` as a valid access token.
    pub fn accept(&self, token: &str) {
        self.state.valid.lock().insert(token.to_owned());
    }

    /// Answer every protected request with an authentication failure.
    pub fn reject_everything(&self) {
        self.state.reject_all.store(true, Ordering::Relaxed);
    }

    pub fn set_refresh_plan(&self, plan: RefreshPlan) {
        *self.state.plan.lock() = plan;
    }

    pub fn refresh_calls(&self) -> u32 {
        self.state.refresh_calls.load(Ordering::SeqCst)
    }

    /// Refresh tokens presented to the refresh endpoint, in order.
    pub fn refresh_tokens_seen(&self) -> Vec<String> {
        self.state.refresh_tokens_seen.lock().clone()
    }

    /// Bearer tokens presented to protected routes, in order.
    pub fn bearers(&self) -> Vec<Option<String>> {
        self.state.bearers.lock().clone()
    }
}

impl Drop for MockBackend {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request pipeline: every outbound request gets a bearer credential (with
//! a proactive refresh near expiry), and every inbound authentication
//! failure is recovered by one refresh and one retry.

use std::sync::Arc;

use reqwest::{Method, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::envelope::Envelope;
use crate::error::{ApiError, RefreshError};
use crate::refresh::{RefreshCoordinator, TokenResponse};
use crate::session::{Navigator, SessionEvents, SessionLifecycle};
use crate::store::{CredentialBundle, CredentialStore};

/// A request description that can be transmitted more than once.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), query: Vec::new(), body: None }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// A successful (2xx) response.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub envelope: Envelope,
}

impl ApiResponse {
    pub fn data(&self) -> &Value {
        self.envelope.data()
    }

    pub fn into_data(self) -> Value {
        self.envelope.into_data()
    }
}

/// Per-request bookkeeping carried through both phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    pub path: String,
    pub is_refresh: bool,
    pub retried: bool,
}

impl RequestContext {
    pub fn new(path: &str, refresh_endpoint: &str) -> Self {
        let bare = path.split('?').next().unwrap_or(path);
        Self { path: path.to_owned(), is_refresh: bare == refresh_endpoint, retried: false }
    }
}

/// How the inbound phase treats a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    ServerUnavailable,
    AuthFailure,
    Other,
}

impl StatusClass {
    pub fn of(status: StatusCode) -> Self {
        match status.as_u16() {
            200..=299 => Self::Success,
            502 => Self::ServerUnavailable,
            401 | 403 | 301 | 302 => Self::AuthFailure,
            _ => Self::Other,
        }
    }
}

enum Inbound {
    Done(Result<ApiResponse, ApiError>),
    Retry(String),
}

/// Authenticated HTTP client for the marketplace backend.
pub struct AuthClient {
    config: ClientConfig,
    http: reqwest::Client,
    store: Arc<CredentialStore>,
    coordinator: Arc<RefreshCoordinator>,
    lifecycle: SessionLifecycle,
    skew: time::Duration,
}

impl AuthClient {
    /// Wire the pipeline, coordinator and lifecycle around a store.
    pub fn new(
        config: ClientConfig,
        store: Arc<CredentialStore>,
        navigator: Arc<dyn Navigator>,
    ) -> anyhow::Result<Self> {
        config.validate()?;
        crate::ensure_crypto();
        // Redirects are authentication failures here, not something to follow.
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(config.timeout())
            .build()?;
        let events = SessionEvents::new();
        let coordinator = RefreshCoordinator::new(
            Arc::clone(&store),
            events.clone(),
            http.clone(),
            config.refresh_url(),
            config.timeout(),
        );
        let lifecycle =
            SessionLifecycle::new(Arc::clone(&store), navigator, events, config.login_route.clone());
        let skew = time::Duration::try_from(config.skew_margin()).unwrap_or(time::Duration::MAX);
        Ok(Self { skew, config, http, store, coordinator, lifecycle })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn lifecycle(&self) -> &SessionLifecycle {
        &self.lifecycle
    }

    pub fn events(&self) -> &SessionEvents {
        self.lifecycle.events()
    }

    pub async fn get(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::get(path)).await
    }

    pub async fn post(&self, path: &str, body: Value) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::post(path, body)).await
    }

    pub async fn put(&self, path: &str, body: Value) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::put(path, body)).await
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse, ApiError> {
        self.send(ApiRequest::delete(path)).await
    }

    /// Send a request through both pipeline phases.
    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
        let mut ctx = RequestContext::new(&request.path, &self.config.refresh_endpoint);
        let mut bearer = self.outbound(&ctx).await;
        loop {
            let resp = self.transmit(&request, bearer.as_deref()).await?;
            match self.inbound(&mut ctx, bearer.as_deref(), resp).await {
                Inbound::Done(result) => return result,
                Inbound::Retry(token) => bearer = Some(token),
            }
        }
    }

    /// Outbound phase: the bearer token to attach, if any.
    async fn outbound(&self, ctx: &RequestContext) -> Option<String> {
        if ctx.is_refresh {
            return None;
        }
        let token = self.store.access_token();
        if self.store.has_refresh_token() && self.near_expiry() {
            debug!(path = %ctx.path, "token near expiry, refreshing before send");
            match self.coordinator.refresh_stale(token.as_deref()).await {
                Ok(fresh) => return Some(fresh),
                // Proceed anyway; the inbound phase deals with the fallout.
                Err(e) => debug!(path = %ctx.path, err = %e, "proactive refresh failed"),
            }
        }
        self.store.access_token()
    }

    /// Whether the preferred expiry, less the skew margin, has passed.
    /// Saturates so expiries at the edge of the calendar count as past.
    fn near_expiry(&self) -> bool {
        let Some(expires_at) = self.store.expires_at() else {
            return false;
        };
        expires_at <= crate::now_utc().saturating_add(self.skew)
    }

    async fn transmit(
        &self,
        request: &ApiRequest,
        bearer: Option<&str>,
    ) -> Result<reqwest::Response, ApiError> {
        let mut builder = self.http.request(request.method.clone(), self.config.url(&request.path));
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }
        if let Some(token) = bearer {
            builder = builder.bearer_auth(token);
        }
        builder.send().await.map_err(|e| {
            debug!(path = %request.path, err = %e, "request failed in transport");
            ApiError::Network(e.to_string())
        })
    }

    /// Inbound phase for one response.
    async fn inbound(
        &self,
        ctx: &mut RequestContext,
        sent_with: Option<&str>,
        resp: reqwest::Response,
    ) -> Inbound {
        let status = resp.status();
        match StatusClass::of(status) {
            StatusClass::Success => Inbound::Done(Self::read_success(resp).await),
            StatusClass::ServerUnavailable => {
                warn!(path = %ctx.path, "server unavailable (502)");
                Inbound::Done(Err(ApiError::ServerUnavailable))
            }
            StatusClass::AuthFailure if !ctx.retried && !ctx.is_refresh => {
                debug!(path = %ctx.path, status = status.as_u16(), "authentication failed");
                if !self.store.has_refresh_token() {
                    return Inbound::Done(Err(self.expire()));
                }
                // Marked before waiting so a second failure cannot re-enter.
                ctx.retried = true;
                match self.coordinator.refresh_stale(sent_with).await {
                    Ok(token) => {
                        debug!(path = %ctx.path, "retrying with refreshed token");
                        Inbound::Retry(token)
                    }
                    Err(e) => {
                        warn!(path = %ctx.path, err = %e, "refresh failed after auth failure");
                        Inbound::Done(Err(self.expire()))
                    }
                }
            }
            StatusClass::AuthFailure | StatusClass::Other => {
                let body = resp.text().await.unwrap_or_default();
                Inbound::Done(Err(ApiError::Status { status: status.as_u16(), body }))
            }
        }
    }

    async fn read_success(resp: reqwest::Response) -> Result<ApiResponse, ApiError> {
        let status = resp.status().as_u16();
        let body = resp.text().await.map_err(|e| ApiError::Network(format!("read body: {e}")))?;
        Ok(ApiResponse { status, envelope: Envelope::parse(&body) })
    }

    fn expire(&self) -> ApiError {
        self.lifecycle.expire();
        ApiError::SessionExpired
    }

    /// Explicit login. Bypasses the pipeline like the refresh call does.
    /// Without `remember` the refresh token is discarded and the session
    /// lives in the ephemeral scope only.
    pub async fn login(
        &self,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<CredentialBundle, ApiError> {
        let resp = self
            .http
            .post(self.config.login_url())
            .json(&serde_json::json!({ "email": email, "password": password }))
            .send()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| ApiError::Network(format!("read body: {e}")))?;
        if status.as_u16() == 502 {
            return Err(ApiError::ServerUnavailable);
        }
        if !status.is_success() {
            let message = Envelope::parse(&body).error().map(str::to_owned).unwrap_or(body);
            return Err(ApiError::Status { status: status.as_u16(), body: message });
        }

        let mut bundle = TokenResponse::parse(&body)
            .and_then(TokenResponse::into_bundle)
            .map_err(|e: RefreshError| ApiError::Status { status: status.as_u16(), body: e.to_string() })?;
        if !remember {
            bundle.refresh_token = None;
        }
        self.lifecycle.begin(bundle.clone());
        Ok(bundle)
    }

    /// Explicit logout.
    pub fn logout(&self) {
        self.lifecycle.end();
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;

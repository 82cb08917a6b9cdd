// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight token refresh.
//!
//! At most one refresh call is in flight process-wide. The first caller
//! flips the coordinator from `Idle` to `Refreshing` and spawns the network
//! call; everyone arriving meanwhile joins the waiter queue. When the call
//! finishes the coordinator goes back to `Idle` and hands the same outcome
//! to every waiter in arrival order.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::envelope::Envelope;
use crate::error::RefreshError;
use crate::session::SessionEvents;
use crate::store::{parse_expiry, CredentialBundle, CredentialStore};

/// Outcome shared by every caller of one refresh operation.
pub type RefreshOutcome = Result<String, RefreshError>;

enum RefreshState {
    Idle,
    Refreshing { waiters: Vec<oneshot::Sender<RefreshOutcome>> },
}

/// Token body returned by the refresh and login endpoints.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResponse {
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub expiration: Option<Value>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub full_name: Option<String>,
}

impl TokenResponse {
    /// Decode a token body, bare or wrapped in the backend envelope.
    pub fn parse(body: &str) -> Result<Self, RefreshError> {
        let data = Envelope::parse(body).into_data();
        serde_json::from_value(data).map_err(|e| RefreshError::Malformed(e.to_string()))
    }

    /// Build a bundle. A missing or empty `token` is a failure whatever the
    /// transport said.
    pub fn into_bundle(self) -> Result<CredentialBundle, RefreshError> {
        let token = self
            .token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| RefreshError::Malformed("missing token".into()))?;
        let expires_at = self.expiration.as_ref().and_then(|v| match v {
            Value::String(s) => parse_expiry(s),
            Value::Number(n) => n.as_i64().and_then(|ms| parse_expiry(&ms.to_string())),
            _ => None,
        });
        let user_id = self.id.and_then(|v| match v {
            Value::String(s) if !s.is_empty() => Some(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        });
        Ok(CredentialBundle {
            access_token: token,
            expires_at,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
            role: self.role,
            user_id,
            full_name: self.full_name,
        })
    }
}

/// Guarantees one outstanding refresh at a time and fans out its result.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    store: Arc<CredentialStore>,
    events: SessionEvents,
    http: reqwest::Client,
    refresh_url: String,
    timeout: Duration,
}

impl RefreshCoordinator {
    pub fn new(
        store: Arc<CredentialStore>,
        events: SessionEvents,
        http: reqwest::Client,
        refresh_url: impl Into<String>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RefreshState::Idle),
            store,
            events,
            http,
            refresh_url: refresh_url.into(),
            timeout,
        })
    }

    pub fn refresh_url(&self) -> &str {
        &self.refresh_url
    }

    /// Whether a refresh call is currently outstanding.
    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), RefreshState::Refreshing { .. })
    }

    /// Refresh the access token, joining an in-flight refresh if there is
    /// one. Fails fast without a network call when no refresh token exists.
    pub async fn refresh(self: &Arc<Self>) -> RefreshOutcome {
        self.join(None).await
    }

    /// Like [`refresh`](Self::refresh), but first checks whether someone
    /// already replaced `observed` since the caller read it. If so, the
    /// current token is returned without a network call.
    pub async fn refresh_stale(self: &Arc<Self>, observed: Option<&str>) -> RefreshOutcome {
        self.join(Some(observed)).await
    }

    async fn join(self: &Arc<Self>, observed: Option<Option<&str>>) -> RefreshOutcome {
        let rx = {
            let mut state = self.state.lock();
            let (tx, rx) = oneshot::channel();
            match &mut *state {
                RefreshState::Refreshing { waiters } => {
                    waiters.push(tx);
                    debug!(waiters = waiters.len(), "joined in-flight refresh");
                }
                RefreshState::Idle => {
                    if let Some(observed) = observed {
                        if let Some(current) = self.store.access_token() {
                            if Some(current.as_str()) != observed {
                                debug!("token already replaced, skipping refresh");
                                return Ok(current);
                            }
                        }
                    }
                    if !self.store.has_refresh_token() {
                        return Err(RefreshError::NoRefreshToken);
                    }
                    *state = RefreshState::Refreshing { waiters: vec![tx] };
                    let this = Arc::clone(self);
                    tokio::spawn(async move {
                        let outcome = this.perform().await;
                        this.complete(outcome);
                    });
                }
            }
            rx
        };
        rx.await.unwrap_or(Err(RefreshError::Abandoned))
    }

    /// Reset to `Idle`, then deliver to every waiter in arrival order. A
    /// waiter that went away is skipped.
    fn complete(&self, outcome: RefreshOutcome) {
        let waiters = match std::mem::replace(&mut *self.state.lock(), RefreshState::Idle) {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        };
        debug!(waiters = waiters.len(), ok = outcome.is_ok(), "refresh settled");
        for tx in waiters {
            let _ = tx.send(outcome.clone());
        }
    }

    async fn perform(&self) -> RefreshOutcome {
        match tokio::time::timeout(self.timeout, self.do_refresh()).await {
            Ok(Ok(bundle)) => {
                info!("access token refreshed");
                let token = bundle.access_token.clone();
                self.events.notify_refreshed(bundle);
                Ok(token)
            }
            Ok(Err(e)) => {
                warn!(err = %e, "token refresh failed");
                Err(e)
            }
            Err(_) => {
                warn!(timeout_ms = self.timeout.as_millis() as u64, "token refresh timed out");
                Err(RefreshError::Timeout)
            }
        }
    }

    /// One refresh call. Persists the new bundle only on success.
    async fn do_refresh(&self) -> Result<CredentialBundle, RefreshError> {
        let refresh_token = self.store.refresh_token().ok_or(RefreshError::NoRefreshToken)?;

        let resp = self
            .http
            .post(&self.refresh_url)
            .form(&[("refreshToken", refresh_token.as_str())])
            .send()
            .await
            .map_err(|e| RefreshError::Transport(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| RefreshError::Transport(format!("read body: {e}")))?;
        if !status.is_success() {
            return Err(RefreshError::Status { status: status.as_u16(), body });
        }

        let bundle = TokenResponse::parse(&body)?.into_bundle()?;
        let failed = self.store.write_remembered(&bundle);
        if failed > 0 {
            warn!(failed, "some refreshed credentials were not persisted");
        }
        self.store.clear_auth_shadow();
        Ok(bundle)
    }
}

#[cfg(test)]
#[path = "refresh_tests.rs"]
mod tests;

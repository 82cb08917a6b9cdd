// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Passive view of who is signed in, kept current from session events.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::session::{SessionEvent, SessionEvents};
use crate::store::{CredentialBundle, CredentialStore, ReadRule};

/// The signed-in user, as far as local storage knows. Never touches the
/// network.
pub struct AuthContext {
    store: Arc<CredentialStore>,
    current: RwLock<Option<CredentialBundle>>,
}

impl AuthContext {
    /// Snapshot the store, reading each key from either scope.
    pub fn load(store: Arc<CredentialStore>) -> Arc<Self> {
        let current = store.snapshot(ReadRule::Either);
        Arc::new(Self { store, current: RwLock::new(current) })
    }

    pub fn current(&self) -> Option<CredentialBundle> {
        self.current.read().clone()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current.read().is_some()
    }

    pub fn role(&self) -> Option<String> {
        self.current.read().as_ref().and_then(|b| b.role.clone())
    }

    pub fn full_name(&self) -> Option<String> {
        self.current.read().as_ref().and_then(|b| b.full_name.clone())
    }

    /// Re-read the store.
    pub fn reload(&self) {
        *self.current.write() = self.store.snapshot(ReadRule::Either);
    }

    fn apply(&self, event: SessionEvent) {
        match event {
            SessionEvent::SignedIn { bundle } => {
                *self.current.write() = Some(bundle);
            }
            SessionEvent::Refreshed { bundle } => {
                let mut current = self.current.write();
                // A refresh may omit profile fields; keep the known ones.
                let merged = match current.take() {
                    Some(prev) => CredentialBundle {
                        role: bundle.role.or(prev.role),
                        user_id: bundle.user_id.or(prev.user_id),
                        full_name: bundle.full_name.or(prev.full_name),
                        refresh_token: bundle.refresh_token.or(prev.refresh_token),
                        ..bundle
                    },
                    None => bundle,
                };
                *current = Some(merged);
            }
            SessionEvent::Expired | SessionEvent::SignedOut => {
                *self.current.write() = None;
            }
        }
    }

    /// Follow session events until the hub is dropped. A lagged receiver
    /// has missed changes and reloads from the store instead.
    pub fn spawn_sync(self: &Arc<Self>, events: &SessionEvents) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let mut rx = events.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => this.apply(event),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("auth context lagged {n} events, reloading");
                        this.reload();
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        debug!("session event channel closed");
                        break;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "context_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end session scenarios against a scripted backend.

use std::sync::Arc;
use std::time::Duration;

use harvest::error::ApiError;
use harvest::session::SessionEvent;
use harvest::store::{
    CredentialBundle, CredentialKey, CredentialStore, FileScope, MemoryScope, ScopeKind,
    StorageScope,
};
use harvest::test_support::RecordingNavigator;
use harvest_specs::{MockBackend, RefreshPlan};
use time::OffsetDateTime;

fn in_secs(secs: i64) -> OffsetDateTime {
    OffsetDateTime::now_utc() + time::Duration::seconds(secs)
}

fn remembered(token: &str, expires_in: i64) -> CredentialBundle {
    CredentialBundle::new(token).with_expires_at(in_secs(expires_in)).with_refresh_token("rt-0")
}

fn assert_fully_cleared(store: &CredentialStore) {
    for kind in [ScopeKind::Ephemeral, ScopeKind::Persistent] {
        for key in CredentialKey::ALL {
            assert_eq!(store.read_scope(kind, key), None, "{key:?} left in {kind:?}");
        }
    }
}

#[tokio::test]
async fn near_expiry_refreshes_before_sending() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let store = Arc::new(CredentialStore::in_memory());
    store.write_remembered(&remembered("old", 30));
    let client = backend.client(Arc::clone(&store), Arc::new(RecordingNavigator::at("/shop")))?;

    let resp = client.get("/api/products").await?;

    assert_eq!(resp.status, 200);
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.bearers(), vec![Some("fresh-1".to_owned())]);
    Ok(())
}

#[tokio::test]
async fn failed_proactive_refresh_still_sends_then_expires() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_plan(RefreshPlan::Reject(400));
    let store = Arc::new(CredentialStore::in_memory());
    store.write_remembered(&remembered("old", 30));
    let navigator = Arc::new(RecordingNavigator::at("/shop"));
    let client = backend.client(Arc::clone(&store), navigator.clone())?;

    let result = client.get("/api/products").await;

    // One proactive attempt before sending, one reactive attempt after the 401.
    assert_eq!(backend.refresh_calls(), 2);
    assert_eq!(backend.bearers(), vec![Some("old".to_owned())]);
    assert_eq!(result.err(), Some(ApiError::SessionExpired));
    assert_fully_cleared(&store);
    assert_eq!(navigator.redirects(), vec!["/login".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn simultaneous_requests_share_one_refresh() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_plan(RefreshPlan::Issue { rotate: false, delay: Duration::from_millis(100) });
    let store = Arc::new(CredentialStore::in_memory());
    store.write_remembered(&remembered("old", -60));
    let client = backend.client(Arc::clone(&store), Arc::new(RecordingNavigator::at("/shop")))?;

    let (a, b, c) = tokio::join!(
        client.get("/api/products"),
        client.get("/api/products"),
        client.get("/api/products"),
    );

    assert!(a.is_ok() && b.is_ok() && c.is_ok());
    assert_eq!(backend.refresh_calls(), 1);
    let bearers = backend.bearers();
    assert_eq!(bearers.len(), 3);
    assert!(bearers.iter().all(|b| b.as_deref() == Some("fresh-1")), "{bearers:?}");
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn single_flight_across_tasks() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_plan(RefreshPlan::Issue { rotate: true, delay: Duration::from_millis(150) });
    let store = Arc::new(CredentialStore::in_memory());
    store.write_remembered(&remembered("old", -60));
    let client =
        Arc::new(backend.client(Arc::clone(&store), Arc::new(RecordingNavigator::at("/shop")))?);

    let mut tasks = tokio::task::JoinSet::new();
    for _ in 0..8 {
        let client = Arc::clone(&client);
        tasks.spawn(async move { client.get("/api/products").await });
    }
    while let Some(joined) = tasks.join_next().await {
        joined??;
    }

    assert_eq!(backend.refresh_calls(), 1);
    assert!(backend.bearers().iter().all(|b| b.as_deref() == Some("fresh-1")));
    assert_eq!(store.refresh_token().as_deref(), Some("rt-1"));
    Ok(())
}

#[tokio::test]
async fn refresh_transport_failure_ends_session() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_plan(RefreshPlan::Stall);
    let store = Arc::new(CredentialStore::in_memory());
    store.write_remembered(&remembered("revoked", 3600));
    let navigator = Arc::new(RecordingNavigator::at("/shop"));
    let config = harvest::config::ClientConfig { timeout_ms: 300, ..backend.config() };
    let client = harvest::pipeline::AuthClient::new(config, Arc::clone(&store), navigator.clone())?;
    let mut events = client.events().subscribe();

    let result = client.get("/api/products").await;

    assert_eq!(result.err(), Some(ApiError::SessionExpired));
    assert_eq!(backend.bearers().len(), 1, "original request must not be retried");
    assert_fully_cleared(&store);
    assert_eq!(navigator.redirects(), vec!["/login".to_owned()]);
    assert_eq!(events.try_recv()?, SessionEvent::Expired);
    Ok(())
}

#[tokio::test]
async fn no_refresh_token_expires_without_network() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let store = Arc::new(CredentialStore::in_memory());
    // Session-only, already past expiry.
    store.write_session(&CredentialBundle::new("old").with_expires_at(in_secs(-60)));
    let navigator = Arc::new(RecordingNavigator::at("/shop"));
    let client = backend.client(Arc::clone(&store), navigator.clone())?;

    let result = client.get("/api/products").await;

    assert_eq!(result.err(), Some(ApiError::SessionExpired));
    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(backend.bearers(), vec![Some("old".to_owned())]);
    assert_fully_cleared(&store);
    assert_eq!(navigator.redirect_count(), 1);
    Ok(())
}

#[tokio::test]
async fn no_redirect_when_already_at_login() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let store = Arc::new(CredentialStore::in_memory());
    store.write_session(&CredentialBundle::new("old"));
    let navigator = Arc::new(RecordingNavigator::at("/login"));
    let client = backend.client(Arc::clone(&store), navigator.clone())?;

    let result = client.get("/api/moved").await;

    assert_eq!(result.err(), Some(ApiError::SessionExpired));
    assert_eq!(navigator.redirect_count(), 0);
    assert_fully_cleared(&store);
    Ok(())
}

#[tokio::test]
async fn rotation_replaces_refresh_token() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_plan(RefreshPlan::Issue { rotate: true, delay: Duration::ZERO });
    let store = Arc::new(CredentialStore::in_memory());
    store.write_remembered(&remembered("a", 3600));
    let client = backend.client(Arc::clone(&store), Arc::new(RecordingNavigator::at("/")))?;

    assert_eq!(client.coordinator().refresh().await?, "fresh-1");
    assert_eq!(store.refresh_token().as_deref(), Some("rt-1"));
    assert_eq!(store.read_either(CredentialKey::RefreshToken).as_deref(), Some("rt-1"));

    client.coordinator().refresh().await?;
    assert_eq!(backend.refresh_tokens_seen(), vec!["rt-0".to_owned(), "rt-1".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn refreshed_token_is_not_shadowed() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let ephemeral = Arc::new(MemoryScope::new());
    let store = Arc::new(CredentialStore::new(ephemeral.clone(), Arc::new(MemoryScope::new())));
    store.write_remembered(&remembered("persisted", 3600));
    // Leftover of an earlier session-only login in the same profile.
    ephemeral.set("token", "stale")?;
    ephemeral.set("expiration", "2099-01-01T00:00:00Z")?;
    let client = backend.client(Arc::clone(&store), Arc::new(RecordingNavigator::at("/")))?;

    client.get("/api/products").await?;

    assert_eq!(store.access_token().as_deref(), Some("fresh-1"));
    assert_eq!(ephemeral.get("token")?, None);
    assert_eq!(ephemeral.get("expiration")?, None);
    Ok(())
}

#[tokio::test]
async fn second_auth_failure_is_not_retried() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.reject_everything();
    let store = Arc::new(CredentialStore::in_memory());
    store.write_remembered(&remembered("a", 3600));
    let navigator = Arc::new(RecordingNavigator::at("/shop"));
    let client = backend.client(Arc::clone(&store), navigator.clone())?;

    let result = client.get("/api/products").await;

    assert!(matches!(result, Err(ApiError::Status { status: 401, .. })), "got {result:?}");
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.bearers(), vec![Some("a".to_owned()), Some("fresh-1".to_owned())]);
    assert_eq!(navigator.redirect_count(), 0);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_ends_session() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    backend.set_refresh_plan(RefreshPlan::Reject(400));
    let store = Arc::new(CredentialStore::in_memory());
    store.write_remembered(&remembered("a", 3600));
    let navigator = Arc::new(RecordingNavigator::at("/orders"));
    let client = backend.client(Arc::clone(&store), navigator.clone())?;

    let result = client.get("/api/moved").await;

    assert_eq!(result.err(), Some(ApiError::SessionExpired));
    assert_eq!(backend.refresh_calls(), 1);
    assert_fully_cleared(&store);
    assert_eq!(navigator.redirects(), vec!["/login".to_owned()]);
    Ok(())
}

#[tokio::test]
async fn bad_gateway_keeps_session() -> anyhow::Result<()> {
    let backend = MockBackend::start().await?;
    let store = Arc::new(CredentialStore::in_memory());
    store.write_remembered(&remembered("a", 3600));
    let client = backend.client(Arc::clone(&store), Arc::new(RecordingNavigator::at("/")))?;

    let result = client.get("/api/unavailable").await;

    assert_eq!(result.err(), Some(ApiError::ServerUnavailable));
    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(store.access_token().as_deref(), Some("a"));
    Ok(())
}

#[test]
fn clear_is_idempotent_on_disk() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let store = CredentialStore::new(
        Arc::new(FileScope::new(dir.path().join("session.json"))),
        Arc::new(FileScope::new(dir.path().join("credentials.json"))),
    );
    store.write_remembered(&CredentialBundle::new("a").with_refresh_token("rt"));

    store.clear_all();
    store.clear_all();

    assert_fully_cleared(&store);
    assert!(!dir.path().join("credentials.json").exists());
    Ok(())
}

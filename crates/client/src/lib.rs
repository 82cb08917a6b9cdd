// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Harvest: authenticated HTTP client for the marketplace REST backend.
//!
//! Every request goes through [`pipeline::AuthClient`], which attaches the
//! bearer credential, refreshes it before expiry, and recovers from
//! authentication failures with a single retry. Refreshes are single-flight
//! ([`refresh::RefreshCoordinator`]) and credentials live in two storage
//! scopes with fixed precedence ([`store::CredentialStore`]).

pub mod command;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod pipeline;
pub mod refresh;
pub mod session;
pub mod store;
pub mod test_support;

use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Current wall-clock time in UTC.
pub(crate) fn now_utc() -> time::OffsetDateTime {
    time::OffsetDateTime::now_utc()
}

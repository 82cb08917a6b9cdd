// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential store over two storage scopes.
//!
//! The ephemeral scope holds session-only logins; the persistent scope holds
//! remembered logins (the ones with a refresh token). Fields are stored as
//! independent keys, so partial writes and removals are possible and the
//! read-preference rule below is what keeps a stale value in one scope from
//! shadowing a fresh one in the other.

pub mod scope;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};
use tracing::warn;

pub use scope::{FileScope, MemoryScope, StorageError, StorageScope};

/// A credential field, named by its storage key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CredentialKey {
    AccessToken,
    ExpiresAt,
    RefreshToken,
    Role,
    UserId,
    FullName,
}

impl CredentialKey {
    pub const ALL: [CredentialKey; 6] = [
        Self::AccessToken,
        Self::ExpiresAt,
        Self::RefreshToken,
        Self::Role,
        Self::UserId,
        Self::FullName,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AccessToken => "token",
            Self::ExpiresAt => "expiration",
            Self::RefreshToken => "refreshToken",
            Self::Role => "role",
            Self::UserId => "userId",
            Self::FullName => "fullName",
        }
    }

    /// User profile fields, as opposed to token material.
    pub fn is_profile(&self) -> bool {
        matches!(self, Self::Role | Self::UserId | Self::FullName)
    }
}

/// Which of the two physical scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Ephemeral,
    Persistent,
}

impl ScopeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ephemeral => "ephemeral",
            Self::Persistent => "persistent",
        }
    }
}

/// Read rule used when assembling a [`CredentialBundle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRule {
    /// Remembered-aware precedence; used for request authorization.
    Preferred,
    /// Ephemeral then persistent; passive status checks only.
    Either,
}

/// Access token plus the profile fields that travel with it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialBundle {
    pub access_token: String,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub expires_at: Option<OffsetDateTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
}

impl CredentialBundle {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            expires_at: None,
            refresh_token: None,
            role: None,
            user_id: None,
            full_name: None,
        }
    }

    #[must_use]
    pub fn with_expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    #[must_use]
    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    #[must_use]
    pub fn with_profile(
        mut self,
        role: Option<String>,
        user_id: Option<String>,
        full_name: Option<String>,
    ) -> Self {
        self.role = role;
        self.user_id = user_id;
        self.full_name = full_name;
        self
    }

    /// Whether this bundle belongs to a remembered session.
    pub fn is_remembered(&self) -> bool {
        self.refresh_token.is_some()
    }

    fn fields(&self) -> Vec<(CredentialKey, Option<String>)> {
        vec![
            (CredentialKey::AccessToken, Some(self.access_token.clone())),
            (CredentialKey::ExpiresAt, self.expires_at.and_then(format_expiry)),
            (CredentialKey::Role, self.role.clone()),
            (CredentialKey::UserId, self.user_id.clone()),
            (CredentialKey::FullName, self.full_name.clone()),
        ]
    }
}

/// Format an expiry timestamp the way it is stored.
pub fn format_expiry(at: OffsetDateTime) -> Option<String> {
    at.format(&Rfc3339).ok()
}

/// Parse a stored or wire expiry: RFC 3339, offset-less ISO 8601 (taken as
/// UTC), or epoch milliseconds.
pub fn parse_expiry(raw: &str) -> Option<OffsetDateTime> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(at) = OffsetDateTime::parse(raw, &Rfc3339) {
        return Some(at);
    }
    if let Ok(at) = PrimitiveDateTime::parse(raw, &Iso8601::DEFAULT) {
        return Some(at.assume_utc());
    }
    let millis: i64 = raw.parse().ok()?;
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(millis) * 1_000_000).ok()
}

/// Credential store: the sole writer of credential keys in both scopes.
pub struct CredentialStore {
    ephemeral: Arc<dyn StorageScope>,
    persistent: Arc<dyn StorageScope>,
}

impl CredentialStore {
    pub fn new(ephemeral: Arc<dyn StorageScope>, persistent: Arc<dyn StorageScope>) -> Self {
        Self { ephemeral, persistent }
    }

    /// Store with both scopes in memory.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryScope::new()), Arc::new(MemoryScope::new()))
    }

    fn scope(&self, kind: ScopeKind) -> &dyn StorageScope {
        match kind {
            ScopeKind::Ephemeral => self.ephemeral.as_ref(),
            ScopeKind::Persistent => self.persistent.as_ref(),
        }
    }

    /// Read one key from one scope. A failing read counts as absent.
    pub fn read_scope(&self, kind: ScopeKind, key: CredentialKey) -> Option<String> {
        match self.scope(kind).get(key.as_str()) {
            Ok(value) => value.filter(|v| !v.is_empty()),
            Err(e) => {
                warn!(scope = kind.as_str(), err = %e, "credential read failed");
                None
            }
        }
    }

    fn read_in_order(&self, first: ScopeKind, second: ScopeKind, key: CredentialKey) -> Option<String> {
        self.read_scope(first, key).or_else(|| self.read_scope(second, key))
    }

    /// The refresh token, which only ever lives in the persistent scope.
    pub fn refresh_token(&self) -> Option<String> {
        self.read_scope(ScopeKind::Persistent, CredentialKey::RefreshToken)
    }

    pub fn has_refresh_token(&self) -> bool {
        self.refresh_token().is_some()
    }

    /// Remembered sessions read persistent first; session-only logins read
    /// ephemeral first so leftovers of an earlier remembered session on the
    /// same machine cannot win.
    pub fn read_preferred(&self, key: CredentialKey) -> Option<String> {
        if self.has_refresh_token() {
            self.read_in_order(ScopeKind::Persistent, ScopeKind::Ephemeral, key)
        } else {
            self.read_in_order(ScopeKind::Ephemeral, ScopeKind::Persistent, key)
        }
    }

    /// Ephemeral then persistent, regardless of session kind.
    pub fn read_either(&self, key: CredentialKey) -> Option<String> {
        self.read_in_order(ScopeKind::Ephemeral, ScopeKind::Persistent, key)
    }

    pub fn read(&self, rule: ReadRule, key: CredentialKey) -> Option<String> {
        match rule {
            ReadRule::Preferred => self.read_preferred(key),
            ReadRule::Either => self.read_either(key),
        }
    }

    /// Preferred access token and its parsed expiry.
    pub fn access_token(&self) -> Option<String> {
        self.read_preferred(CredentialKey::AccessToken)
    }

    pub fn expires_at(&self) -> Option<OffsetDateTime> {
        self.read_preferred(CredentialKey::ExpiresAt).as_deref().and_then(parse_expiry)
    }

    /// Assemble the whole bundle under one read rule.
    pub fn snapshot(&self, rule: ReadRule) -> Option<CredentialBundle> {
        let access_token = self.read(rule, CredentialKey::AccessToken)?;
        Some(CredentialBundle {
            access_token,
            expires_at: self.read(rule, CredentialKey::ExpiresAt).as_deref().and_then(parse_expiry),
            refresh_token: self.refresh_token(),
            role: self.read(rule, CredentialKey::Role),
            user_id: self.read(rule, CredentialKey::UserId),
            full_name: self.read(rule, CredentialKey::FullName),
        })
    }

    fn write_fields(&self, kind: ScopeKind, fields: Vec<(CredentialKey, Option<String>)>) -> usize {
        let scope = self.scope(kind);
        let mut failed = 0;
        for (key, value) in fields {
            let result = match value {
                Some(ref v) => scope.set(key.as_str(), v),
                None => scope.remove(key.as_str()),
            };
            if let Err(e) = result {
                warn!(scope = kind.as_str(), err = %e, "credential write failed");
                failed += 1;
            }
        }
        failed
    }

    /// Write a bundle to the persistent scope only. A bundle without a
    /// refresh token keeps the stored one; a bundle with one replaces it.
    /// Missing profile fields keep their stored values the same way.
    /// Returns the number of keys that failed to write.
    pub fn write_remembered(&self, bundle: &CredentialBundle) -> usize {
        let mut fields = bundle.fields();
        fields.retain(|(key, value)| value.is_some() || !key.is_profile());
        if let Some(ref rt) = bundle.refresh_token {
            fields.push((CredentialKey::RefreshToken, Some(rt.clone())));
        }
        self.write_fields(ScopeKind::Persistent, fields)
    }

    /// Write a session-only bundle to the ephemeral scope. The refresh
    /// token is never written here.
    pub fn write_session(&self, bundle: &CredentialBundle) -> usize {
        self.write_fields(ScopeKind::Ephemeral, bundle.fields())
    }

    /// Drop the ephemeral access token and expiry after a persistent write.
    pub fn clear_auth_shadow(&self) {
        for key in [CredentialKey::AccessToken, CredentialKey::ExpiresAt] {
            if let Err(e) = self.ephemeral.remove(key.as_str()) {
                warn!(scope = "ephemeral", err = %e, "failed to clear shadowed credential");
            }
        }
    }

    /// Remove every credential key from both scopes. Each removal is
    /// attempted even if others fail.
    pub fn clear_all(&self) {
        for kind in [ScopeKind::Ephemeral, ScopeKind::Persistent] {
            let scope = self.scope(kind);
            for key in CredentialKey::ALL {
                if let Err(e) = scope.remove(key.as_str()) {
                    warn!(scope = kind.as_str(), err = %e, "failed to clear credential");
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Outcome of a request that did not produce a usable response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApiError {
    /// No response was received (connect, DNS, timeout, broken body).
    Network(String),
    /// The backend answered 502.
    ServerUnavailable,
    /// Authentication failed and could not be recovered by a refresh.
    SessionExpired,
    /// Any other non-success status, passed through untouched.
    Status { status: u16, body: String },
    /// The request could not be built (bad method, bad URL).
    InvalidRequest(String),
}

impl ApiError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Network(_) => "NETWORK",
            Self::ServerUnavailable => "SERVER_UNAVAILABLE",
            Self::SessionExpired => "SESSION_EXPIRED",
            Self::Status { .. } => "STATUS",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    /// HTTP status carried by the error, if the backend sent one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ServerUnavailable => Some(502),
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Whether the user should simply try again later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::ServerUnavailable)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "cannot reach the server: {msg}"),
            Self::ServerUnavailable => {
                f.write_str("server is temporarily unavailable, please try again later")
            }
            Self::SessionExpired => f.write_str("session expired, please log in again"),
            Self::Status { status, body } if body.is_empty() => write!(f, "HTTP {status}"),
            Self::Status { status, body } => write!(f, "HTTP {status}: {body}"),
            Self::InvalidRequest(msg) => write!(f, "invalid request: {msg}"),
        }
    }
}

impl std::error::Error for ApiError {}

/// Failure of a single refresh operation, delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshError {
    /// Session-only login: there is nothing to refresh with.
    NoRefreshToken,
    /// The refresh call never got a response.
    Transport(String),
    /// The refresh endpoint answered with a non-success status.
    Status { status: u16, body: String },
    /// The body could not be decoded or carried no token.
    Malformed(String),
    /// The refresh call exceeded the configured timeout.
    Timeout,
    /// The refresh task went away without reporting an outcome.
    Abandoned,
}

impl RefreshError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NoRefreshToken => "NO_REFRESH_TOKEN",
            Self::Transport(_) => "TRANSPORT",
            Self::Status { .. } => "STATUS",
            Self::Malformed(_) => "MALFORMED",
            Self::Timeout => "TIMEOUT",
            Self::Abandoned => "ABANDONED",
        }
    }
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoRefreshToken => f.write_str("no refresh token"),
            Self::Transport(msg) => write!(f, "refresh request failed: {msg}"),
            Self::Status { status, body } => write!(f, "refresh rejected ({status}): {body}"),
            Self::Malformed(msg) => write!(f, "malformed refresh response: {msg}"),
            Self::Timeout => f.write_str("refresh timed out"),
            Self::Abandoned => f.write_str("refresh abandoned"),
        }
    }
}

impl std::error::Error for RefreshError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;

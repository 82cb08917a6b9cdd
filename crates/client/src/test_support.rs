// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test doubles shared by unit tests and the scenario suite.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::session::Navigator;
use crate::store::{MemoryScope, StorageError, StorageScope};

/// Navigator that records every redirect.
pub struct RecordingNavigator {
    location: Mutex<String>,
    redirects: Mutex<Vec<String>>,
}

impl RecordingNavigator {
    pub fn at(location: impl Into<String>) -> Self {
        Self { location: Mutex::new(location.into()), redirects: Mutex::new(Vec::new()) }
    }

    pub fn redirects(&self) -> Vec<String> {
        self.redirects.lock().clone()
    }

    pub fn redirect_count(&self) -> usize {
        self.redirects.lock().len()
    }
}

impl Navigator for RecordingNavigator {
    fn current_location(&self) -> String {
        self.location.lock().clone()
    }

    fn redirect(&self, location: &str) {
        *self.location.lock() = location.to_owned();
        self.redirects.lock().push(location.to_owned());
    }
}

/// In-memory scope whose operations fail for a chosen set of keys, the way
/// a full quota or a locked-down profile would.
pub struct FlakyScope {
    inner: MemoryScope,
    failing: HashSet<String>,
}

impl FlakyScope {
    pub fn failing_on(keys: &[&str]) -> Self {
        Self { inner: MemoryScope::new(), failing: keys.iter().map(|k| (*k).to_owned()).collect() }
    }

    /// The underlying storage, bypassing the injected failures.
    pub fn inner(&self) -> &MemoryScope {
        &self.inner
    }

    fn check(&self, key: &str) -> Result<(), StorageError> {
        if self.failing.contains(key) {
            return Err(StorageError::new(key, "quota exceeded"));
        }
        Ok(())
    }
}

impl StorageScope for FlakyScope {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.check(key)?;
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check(key)?;
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check(key)?;
        self.inner.remove(key)
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

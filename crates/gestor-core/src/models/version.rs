//! Optimistic concurrency token.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Version stamp carried by every mutable record.
///
/// Callers hand back the token they last read; the store only applies
/// the write if the stored token is still the same, then moves it to
/// [`ConcurrencyToken::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConcurrencyToken(u64);

impl ConcurrencyToken {
    /// Token of a freshly created record.
    pub const INITIAL: Self = Self(1);

    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn value(self) -> u64 {
        self.0
    }

    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for ConcurrencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

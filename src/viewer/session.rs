//! Session tokens.
//!
//! Every slide selection starts a new session identified by a token drawn
//! from a monotonically increasing counter. Asynchronous results carry the
//! token that was current when they were requested and are applied only while
//! that token is still current.

use std::fmt;

/// Identifier of one slide selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(u64);

impl SessionToken {
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// The token following this one.
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

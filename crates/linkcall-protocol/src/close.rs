//! Close-code policy.
//!
//! | code        | meaning                          | reconnect |
//! |-------------|----------------------------------|-----------|
//! | 4001        | unauthorized, publish and stop   | no        |
//! | 4000..=4099 | terminal protocol error          | no        |
//! | anything else, or no code | transient          | yes       |

use std::ops::RangeInclusive;

/// Close code the server uses for authentication failure.
pub const UNAUTHORIZED: u16 = 4001;

/// Close codes after which the client must not reconnect.
pub const NON_RETRYABLE: RangeInclusive<u16> = 4000..=4099;

/// What the transport does after the socket closes with a given code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosePolicy {
    /// Publish `unauthorized` and stay closed.
    Unauthorized,
    /// Stay closed.
    Terminal,
    /// Schedule a reconnect.
    Reconnect,
}

impl ClosePolicy {
    /// Classifies a close code. A missing code counts as transient.
    pub fn for_code(code: Option<u16>) -> Self {
        match code {
            Some(UNAUTHORIZED) => Self::Unauthorized,
            Some(c) if NON_RETRYABLE.contains(&c) => Self::Terminal,
            _ => Self::Reconnect,
        }
    }

    /// Returns true if the transport should reconnect.
    pub fn allows_reconnect(self) -> bool {
        matches!(self, Self::Reconnect)
    }
}

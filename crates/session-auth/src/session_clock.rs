//! Remaining-time computation with debounced publication.

use crate::token_codec;

/// Milliseconds until `token` expires, floored at zero.
///
/// `None` when there is no token or it cannot be decoded.
pub fn remaining_ms(token: Option<&str>, now_ms: i64) -> Option<i64> {
    let claims = token_codec::decode(token?).ok()?;
    Some(claims.expires_at_ms().saturating_sub(now_ms).max(0))
}

/// Tracks the last published remaining time and filters out small changes.
///
/// A value is published when it differs from the last one by at least the
/// debounce threshold, when a session appears or disappears, or when the
/// countdown reaches zero.
#[derive(Debug, Clone)]
pub struct SessionClock {
    debounce_ms: i64,
    published: Option<i64>,
}

impl SessionClock {
    pub fn new(debounce_ms: u64) -> Self {
        Self {
            debounce_ms: i64::try_from(debounce_ms).unwrap_or(i64::MAX),
            published: None,
        }
    }

    /// Last published value.
    pub fn current(&self) -> Option<i64> {
        self.published
    }

    /// Offer a freshly computed value. Returns `true` when it was published.
    pub fn offer(&mut self, remaining: Option<i64>) -> bool {
        let publish = match (self.published, remaining) {
            (Some(old), Some(new)) if old == new => false,
            (None, None) => false,
            (Some(_), Some(0)) => true,
            (Some(old), Some(new)) => old.abs_diff(new) >= self.debounce_ms.unsigned_abs(),
            (None, Some(_)) | (Some(_), None) => true,
        };
        if publish {
            self.published = remaining;
        }
        publish
    }

    /// Forget the published value so the next offer always publishes.
    pub fn reset(&mut self) {
        self.published = None;
    }
}

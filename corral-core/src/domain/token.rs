//! Registration token

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Token that authenticates runners of a host to the coordinator
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistrationToken {
    pub value: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl RegistrationToken {
    /// Creates a token issued now that lives for `ttl`
    pub fn issued_now(value: impl Into<String>, ttl: Duration) -> Self {
        let issued_at = Utc::now();
        Self {
            value: value.into(),
            issued_at,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Time left before expiry (zero once expired)
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }

    /// Total lifetime the token was issued with
    pub fn lifetime(&self) -> Duration {
        self.expires_at - self.issued_at
    }
}

// Never print the secret.
impl std::fmt::Debug for RegistrationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationToken")
            .field("value", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

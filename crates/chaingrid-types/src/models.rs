use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A registration waiting for its OTP to be confirmed.
///
/// Lives only in the staging store. The password is already hashed when the
/// record is built, so nothing in here is ever re-hashed on commit.
#[derive(Clone, PartialEq, Eq)]
pub struct StagedRegistration {
    /// Opaque key handed to the client by `send-otp`.
    pub token: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub referral_code: Option<String>,
    pub password_hash: String,
    pub otp_code: String,
    /// Failed verification attempts so far.
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl StagedRegistration {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// Hand-written so the hash and the code never end up in logs.
impl fmt::Debug for StagedRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedRegistration")
            .field("name", &self.name)
            .field("username", &self.username)
            .field("email", &self.email)
            .field("referral_code", &self.referral_code)
            .field("attempts", &self.attempts)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// A persisted account, without its password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub name: String,
    pub username: String,
    pub email: String,
    pub referral_code: Option<String>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::User;

// -- JWT Claims --

/// Session token claims. `jti` lets a single token be revoked on logout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub username: String,
    pub is_admin: bool,
    pub jti: Uuid,
    pub exp: usize,
}

// -- Registration --

/// Every field defaults to empty so that a missing field is reported by
/// intake validation instead of being rejected by the JSON extractor.
/// No `Debug`: it carries the plaintext password.
#[derive(Default, Deserialize)]
#[serde(default)]
pub struct SendOtpRequest {
    pub name: String,
    pub username: String,
    pub referral_code: Option<String>,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

#[derive(Debug, Serialize)]
pub struct SendOtpResponse {
    pub success: bool,
    pub message: String,
    pub registration_token: String,
    pub expires_at: DateTime<Utc>,
    pub mail_sent: bool,
    /// Only populated when the server runs in debug mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub otp: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct VerifyOtpRequest {
    pub registration_token: String,
    pub otp: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyOtpResponse {
    pub success: bool,
    pub message: String,
    pub user: PublicUser,
    /// Absent when the account was created but no session could be issued.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// The fields of a user that may leave the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicUser {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub username: String,
}

impl From<&User> for PublicUser {
    fn from(user: &User) -> Self {
        Self {
            id: user.id,
            name: user.name.clone(),
            email: user.email.clone(),
            username: user.username.clone(),
        }
    }
}

// -- Login --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub user: PublicUser,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub success: bool,
    pub user: PublicUser,
}

// -- Errors --

/// Body of every non-2xx response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub message: String,
    /// Per-field messages, only for validation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<BTreeMap<String, Vec<String>>>,
    /// Internal failures only. Carries the real cause in debug mode.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

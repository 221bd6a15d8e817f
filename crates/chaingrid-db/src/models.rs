//! Database row types, mapped directly from SQLite rows.
//! Distinct from chaingrid-types models to keep the DB layer independent.

use anyhow::{Context, Result};
use chaingrid_types::models::User;
use chrono::{DateTime, Utc};

use crate::from_db_time;

pub struct UserRow {
    pub id: String,
    pub name: String,
    pub username: String,
    pub email: String,
    pub password: String,
    pub referral_code: Option<String>,
    pub email_verified_at: Option<String>,
    pub is_admin: bool,
    pub created_at: String,
}

impl UserRow {
    /// Converts to the API model. The password hash is dropped here.
    pub fn to_user(&self) -> Result<User> {
        Ok(User {
            id: self.id.parse().with_context(|| format!("Bad user id: {}", self.id))?,
            name: self.name.clone(),
            username: self.username.clone(),
            email: self.email.clone(),
            referral_code: self.referral_code.clone(),
            email_verified_at: self.email_verified_at.as_deref().map(from_db_time).transpose()?,
            is_admin: self.is_admin,
            created_at: from_db_time(&self.created_at)?,
        })
    }
}

/// Insert parameters for a user. `password_hash` must already be hashed.
pub struct NewUser<'a> {
    pub id: &'a str,
    pub name: &'a str,
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a str,
    pub referral_code: Option<&'a str>,
    pub email_verified_at: Option<DateTime<Utc>>,
    pub is_admin: bool,
    pub created_at: DateTime<Utc>,
}

use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::Result;
use chaingrid_types::models::StagedRegistration;
use chrono::{DateTime, Utc};
use rusqlite::Row;

use crate::queries::OptionalExt;
use crate::{Database, from_db_time, to_db_time};

/// Short-lived store for registrations awaiting OTP confirmation.
///
/// Records are keyed by their opaque token and carry their own expiry.
/// Implementations must treat expired records as absent on read; physically
/// removing them is left to [`StagingStore::purge_expired`].
pub trait StagingStore: Send + Sync {
    /// Stores `staged`, replacing any record with the same token or the
    /// same email.
    fn put(&self, staged: &StagedRegistration) -> Result<()>;

    fn get(&self, token: &str, now: DateTime<Utc>) -> Result<Option<StagedRegistration>>;

    /// Removes and returns the live record in one step. Two concurrent
    /// callers never both receive it.
    fn take(&self, token: &str, now: DateTime<Utc>) -> Result<Option<StagedRegistration>>;

    fn delete(&self, token: &str) -> Result<()>;

    /// Bumps the failed-attempt counter and returns the new value, or `None`
    /// if no record exists for `token`.
    fn record_failed_attempt(&self, token: &str) -> Result<Option<u32>>;

    /// Deletes expired records, returning how many went.
    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize>;
}

// ── SQLite ──────────────────────────────────────────────────────────────

const STAGED_COLUMNS: &str = "token, name, username, email, referral_code, password_hash, \
     otp_code, attempts, created_at, expires_at";

impl StagingStore for Database {
    fn put(&self, staged: &StagedRegistration) -> Result<()> {
        self.with_conn(|conn| {
            let tx = conn.unchecked_transaction()?;
            tx.execute(
                "DELETE FROM staged_registrations WHERE token = ?1 OR email = ?2",
                rusqlite::params![staged.token, staged.email],
            )?;
            tx.execute(
                "INSERT INTO staged_registrations
                    (token, name, username, email, referral_code, password_hash, otp_code, attempts, created_at, expires_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                rusqlite::params![
                    staged.token,
                    staged.name,
                    staged.username,
                    staged.email,
                    staged.referral_code,
                    staged.password_hash,
                    staged.otp_code,
                    staged.attempts,
                    to_db_time(staged.created_at),
                    to_db_time(staged.expires_at),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    fn get(&self, token: &str, now: DateTime<Utc>) -> Result<Option<StagedRegistration>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM staged_registrations WHERE token = ?1 AND expires_at > ?2",
                STAGED_COLUMNS
            );
            let raw = conn
                .query_row(&sql, rusqlite::params![token, to_db_time(now)], raw_staged)
                .optional()?;
            raw.map(RawStaged::into_staged).transpose()
        })
    }

    fn take(&self, token: &str, now: DateTime<Utc>) -> Result<Option<StagedRegistration>> {
        self.with_conn(|conn| {
            let sql = format!(
                "DELETE FROM staged_registrations WHERE token = ?1 AND expires_at > ?2 RETURNING {}",
                STAGED_COLUMNS
            );
            let raw = conn
                .query_row(&sql, rusqlite::params![token, to_db_time(now)], raw_staged)
                .optional()?;
            raw.map(RawStaged::into_staged).transpose()
        })
    }

    fn delete(&self, token: &str) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute("DELETE FROM staged_registrations WHERE token = ?1", [token])?;
            Ok(())
        })
    }

    fn record_failed_attempt(&self, token: &str) -> Result<Option<u32>> {
        self.with_conn(|conn| {
            conn.query_row(
                "UPDATE staged_registrations SET attempts = attempts + 1 WHERE token = ?1 RETURNING attempts",
                [token],
                |row| row.get::<_, u32>(0),
            )
            .optional()
        })
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM staged_registrations WHERE expires_at <= ?1",
                [to_db_time(now)],
            )?;
            Ok(removed)
        })
    }
}

/// Row as read from SQLite, before timestamps are parsed.
struct RawStaged {
    token: String,
    name: String,
    username: String,
    email: String,
    referral_code: Option<String>,
    password_hash: String,
    otp_code: String,
    attempts: u32,
    created_at: String,
    expires_at: String,
}

fn raw_staged(row: &Row<'_>) -> rusqlite::Result<RawStaged> {
    Ok(RawStaged {
        token: row.get(0)?,
        name: row.get(1)?,
        username: row.get(2)?,
        email: row.get(3)?,
        referral_code: row.get(4)?,
        password_hash: row.get(5)?,
        otp_code: row.get(6)?,
        attempts: row.get(7)?,
        created_at: row.get(8)?,
        expires_at: row.get(9)?,
    })
}

impl RawStaged {
    fn into_staged(self) -> Result<StagedRegistration> {
        Ok(StagedRegistration {
            token: self.token,
            name: self.name,
            username: self.username,
            email: self.email,
            referral_code: self.referral_code,
            password_hash: self.password_hash,
            otp_code: self.otp_code,
            attempts: self.attempts,
            created_at: from_db_time(&self.created_at)?,
            expires_at: from_db_time(&self.expires_at)?,
        })
    }
}

// ── In-memory ───────────────────────────────────────────────────────────

/// Process-local staging store. Pending registrations are lost on restart.
#[derive(Default)]
pub struct MemoryStagingStore {
    slots: Mutex<HashMap<String, StagedRegistration>>,
}

impl MemoryStagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, StagedRegistration>>> {
        self.slots
            .lock()
            .map_err(|e| anyhow::anyhow!("Staging lock poisoned: {}", e))
    }
}

impl StagingStore for MemoryStagingStore {
    fn put(&self, staged: &StagedRegistration) -> Result<()> {
        let mut slots = self.lock()?;
        slots.retain(|_, s| !s.email.eq_ignore_ascii_case(&staged.email));
        slots.insert(staged.token.clone(), staged.clone());
        Ok(())
    }

    fn get(&self, token: &str, now: DateTime<Utc>) -> Result<Option<StagedRegistration>> {
        let slots = self.lock()?;
        Ok(slots.get(token).filter(|s| !s.is_expired(now)).cloned())
    }

    fn take(&self, token: &str, now: DateTime<Utc>) -> Result<Option<StagedRegistration>> {
        let mut slots = self.lock()?;
        let live = slots.get(token).is_some_and(|s| !s.is_expired(now));
        Ok(if live { slots.remove(token) } else { None })
    }

    fn delete(&self, token: &str) -> Result<()> {
        self.lock()?.remove(token);
        Ok(())
    }

    fn record_failed_attempt(&self, token: &str) -> Result<Option<u32>> {
        let mut slots = self.lock()?;
        Ok(slots.get_mut(token).map(|s| {
            s.attempts += 1;
            s.attempts
        }))
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut slots = self.lock()?;
        let before = slots.len();
        slots.retain(|_, s| !s.is_expired(now));
        Ok(before - slots.len())
    }
}

use crate::models::{NewUser, UserRow};
use crate::{Database, to_db_time};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode};

const USER_COLUMNS: &str =
    "id, name, username, email, password, referral_code, email_verified_at, is_admin, created_at";

impl Database {
    // -- Users --

    /// Inserts a user. A duplicate email or username surfaces as an error
    /// that [`unique_violation`] recognises.
    pub fn create_user(&self, user: &NewUser<'_>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (id, name, username, email, password, referral_code, email_verified_at, is_admin, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    user.id,
                    user.name,
                    user.username,
                    user.email,
                    user.password_hash,
                    user.referral_code,
                    user.email_verified_at.map(to_db_time),
                    user.is_admin,
                    to_db_time(user.created_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username", username))
    }

    /// Email lookup is case-insensitive (the column is `COLLATE NOCASE`).
    pub fn get_user_by_email(&self, email: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "email", email))
    }

    pub fn get_user_by_id(&self, id: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "id", id))
    }

    pub fn set_admin(&self, id: &str, is_admin: bool) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET is_admin = ?1 WHERE id = ?2",
                rusqlite::params![is_admin, id],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Revoked tokens --

    pub fn revoke_token(&self, jti: &str, expires_at: DateTime<Utc>) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO revoked_tokens (jti, expires_at) VALUES (?1, ?2)",
                rusqlite::params![jti, to_db_time(expires_at)],
            )?;
            Ok(())
        })
    }

    pub fn is_token_revoked(&self, jti: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row("SELECT 1 FROM revoked_tokens WHERE jti = ?1", [jti], |row| row.get(0))
                .optional()?;
            Ok(found.is_some())
        })
    }

    /// Drops revocations for tokens that have expired on their own.
    pub fn purge_revoked_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        self.with_conn(|conn| {
            let removed = conn.execute(
                "DELETE FROM revoked_tokens WHERE expires_at <= ?1",
                [to_db_time(now)],
            )?;
            Ok(removed)
        })
    }
}

/// If `err` came from a UNIQUE constraint, returns the offending column
/// (`"email"`, `"username"`, ...).
pub fn unique_violation(err: &anyhow::Error) -> Option<String> {
    let rusqlite::Error::SqliteFailure(failure, Some(msg)) = err.downcast_ref::<rusqlite::Error>()?
    else {
        return None;
    };
    if failure.code != ErrorCode::ConstraintViolation {
        return None;
    }
    // "UNIQUE constraint failed: users.email"
    let columns = msg.strip_prefix("UNIQUE constraint failed: ")?;
    let first = columns.split(',').next()?.trim();
    let column = first.rsplit('.').next().unwrap_or(first);
    Some(column.to_string())
}

fn query_user(conn: &Connection, column: &str, value: &str) -> Result<Option<UserRow>> {
    let sql = format!("SELECT {} FROM users WHERE {} = ?1", USER_COLUMNS, column);
    let mut stmt = conn.prepare(&sql)?;

    let row = stmt
        .query_row([value], |row| {
            Ok(UserRow {
                id: row.get(0)?,
                name: row.get(1)?,
                username: row.get(2)?,
                email: row.get(3)?,
                password: row.get(4)?,
                referral_code: row.get(5)?,
                email_verified_at: row.get(6)?,
                is_admin: row.get(7)?,
                created_at: row.get(8)?,
            })
        })
        .optional()?;

    Ok(row)
}

/// Extension trait for optional query results
pub(crate) trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

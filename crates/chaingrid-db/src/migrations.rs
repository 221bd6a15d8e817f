use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);"
    )?;

    let version: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| r.get(0))?;

    if version < 1 {
        info!("Running migration v1 (users, staged registrations, revoked tokens)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                  TEXT PRIMARY KEY,
                name                TEXT NOT NULL,
                username            TEXT NOT NULL UNIQUE,
                email               TEXT NOT NULL UNIQUE COLLATE NOCASE,
                password            TEXT NOT NULL,
                referral_code       TEXT,
                email_verified_at   TEXT,
                is_admin            INTEGER NOT NULL DEFAULT 0,
                created_at          TEXT NOT NULL
            );

            -- One pending registration per email; the token is the client's key.
            CREATE TABLE staged_registrations (
                token           TEXT PRIMARY KEY,
                email           TEXT NOT NULL UNIQUE COLLATE NOCASE,
                name            TEXT NOT NULL,
                username        TEXT NOT NULL,
                referral_code   TEXT,
                password_hash   TEXT NOT NULL,
                otp_code        TEXT NOT NULL,
                attempts        INTEGER NOT NULL DEFAULT 0,
                created_at      TEXT NOT NULL,
                expires_at      TEXT NOT NULL
            );

            CREATE INDEX idx_staged_expires
                ON staged_registrations(expires_at);

            CREATE TABLE revoked_tokens (
                jti         TEXT PRIMARY KEY,
                expires_at  TEXT NOT NULL
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}

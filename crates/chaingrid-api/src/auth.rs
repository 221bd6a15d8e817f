use std::sync::Arc;

use argon2::{
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Extension, Json, extract::State, http::StatusCode, response::IntoResponse};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{EncodingKey, Header, encode};
use tracing::{info, warn};
use uuid::Uuid;

use chaingrid_db::Database;
use chaingrid_db::models::NewUser;
use chaingrid_types::api::{Claims, LoginRequest, LoginResponse, MeResponse, PublicUser};
use chaingrid_types::models::User;

use crate::error::ApiError;
use crate::extract::AppJson;
use crate::registrar::Registrar;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub registrar: Registrar,
    pub tokens: TokenSettings,
    /// Echo OTPs and internal error detail to clients. Never on by default.
    pub debug: bool,
}

#[derive(Debug, Clone)]
pub struct TokenSettings {
    pub secret: String,
    pub ttl: Duration,
}

/// Argon2id with a fresh random salt, as a PHC string.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("Password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        warn!("Stored password hash is not a valid PHC string");
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

/// Issues a session JWT for `user`. Returns the token and its expiry.
pub fn create_token(settings: &TokenSettings, user: &User) -> anyhow::Result<(String, DateTime<Utc>)> {
    let expires_at = Utc::now()
        .checked_add_signed(settings.ttl)
        .ok_or_else(|| anyhow::anyhow!("Token lifetime {} is out of range", settings.ttl))?;
    let claims = Claims {
        sub: user.id,
        username: user.username.clone(),
        is_admin: user.is_admin,
        jti: Uuid::new_v4(),
        exp: expires_at.timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(settings.secret.as_bytes()),
    )?;

    Ok((token, expires_at))
}

/// Admin dashboard login. Only admins get a token.
pub async fn login(
    State(state): State<AppState>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let email = req.email.trim().to_lowercase();
    let row = state
        .db
        .get_user_by_email(&email)
        .map_err(|e| ApiError::internal(e, state.debug))?
        .ok_or(ApiError::InvalidCredentials)?;

    if !verify_password(&req.password, &row.password) {
        return Err(ApiError::InvalidCredentials);
    }

    let user = row.to_user().map_err(|e| ApiError::internal(e, state.debug))?;
    if !user.is_admin {
        warn!("Non-admin {} attempted dashboard login", user.username);
        return Err(ApiError::Unauthorized);
    }

    let (token, _) = create_token(&state.tokens, &user).map_err(|e| ApiError::internal(e, state.debug))?;
    info!("Admin {} logged in", user.username);

    Ok(Json(LoginResponse {
        success: true,
        token,
        user: PublicUser::from(&user),
    }))
}

/// Revokes the token the request was made with.
pub async fn logout(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let expires_at = DateTime::<Utc>::from_timestamp(claims.exp as i64, 0).unwrap_or_else(Utc::now);

    state
        .db
        .revoke_token(&claims.jti.to_string(), expires_at)
        .map_err(|e| ApiError::internal(e, state.debug))?;

    info!("{} logged out", claims.username);
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "success": true, "message": "Logged out" })),
    ))
}

pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let row = state
        .db
        .get_user_by_id(&claims.sub.to_string())
        .map_err(|e| ApiError::internal(e, state.debug))?
        .ok_or(ApiError::Unauthorized)?;
    let user = row.to_user().map_err(|e| ApiError::internal(e, state.debug))?;

    Ok(Json(MeResponse {
        success: true,
        user: PublicUser::from(&user),
    }))
}

/// Makes sure an admin account exists for the dashboard. An existing user
/// with that email is promoted; otherwise a verified admin is created.
pub fn bootstrap_admin(db: &Database, name: &str, username: &str, email: &str, password: &str) -> anyhow::Result<()> {
    let email = email.trim().to_lowercase();

    if let Some(row) = db.get_user_by_email(&email)? {
        if !row.is_admin {
            db.set_admin(&row.id, true)?;
            info!("Promoted {} to admin", row.username);
        }
        return Ok(());
    }

    let id = Uuid::new_v4().to_string();
    let password_hash = hash_password(password)?;
    let now = Utc::now();
    db.create_user(&NewUser {
        id: &id,
        name,
        username,
        email: &email,
        password_hash: &password_hash,
        referral_code: None,
        email_verified_at: Some(now),
        is_admin: true,
        created_at: now,
    })?;

    info!("Created admin account {}", username);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{DecodingKey, Validation, decode};

    #[test]
    fn password_hash_roundtrip() {
        let hash = hash_password("Passw0rd!").unwrap();
        assert!(hash.starts_with("$argon2id$"));
        assert!(verify_password("Passw0rd!", &hash));
        assert!(!verify_password("passw0rd!", &hash));
        assert!(!verify_password("Passw0rd!", "not-a-hash"));
    }

    #[test]
    fn tokens_carry_admin_flag_and_unique_jti() {
        let settings = TokenSettings {
            secret: "test-secret".into(),
            ttl: Duration::days(1),
        };
        let user = User {
            id: Uuid::new_v4(),
            name: "Root".into(),
            username: "root".into(),
            email: "root@example.com".into(),
            referral_code: None,
            email_verified_at: None,
            is_admin: true,
            created_at: Utc::now(),
        };

        let (a, _) = create_token(&settings, &user).unwrap();
        let (b, _) = create_token(&settings, &user).unwrap();

        let key = DecodingKey::from_secret(b"test-secret");
        let ca = decode::<Claims>(&a, &key, &Validation::default()).unwrap().claims;
        let cb = decode::<Claims>(&b, &key, &Validation::default()).unwrap().claims;
        assert_eq!(ca.sub, user.id);
        assert!(ca.is_admin);
        assert_ne!(ca.jti, cb.jti);
    }

    #[test]
    fn bootstrap_admin_is_idempotent() {
        let db = Database::open_in_memory().unwrap();
        bootstrap_admin(&db, "Root", "root", "Root@Example.com", "Sup3rSecret!").unwrap();
        let row = db.get_user_by_email("root@example.com").unwrap().unwrap();
        assert!(row.is_admin);
        assert!(verify_password("Sup3rSecret!", &row.password));

        bootstrap_admin(&db, "Root", "root", "root@example.com", "other").unwrap();
        let again = db.get_user_by_email("root@example.com").unwrap().unwrap();
        assert_eq!(again.id, row.id);
        assert!(verify_password("Sup3rSecret!", &again.password));
    }

    #[test]
    fn bootstrap_admin_promotes_existing_user() {
        let db = Database::open_in_memory().unwrap();
        let id = Uuid::new_v4().to_string();
        let now = Utc::now();
        db.create_user(&NewUser {
            id: &id,
            name: "Grace",
            username: "grace",
            email: "grace@example.com",
            password_hash: &hash_password("Passw0rd!").unwrap(),
            referral_code: None,
            email_verified_at: Some(now),
            is_admin: false,
            created_at: now,
        })
        .unwrap();

        bootstrap_admin(&db, "Grace", "grace", "grace@example.com", "ignored").unwrap();
        assert!(db.get_user_by_id(&id).unwrap().unwrap().is_admin);
    }
}

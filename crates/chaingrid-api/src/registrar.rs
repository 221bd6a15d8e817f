//! OTP-gated registration: stage a candidate, then commit it once the
//! emailed code comes back.
//!
//! A slot moves `EMPTY -> STAGED -> (COMMITTED | EXPIRED | EXHAUSTED)`.
//! Only a successful commit touches the users table.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{error, info, warn};
use uuid::Uuid;

use chaingrid_db::models::NewUser;
use chaingrid_db::queries::unique_violation;
use chaingrid_db::{Database, StagingStore};
use chaingrid_types::api::{SendOtpRequest, VerifyOtpRequest};
use chaingrid_types::models::{StagedRegistration, User};

use crate::auth::hash_password;
use crate::error::ApiError;
use crate::mail::Mailer;
use crate::otp;
use crate::validation::{RegistrationInput, ValidationErrors, validate_registration};

#[derive(Debug, Clone)]
pub struct RegistrarConfig {
    /// How long a staged registration accepts its code.
    pub otp_ttl: Duration,
    /// Failed attempts after which the slot is dropped.
    pub max_attempts: u32,
    pub debug: bool,
}

impl Default for RegistrarConfig {
    fn default() -> Self {
        Self {
            otp_ttl: Duration::minutes(10),
            max_attempts: 5,
            debug: false,
        }
    }
}

/// Outcome of a successful staging call.
pub struct Staged {
    pub registration_token: String,
    pub expires_at: DateTime<Utc>,
    /// Returned to clients only in debug mode.
    pub otp_code: String,
    pub mail_sent: bool,
}

pub struct Registrar {
    db: Arc<Database>,
    staging: Arc<dyn StagingStore>,
    mailer: Arc<dyn Mailer>,
    config: RegistrarConfig,
}

impl Registrar {
    pub fn new(
        db: Arc<Database>,
        staging: Arc<dyn StagingStore>,
        mailer: Arc<dyn Mailer>,
        config: RegistrarConfig,
    ) -> Self {
        Self {
            db,
            staging,
            mailer,
            config,
        }
    }

    pub fn config(&self) -> &RegistrarConfig {
        &self.config
    }

    pub async fn stage(&self, req: SendOtpRequest) -> Result<Staged, ApiError> {
        self.stage_at(req, Utc::now()).await
    }

    /// Validates the form, stages it under a fresh token and emails the code.
    /// Nothing is stored when validation fails.
    pub async fn stage_at(&self, req: SendOtpRequest, now: DateTime<Utc>) -> Result<Staged, ApiError> {
        let (input, mut errors) = validate_registration(req);
        self.check_unique(&input, &mut errors)?;
        if !errors.is_empty() {
            return Err(ApiError::Validation(errors));
        }

        let RegistrationInput {
            name,
            username,
            email,
            referral_code,
            password,
        } = input;

        // Keep Argon2 off the async workers.
        let password_hash = tokio::task::spawn_blocking(move || hash_password(&password))
            .await
            .map_err(|e| ApiError::staging(anyhow::anyhow!("spawn_blocking join error: {}", e), self.config.debug))?
            .map_err(|e| ApiError::staging(e, self.config.debug))?;

        let expires_at = now
            .checked_add_signed(self.config.otp_ttl)
            .ok_or_else(|| {
                ApiError::staging(
                    anyhow::anyhow!("OTP lifetime {} is out of range", self.config.otp_ttl),
                    self.config.debug,
                )
            })?;

        let staged = StagedRegistration {
            token: otp::generate_registration_token(),
            name,
            username,
            email,
            referral_code,
            password_hash,
            otp_code: otp::generate_otp(),
            attempts: 0,
            created_at: now,
            expires_at,
        };

        self.staging
            .put(&staged)
            .map_err(|e| ApiError::staging(e, self.config.debug))?;

        info!("Staged registration for {} (expires {})", staged.email, staged.expires_at);

        let mail_sent = match self.mailer.send_otp(&staged.email, &staged.otp_code).await {
            Ok(()) => true,
            Err(e) => {
                warn!("OTP email to {} not delivered: {:#}", staged.email, e);
                false
            }
        };

        Ok(Staged {
            registration_token: staged.token,
            expires_at: staged.expires_at,
            otp_code: staged.otp_code,
            mail_sent,
        })
    }

    pub fn verify(&self, req: &VerifyOtpRequest) -> Result<User, ApiError> {
        self.verify_at(req, Utc::now())
    }

    /// Checks the submitted code and, on a match, creates the user and
    /// consumes the slot so the code cannot be replayed.
    pub fn verify_at(&self, req: &VerifyOtpRequest, now: DateTime<Utc>) -> Result<User, ApiError> {
        let staged = self
            .staging
            .get(&req.registration_token, now)
            .map_err(|e| ApiError::internal(e, self.config.debug))?
            .ok_or(ApiError::ExpiredOrMissingSession)?;

        if !otp::otp_matches(&staged.otp_code, &req.otp) {
            return Err(self.reject_attempt(&staged));
        }

        // A concurrent submission of the same code may have won the race.
        let staged = self
            .staging
            .take(&staged.token, now)
            .map_err(|e| ApiError::internal(e, self.config.debug))?
            .ok_or(ApiError::ExpiredOrMissingSession)?;

        self.commit(staged, now)
    }

    fn check_unique(&self, input: &RegistrationInput, errors: &mut ValidationErrors) -> Result<(), ApiError> {
        let debug = self.config.debug;

        if !errors.has("username")
            && self
                .db
                .get_user_by_username(&input.username)
                .map_err(|e| ApiError::staging(e, debug))?
                .is_some()
        {
            errors.add("username", "The username has already been taken.");
        }

        if !errors.has("email")
            && self
                .db
                .get_user_by_email(&input.email)
                .map_err(|e| ApiError::staging(e, debug))?
                .is_some()
        {
            errors.add("email", "The email has already been taken.");
        }

        Ok(())
    }

    fn reject_attempt(&self, staged: &StagedRegistration) -> ApiError {
        let max = self.config.max_attempts;
        match self.staging.record_failed_attempt(&staged.token) {
            Ok(Some(attempts)) if attempts >= max => {
                warn!("Too many OTP attempts for {}, dropping staged registration", staged.email);
                if let Err(e) = self.staging.delete(&staged.token) {
                    return ApiError::internal(e, self.config.debug);
                }
                ApiError::TooManyAttempts
            }
            Ok(Some(attempts)) => ApiError::InvalidOtp {
                remaining: max - attempts,
            },
            Ok(None) => ApiError::ExpiredOrMissingSession,
            Err(e) => ApiError::internal(e, self.config.debug),
        }
    }

    fn commit(&self, staged: StagedRegistration, now: DateTime<Utc>) -> Result<User, ApiError> {
        let id = Uuid::new_v4();
        let id_str = id.to_string();

        let created = self.db.create_user(&NewUser {
            id: &id_str,
            name: &staged.name,
            username: &staged.username,
            email: &staged.email,
            password_hash: &staged.password_hash,
            referral_code: staged.referral_code.as_deref(),
            email_verified_at: Some(now),
            is_admin: false,
            created_at: now,
        });

        if let Err(e) = created {
            if let Some(field) = unique_violation(&e) {
                warn!("Registration for {} lost a race on {}", staged.email, field);
                return Err(ApiError::Conflict { field });
            }
            // Not the client's fault: give the slot back so the same code works again.
            if let Err(restore) = self.staging.put(&staged) {
                error!("Could not restore staged registration for {}: {:#}", staged.email, restore);
            }
            return Err(ApiError::internal(e, self.config.debug));
        }

        info!("Registered {} <{}>", staged.username, staged.email);

        Ok(User {
            id,
            name: staged.name,
            username: staged.username,
            email: staged.email,
            referral_code: staged.referral_code,
            email_verified_at: Some(now),
            is_admin: false,
            created_at: now,
        })
    }
}

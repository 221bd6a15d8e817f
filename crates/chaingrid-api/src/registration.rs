use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use tracing::error;

use chaingrid_types::api::{PublicUser, SendOtpRequest, SendOtpResponse, VerifyOtpRequest, VerifyOtpResponse};

use crate::auth::{AppState, create_token};
use crate::error::ApiError;
use crate::extract::AppJson;

/// POST /api/send-otp — validate the form, stage it and email the code.
pub async fn send_otp(
    State(state): State<AppState>,
    AppJson(req): AppJson<SendOtpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let staged = state.registrar.stage(req).await?;

    let message = if staged.mail_sent {
        "OTP sent to your email address"
    } else {
        "Registration staged, but the OTP email could not be sent"
    };

    Ok(Json(SendOtpResponse {
        success: true,
        message: message.to_string(),
        registration_token: staged.registration_token,
        expires_at: staged.expires_at,
        mail_sent: staged.mail_sent,
        otp: state.registrar.config().debug.then_some(staged.otp_code),
    }))
}

/// POST /api/register — confirm the code and create the account.
pub async fn verify_otp(
    State(state): State<AppState>,
    AppJson(req): AppJson<VerifyOtpRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = state.registrar.verify(&req)?;

    // The user is already committed, so a token failure still answers 201.
    let token = match create_token(&state.tokens, &user) {
        Ok((token, _)) => Some(token),
        Err(e) => {
            error!("Registered {} but could not issue a session token: {:#}", user.username, e);
            None
        }
    };

    Ok((
        StatusCode::CREATED,
        Json(VerifyOtpResponse {
            success: true,
            message: "User registered successfully".to_string(),
            user: PublicUser::from(&user),
            token,
        }),
    ))
}

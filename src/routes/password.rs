use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use rand::Rng;
use serde::Deserialize;
use string_builder::Builder;
use tracing::warn;
use utoipa::ToSchema;

use crate::{
    AppState,
    reset_store::VerifyOutcome,
    routes::{ErrorResponse, MessageResponse},
};

pub const CODE_TTL_SECONDS: i64 = 10 * 60; // 10 minutes

pub fn generate_reset_code() -> i64 {
    rand::rng().random_range(100_000..=999_999)
}

fn reset_email_bodies(code: i64) -> (String, String) {
    let text = format!("Your password reset code is: {code}");

    let mut html = Builder::default();
    html.append("<h2>Password Reset</h2>");
    html.append(format!("<p>Your reset code is <b>{code}</b></p>"));
    html.append(format!(
        "<p>This code will expire in {} minutes.</p>",
        CODE_TTL_SECONDS / 60
    ));

    (text, html.string().unwrap())
}

#[derive(Deserialize, ToSchema)]
pub struct ForgotPasswordBody {
    pub email: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct VerifyCodeBody {
    pub email: Option<String>,
    pub code: Option<SubmittedCode>,
}

/// Clients send the code either as the raw text of the input field or as a
/// JSON number.
#[derive(Deserialize, ToSchema)]
#[serde(untagged)]
pub enum SubmittedCode {
    Number(i64),
    Text(String),
}

impl SubmittedCode {
    /// Empty text and a literal zero count as not submitted at all.
    fn is_empty(&self) -> bool {
        match self {
            SubmittedCode::Number(value) => *value == 0,
            SubmittedCode::Text(text) => text.is_empty(),
        }
    }

    /// Coerces to an integer for comparison. `None` when the text does not
    /// parse, which can never match a stored code.
    fn as_i64(&self) -> Option<i64> {
        match self {
            SubmittedCode::Number(value) => Some(*value),
            SubmittedCode::Text(text) => text.trim().parse().ok(),
        }
    }
}

#[utoipa::path(
    post,
    tags = ["Password"],
    description = "Forgot password: input email, store a 6-digit reset code and mail it to the user.",
    path = "/forgot-password",
    request_body(content = ForgotPasswordBody, content_type = "application/json"),
    responses(
        (status = 200, description = "Reset code sent", body = MessageResponse),
        (status = 400, description = "Email is missing", body = ErrorResponse),
        (status = 500, description = "Failed to store the code or send the email", body = ErrorResponse),
    )
)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(body): Json<ForgotPasswordBody>,
) -> impl IntoResponse {
    let email = match body.email {
        Some(email) if !email.is_empty() => email,
        _ => {
            return (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Email is required".to_owned(),
                }),
            )
                .into_response();
        }
    };

    let code = generate_reset_code();

    // Storing replaces any previous code for this email.
    if let Err(e) = state.store.put(&email, code, CODE_TTL_SECONDS).await {
        warn!("Failed to store password reset code for {}: {}", email, e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to create reset record".to_owned(),
            }),
        )
            .into_response();
    }

    let subject = "Password Reset Code";
    let (text_body, html_body) = reset_email_bodies(code);

    if let Err(e) = state.mailer.send(&email, subject, &text_body, &html_body).await {
        warn!("Failed to send reset email to {}: {}", email, e);
        // The stored code stays put; it expires on its own and a retry
        // overwrites it.
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Failed to send reset email".to_owned(),
            }),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(MessageResponse {
            message: "Reset code sent to email!".to_owned(),
        }),
    )
        .into_response()
}

#[utoipa::path(
    post,
    tags = ["Password"],
    description = "Verify a reset code. A correct code is consumed and cannot be used twice.",
    path = "/verify-reset-code",
    request_body(content = VerifyCodeBody, content_type = "application/json"),
    responses(
        (status = 200, description = "Code verified", body = MessageResponse),
        (status = 400, description = "Missing fields, unknown email, expired or wrong code", body = ErrorResponse),
        (status = 500, description = "Store failure", body = ErrorResponse),
    )
)]
pub async fn verify_reset_code(
    State(state): State<AppState>,
    Json(body): Json<VerifyCodeBody>,
) -> impl IntoResponse {
    let email = match body.email {
        Some(ref email) if !email.is_empty() => email.as_str(),
        _ => return required_fields_error(),
    };
    let code = match body.code {
        Some(ref code) if !code.is_empty() => code.as_i64(),
        _ => return required_fields_error(),
    };

    match state.store.consume(email, code).await {
        Ok(VerifyOutcome::Verified) => (
            StatusCode::OK,
            Json(MessageResponse {
                message: "Code verified successfully!".to_owned(),
            }),
        )
            .into_response(),
        Ok(VerifyOutcome::Mismatch) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Invalid code".to_owned(),
            }),
        )
            .into_response(),
        Ok(VerifyOutcome::Expired) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Code expired".to_owned(),
            }),
        )
            .into_response(),
        Ok(VerifyOutcome::Missing) => (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "No reset request found for this email".to_owned(),
            }),
        )
            .into_response(),
        Err(e) => {
            warn!("Failed to check password reset code for {}: {}", email, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: "Failed to verify code".to_owned(),
                }),
            )
                .into_response()
        }
    }
}

fn required_fields_error() -> axum::response::Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "Email and code are required".to_owned(),
        }),
    )
        .into_response()
}

pub fn password_router() -> Router<AppState> {
    Router::new()
        .route("/forgot-password", post(forgot_password))
        .route("/verify-reset-code", post(verify_reset_code))
}

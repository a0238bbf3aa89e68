use axum::{
    Extension, Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_sessions::Session;

use super::context::{AuditedByService, CurrentUnit};
use super::validation::require_non_empty;
use super::{AccountDto, ApiError, ApiResponse, AppState, CenterDto, MessageResponse};
use crate::context::RequestContext;
use crate::services::{Actor, LoginAttempt, LoginOutcome, PublicReason, SessionSecurityManager};

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Deserialize)]
pub struct LoginRequest {
    pub identifier: String,
    pub password: String,
    #[serde(default)]
    pub totp_code: Option<String>,
    #[serde(default)]
    pub emergency_code: Option<String>,
}

#[derive(Deserialize)]
pub struct SecondFactorRequest {
    pub ticket: String,
    pub code: String,
}

#[derive(Deserialize)]
pub struct RequiredPasswordChangeRequest {
    pub ticket: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ResetConfirmRequest {
    pub identifier: String,
    pub token: String,
    pub new_password: String,
}

#[derive(Deserialize)]
pub struct ChangePasswordRequest {
    pub current_password: String,
    pub new_password: String,
}

/// One shape for all three login results; unused fields are omitted.
#[derive(Debug, Serialize, Default)]
pub struct LoginResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub account: Option<AccountDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pending: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ticket: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<String>,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub actor: Actor,
    pub current_unit: Option<CenterDto>,
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /auth/login
///
/// The chain runs on its own task so a dropped connection cannot stop it
/// between the lockout update and the audit write.
pub async fn login(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    session: Session,
    Json(payload): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    let attempt = LoginAttempt {
        identifier: require_non_empty("identifier", &payload.identifier)?.to_string(),
        password: payload.password,
        totp_code: payload.totp_code,
        emergency_code: payload.emergency_code,
    };
    if attempt.password.is_empty() {
        return Err(ApiError::validation("password is required"));
    }

    let auth = state.shared.auth.clone();
    let task_ctx = ctx.clone();
    let outcome = tokio::spawn(async move { auth.login(attempt, &task_ctx).await })
        .await
        .map_err(|e| ApiError::internal(format!("Login task failed: {e}")))??;

    respond(&state, &session, &ctx, outcome, AttemptCounter::Hidden).await
}

/// POST /auth/second-factor
pub async fn second_factor(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    session: Session,
    Json(payload): Json<SecondFactorRequest>,
) -> Result<Response, ApiError> {
    let ticket = require_non_empty("ticket", &payload.ticket)?.to_string();
    let code = require_non_empty("code", &payload.code)?.to_string();

    let auth = state.shared.auth.clone();
    let task_ctx = ctx.clone();
    let outcome =
        tokio::spawn(async move { auth.complete_second_factor(&ticket, &code, &task_ctx).await })
            .await
            .map_err(|e| ApiError::internal(format!("Second factor task failed: {e}")))??;

    respond(&state, &session, &ctx, outcome, AttemptCounter::Shown).await
}

/// POST /auth/password/required
pub async fn complete_required_change(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<RequiredPasswordChangeRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let ticket = require_non_empty("ticket", &payload.ticket)?;
    state
        .shared
        .auth
        .complete_password_change(ticket, &payload.new_password, &ctx)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Password changed. Please log in again.",
    ))))
}

/// POST /auth/password-reset/confirm
pub async fn confirm_reset(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Json(payload): Json<ResetConfirmRequest>,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    let identifier = require_non_empty("identifier", &payload.identifier)?;
    let token = require_non_empty("token", &payload.token)?;
    state
        .shared
        .auth
        .reset_password(identifier, token, &payload.new_password, &ctx)
        .await?;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Password has been reset",
    ))))
}

/// POST /auth/logout
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    session: Session,
) -> Result<Json<ApiResponse<MessageResponse>>, ApiError> {
    if let Some(security) = SessionSecurityManager::load(&session).await? {
        let ctx = ctx
            .with_actor(security.account_id)
            .with_unit(security.current_unit);
        state.shared.auth.logout(&security, &ctx).await;
    }
    SessionSecurityManager::destroy(&session).await;

    Ok(Json(ApiResponse::success(MessageResponse::new(
        "Logged out",
    ))))
}

/// GET /auth/me
pub async fn me(
    Extension(actor): Extension<Actor>,
    Extension(CurrentUnit(unit)): Extension<CurrentUnit>,
) -> Json<ApiResponse<MeResponse>> {
    let current_unit = unit.as_ref().map(|center| CenterDto::new(center, Some(center)));
    Json(ApiResponse::success(MeResponse {
        actor,
        current_unit,
    }))
}

/// PUT /auth/password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(actor): Extension<Actor>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<(Extension<AuditedByService>, Json<ApiResponse<MessageResponse>>), ApiError> {
    state
        .shared
        .accounts
        .change_password(
            &ctx,
            actor.id,
            &payload.current_password,
            &payload.new_password,
        )
        .await?;

    Ok((
        Extension(AuditedByService),
        Json(ApiResponse::success(MessageResponse::new(
            "Password changed successfully",
        ))),
    ))
}

/// Whether a rejection may report the remaining attempts.
///
/// The password step hides it: an unknown identity has no counter, so showing
/// one would tell the caller the account exists. A second-factor ticket holder
/// has already proven the password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttemptCounter {
    Hidden,
    Shown,
}

/// Turns a login outcome into a response, establishing the session on
/// acceptance.
async fn respond(
    state: &AppState,
    session: &Session,
    ctx: &RequestContext,
    outcome: LoginOutcome,
    counter: AttemptCounter,
) -> Result<Response, ApiError> {
    match outcome {
        LoginOutcome::Accepted(accepted) => {
            let security = state.shared.sessions.issue(&accepted, ctx);
            SessionSecurityManager::establish(session, &security).await?;

            let body = LoginResponse {
                status: "accepted",
                account: Some(AccountDto::from(&*accepted.account)),
                ..LoginResponse::default()
            };
            Ok((StatusCode::OK, Json(ApiResponse::success(body))).into_response())
        }
        LoginOutcome::Pending { kind, ticket } => {
            let body = LoginResponse {
                status: "pending",
                pending: Some(kind.as_str()),
                ticket: Some(ticket),
                ..LoginResponse::default()
            };
            Ok((StatusCode::ACCEPTED, Json(ApiResponse::success(body))).into_response())
        }
        LoginOutcome::Rejected(rejection) => {
            let public = rejection.public_reason();
            let status = if public == PublicReason::AccountLocked {
                StatusCode::LOCKED
            } else {
                StatusCode::UNAUTHORIZED
            };
            let body = ApiResponse {
                success: false,
                data: Some(LoginResponse {
                    status: "rejected",
                    reason: Some(public.as_str()),
                    remaining_attempts: rejection.remaining_attempts.filter(|_| {
                        counter == AttemptCounter::Shown
                            && public == PublicReason::InvalidCredentials
                    }),
                    locked_until: rejection.locked_until.map(|t| t.to_rfc3339()),
                    ..LoginResponse::default()
                }),
                error: Some(public.message().to_string()),
            };
            Ok((status, Json(body)).into_response())
        }
    }
}

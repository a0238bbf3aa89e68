use axum::{Extension, Json, extract::State};
use serde::Deserialize;
use std::sync::Arc;
use tower_sessions::Session;

use super::context::{AuditedByService, CurrentUnit};
use super::validation::parse_id;
use super::{ApiError, ApiResponse, AppState, CenterDto};
use crate::context::RequestContext;
use crate::domain::UnitId;
use crate::services::{Actor, SessionSecurityManager};

#[derive(Deserialize)]
pub struct SwitchCenterRequest {
    pub center_id: String,
}

/// GET /centers
pub async fn list_centers(
    State(state): State<Arc<AppState>>,
    Extension(actor): Extension<Actor>,
    Extension(CurrentUnit(current)): Extension<CurrentUnit>,
) -> Result<Json<ApiResponse<Vec<CenterDto>>>, ApiError> {
    let centers = state.shared.gate.accessible_units(&actor).await?;
    let dtos = centers
        .iter()
        .map(|center| CenterDto::new(center, current.as_ref()))
        .collect();
    Ok(Json(ApiResponse::success(dtos)))
}

/// POST /centers/current
pub async fn switch_center(
    State(state): State<Arc<AppState>>,
    Extension(ctx): Extension<RequestContext>,
    Extension(actor): Extension<Actor>,
    session: Session,
    Json(payload): Json<SwitchCenterRequest>,
) -> Result<(Extension<AuditedByService>, Json<ApiResponse<CenterDto>>), ApiError> {
    let unit = UnitId::from(parse_id("center_id", &payload.center_id)?);
    let center = state.shared.gate.switch_unit(&ctx, &actor, unit).await?;

    let Some(mut security) = SessionSecurityManager::load(&session).await? else {
        return Err(ApiError::Unauthorized("Not authenticated".to_string()));
    };
    security.current_unit = Some(unit);
    SessionSecurityManager::store(&session, &security).await?;

    Ok((
        Extension(AuditedByService),
        Json(ApiResponse::success(CenterDto::new(&center, Some(&center)))),
    ))
}

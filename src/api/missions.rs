//! Missions API endpoints.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::domain::Mission;
use crate::scheduler::{AdmissionError, CreateMission};
use crate::AppState;

/// Create the missions router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/missions", post(create_mission))
        .route("/v1/missions/{user_id}", get(list_missions))
        .route("/v1/missions/{user_id}/{task_id}", get(get_mission))
        .route("/v1/missions/{user_id}/{task_id}", delete(delete_mission))
}

/// Error payload returned for any non-2xx response.
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

/// API-level error with its HTTP mapping.
struct ApiError(StatusCode, String);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

impl From<AdmissionError> for ApiError {
    fn from(error: AdmissionError) -> Self {
        let status = match &error {
            AdmissionError::MissingField(_)
            | AdmissionError::MissingTarget(_)
            | AdmissionError::Invalid { .. }
            | AdmissionError::UnsupportedKind(_) => StatusCode::BAD_REQUEST,
            AdmissionError::CapacityExceeded => StatusCode::CONFLICT,
            AdmissionError::QuoteUnavailable { .. } => StatusCode::BAD_GATEWAY,
            AdmissionError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self(status, error.to_string())
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!(%error, "Store operation failed");
        Self(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal error".to_string(),
        )
    }
}

/// Create a new mission.
async fn create_mission(
    State(state): State<AppState>,
    Json(request): Json<CreateMission>,
) -> Result<(StatusCode, Json<MissionResponse>), ApiError> {
    let mission = state.admission.create(request).await?;
    Ok((StatusCode::CREATED, Json(MissionResponse::from(mission))))
}

/// List query parameters.
#[derive(Debug, Deserialize)]
struct ListQuery {
    /// Delete terminal missions after including them in the response.
    #[serde(default)]
    prune: bool,
}

/// List a user's missions.
async fn list_missions(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<MissionResponse>>, ApiError> {
    let missions = state.store.list_for_user(&user_id, query.prune).await?;
    Ok(Json(
        missions.into_iter().map(MissionResponse::from).collect(),
    ))
}

/// Get one mission owned by the user.
async fn get_mission(
    State(state): State<AppState>,
    Path((user_id, task_id)): Path<(String, String)>,
) -> Result<Json<MissionResponse>, ApiError> {
    let mission = state
        .store
        .get(&task_id)
        .await?
        .filter(|m| m.user_id == user_id)
        .ok_or_else(|| ApiError(StatusCode::NOT_FOUND, "Mission not found".to_string()))?;
    Ok(Json(MissionResponse::from(mission)))
}

/// Delete response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    pub task_id: String,
    pub deleted: bool,
}

/// Delete one mission owned by the user.
///
/// Deleting a currently leased mission is allowed; the worker holding the
/// lease finds its outcome write not applying and moves on.
async fn delete_mission(
    State(state): State<AppState>,
    Path((user_id, task_id)): Path<(String, String)>,
) -> Result<Json<DeleteResponse>, ApiError> {
    if state.store.delete(&user_id, &task_id).await? {
        Ok(Json(DeleteResponse {
            task_id,
            deleted: true,
        }))
    } else {
        Err(ApiError(
            StatusCode::NOT_FOUND,
            "Mission not found".to_string(),
        ))
    }
}

/// Mission response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissionResponse {
    pub task_id: String,
    pub user_id: String,
    pub kind: String,
    pub status: String,
    pub side: String,
    pub amount: f64,
    pub token: String,
    pub condition: String,
    pub condition_token: String,
    pub target: f64,
    pub checks: u32,
    pub attempts: u32,
    pub max_attempts: u32,
    pub priority: i32,
    pub scheduled_at: String,
    pub max_wait_until: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Mission> for MissionResponse {
    fn from(mission: Mission) -> Self {
        Self {
            task_id: mission.task_id,
            user_id: mission.user_id,
            kind: mission.kind.to_string(),
            status: mission.status.to_string(),
            side: mission.payload.side.to_string(),
            amount: mission.payload.amount,
            token: mission.payload.token,
            condition: mission.condition.to_string(),
            condition_token: mission.condition_spec.token,
            target: mission.condition_spec.target,
            checks: mission.checks,
            attempts: mission.attempts,
            max_attempts: mission.max_attempts,
            priority: mission.priority,
            scheduled_at: mission.scheduled_at.to_rfc3339(),
            max_wait_until: mission.max_wait_until.to_rfc3339(),
            created_at: mission.created_at.to_rfc3339(),
            updated_at: mission.updated_at.to_rfc3339(),
        }
    }
}

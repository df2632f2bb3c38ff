use super::dto::UnsubscribeDto;
use super::service;
use crate::database::error::DbError;
use crate::modules::common::responses::SimpleError;
use crate::server::controller::AppState;
use axum::{extract::State, Json};
use http::StatusCode;
use validator::Validate;

/// POST /contacts.unsubscribe
pub async fn unsubscribe_contact(
    State(state): State<AppState>,
    Json(dto): Json<UnsubscribeDto>,
) -> Result<Json<serde_json::Value>, (StatusCode, SimpleError)> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let unsubscribed = service::unsubscribe(
        &state.db,
        &state.events,
        dto.workspace_id,
        &dto.email,
        dto.list_id,
    )
    .await
    .map_err(DbError::from)?;

    Ok(Json(serde_json::json!({ "unsubscribed": unsubscribed })))
}

use super::dto::{ExecuteOneDto, ExecutePendingDto, ListTasksQuery};
use crate::database::error::DbError;
use crate::modules::common::responses::{internal_error_res, SimpleError};
use crate::server::controller::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use entity::task::{self, TaskStatus};
use http::StatusCode;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};
use validator::Validate;

/// POST /tasks.execute
///
/// drives the runtime: claims up to `limit` due tasks and runs one slice
/// of each, returning how many executed and how many still have work left
pub async fn execute_pending(
    State(state): State<AppState>,
    Json(dto): Json<ExecutePendingDto>,
) -> Result<Json<serde_json::Value>, (StatusCode, SimpleError)> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let summary = state.runtime.execute_pending(dto.limit).await;

    Ok(Json(serde_json::json!({
        "executed": summary.executed,
        "timedOut": summary.timed_out,
    })))
}

/// POST /tasks.executeOne
///
/// force executes a single task, skipping its due time but never the claim
pub async fn execute_one(
    State(state): State<AppState>,
    Json(dto): Json<ExecuteOneDto>,
) -> Result<Json<serde_json::Value>, (StatusCode, SimpleError)> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let task = task::Entity::find_by_id(dto.id)
        .filter(task::Column::WorkspaceId.eq(dto.workspace_id))
        .one(&state.db)
        .await
        .map_err(DbError::from)?
        .ok_or((StatusCode::NOT_FOUND, SimpleError::from("task not found")))?;

    let status = state
        .runtime
        .execute_task(task.id, true)
        .await
        .map_err(|_| internal_error_res())?;

    Ok(Json(serde_json::json!({
        "claimed": status.is_some(),
        "status": status.map(|s: TaskStatus| s.to_string()),
    })))
}

/// GET /tasks.list
pub async fn list_tasks(
    State(state): State<AppState>,
    Query(query): Query<ListTasksQuery>,
) -> Result<Json<Vec<task::Model>>, (StatusCode, SimpleError)> {
    let mut select = task::Entity::find()
        .filter(task::Column::WorkspaceId.eq(query.workspace_id))
        .order_by_desc(task::Column::CreatedAt);

    if let Some(kind) = query.kind {
        select = select.filter(task::Column::Kind.eq(kind));
    }

    if let Some(broadcast_id) = query.broadcast_id {
        select = select.filter(task::Column::BroadcastId.eq(broadcast_id));
    }

    if let Some(status) = query.status {
        select = select.filter(task::Column::Status.eq(status));
    }

    let tasks = select.all(&state.db).await.map_err(DbError::from)?;

    Ok(Json(tasks))
}

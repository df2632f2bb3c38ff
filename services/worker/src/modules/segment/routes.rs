use super::compiler;
use super::dto::{
    CreateSegmentDto, PreviewResultDto, PreviewSegmentDto, SegmentIdDto, UpdateSegmentDto,
};
use super::schedule::next_local_midnight;
use super::service::{self, PreviewError};
use crate::database::error::DbError;
use crate::modules::common::error_codes::{INVALID_SEGMENT_TREE, SEGMENT_DELETED};
use crate::modules::common::responses::SimpleError;
use crate::server::controller::AppState;
use axum::{extract::State, Json};
use chrono::Utc;
use chrono_tz::Tz;
use entity::segment::{self, SegmentStatus, SegmentTree};
use entity::traits::find_by_id_scoped;
use entity::workspace;
use http::StatusCode;
use sea_orm::{ActiveModelTrait, ActiveValue::Set, ColumnTrait, EntityTrait, QueryFilter};
use sea_query::Expr;
use validator::Validate;

type RouteError = (StatusCode, SimpleError);

/// a segment tree must compile before it is stored, a tree the compiler
/// rejects would otherwise fail every future build of the segment
fn check_tree_compiles(workspace_id: i32, tree: &SegmentTree) -> Result<(), RouteError> {
    compiler::compile(workspace_id, tree, Utc::now()).map_err(|err| {
        (
            StatusCode::BAD_REQUEST,
            SimpleError::from(format!("{}: {}", INVALID_SEGMENT_TREE, err)),
        )
    })?;

    Ok(())
}

fn check_timezone(timezone: &str) -> Result<(), RouteError> {
    timezone.parse::<Tz>().map_err(|_| {
        (
            StatusCode::BAD_REQUEST,
            SimpleError::from(format!("unknown timezone: {}", timezone)),
        )
    })?;

    Ok(())
}

async fn find_live_segment(
    state: &AppState,
    id: i32,
    workspace_id: i32,
) -> Result<segment::Model, RouteError> {
    let seg = find_by_id_scoped::<segment::Entity>(&state.db, id, workspace_id)
        .await
        .map_err(DbError::from)?
        .ok_or((StatusCode::NOT_FOUND, SimpleError::from("segment not found")))?;

    if seg.status == SegmentStatus::Deleted {
        return Err((StatusCode::CONFLICT, SimpleError::from(SEGMENT_DELETED)));
    }

    Ok(seg)
}

/// POST /segments.create
pub async fn create_segment(
    State(state): State<AppState>,
    Json(dto): Json<CreateSegmentDto>,
) -> Result<Json<segment::Model>, RouteError> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    check_tree_compiles(dto.workspace_id, &dto.tree)?;

    let timezone = match dto.timezone {
        Some(timezone) => timezone,
        None => workspace::Entity::find_by_id(dto.workspace_id)
            .one(&state.db)
            .await
            .map_err(DbError::from)?
            .ok_or((StatusCode::NOT_FOUND, SimpleError::from("workspace not found")))?
            .timezone,
    };

    check_timezone(&timezone)?;

    let now = Utc::now();

    let recompute_after = if compiler::has_relative_dates(&dto.tree) {
        next_local_midnight(&timezone, now)
    } else {
        None
    };

    let seg = segment::ActiveModel {
        created_at: Set(now),
        updated_at: Set(now),
        workspace_id: Set(dto.workspace_id),
        name: Set(dto.name),
        tree: Set(dto.tree),
        timezone: Set(timezone),
        status: Set(SegmentStatus::Building),
        users_count: Set(0),
        version: Set(0),
        recompute_after: Set(recompute_after),
        ..Default::default()
    }
    .insert(&state.db)
    .await
    .map_err(DbError::from)?;

    service::schedule_build(&state.db, seg.workspace_id, seg.id)
        .await
        .map_err(DbError::from)?;

    Ok(Json(seg))
}

/// POST /segments.update
///
/// updating the tree or timezone schedules a rebuild so the materialized
/// membership never drifts from the stored definition
pub async fn update_segment(
    State(state): State<AppState>,
    Json(dto): Json<UpdateSegmentDto>,
) -> Result<Json<segment::Model>, RouteError> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let seg = find_live_segment(&state, dto.id, dto.workspace_id).await?;

    let definition_changed = dto.tree.is_some() || dto.timezone.is_some();

    if let Some(tree) = &dto.tree {
        check_tree_compiles(dto.workspace_id, tree)?;
    }

    if let Some(timezone) = &dto.timezone {
        check_timezone(timezone)?;
    }

    let mut active: segment::ActiveModel = seg.into();

    if let Some(name) = dto.name {
        active.name = Set(name);
    }

    if let Some(tree) = dto.tree {
        active.tree = Set(tree);
    }

    if let Some(timezone) = dto.timezone {
        active.timezone = Set(timezone);
    }

    active.updated_at = Set(Utc::now());

    let seg = active.update(&state.db).await.map_err(DbError::from)?;

    if definition_changed {
        service::schedule_build(&state.db, seg.workspace_id, seg.id)
            .await
            .map_err(DbError::from)?;
    }

    Ok(Json(seg))
}

/// POST /segments.delete
///
/// segments are only ever soft deleted, the recompute check skips them and
/// a build in flight drops its work on the next slice
pub async fn delete_segment(
    State(state): State<AppState>,
    Json(dto): Json<SegmentIdDto>,
) -> Result<Json<serde_json::Value>, RouteError> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let seg = find_live_segment(&state, dto.id, dto.workspace_id).await?;

    segment::Entity::update_many()
        .col_expr(segment::Column::Status, Expr::value(SegmentStatus::Deleted))
        .col_expr(segment::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(segment::Column::Id.eq(seg.id))
        .exec(&state.db)
        .await
        .map_err(DbError::from)?;

    Ok(Json(serde_json::json!({ "deleted": true })))
}

/// POST /segments.rebuild
pub async fn rebuild_segment(
    State(state): State<AppState>,
    Json(dto): Json<SegmentIdDto>,
) -> Result<Json<serde_json::Value>, RouteError> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let seg = find_live_segment(&state, dto.id, dto.workspace_id).await?;

    let task = service::schedule_build(&state.db, seg.workspace_id, seg.id)
        .await
        .map_err(DbError::from)?;

    Ok(Json(serde_json::json!({ "taskId": task.id })))
}

/// POST /segments.preview
pub async fn preview_segment(
    State(state): State<AppState>,
    Json(dto): Json<PreviewSegmentDto>,
) -> Result<Json<PreviewResultDto>, RouteError> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let total_count = service::preview(&state.db, dto.workspace_id, &dto.tree)
        .await
        .map_err(|err| match err {
            PreviewError::Compile(err) => (
                StatusCode::BAD_REQUEST,
                SimpleError::from(format!("{}: {}", INVALID_SEGMENT_TREE, err)),
            ),
            PreviewError::Db(err) => DbError::from(err).into(),
        })?;

    Ok(Json(PreviewResultDto {
        total_count,
        emails: vec![],
    }))
}

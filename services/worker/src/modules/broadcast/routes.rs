use super::dto::{
    BroadcastIdDto, ScheduleBroadcastDto, SelectWinnerDto, TestResultsDto, TestResultsQuery,
    VariationResultDto,
};
use super::service;
use super::winner;
use crate::database::error::DbError;
use crate::modules::common::error_codes::{
    BROADCAST_NOT_CANCELLABLE, BROADCAST_NOT_IN_TEST, BROADCAST_NOT_SCHEDULABLE, EMPTY_AUDIENCE,
    TEMPLATE_NOT_A_VARIATION,
};
use crate::modules::common::responses::SimpleError;
use crate::server::controller::AppState;
use axum::{
    extract::{Query, State},
    Json,
};
use chrono::Utc;
use entity::broadcast::{self, BroadcastSchedule, BroadcastStatus};
use entity::traits::find_by_id_scoped;
use http::StatusCode;
use sea_orm::{ActiveModelTrait, ActiveValue::Set};
use validator::Validate;

type RouteError = (StatusCode, SimpleError);

async fn find_broadcast(
    state: &AppState,
    id: i32,
    workspace_id: i32,
) -> Result<broadcast::Model, RouteError> {
    find_by_id_scoped::<broadcast::Entity>(&state.db, id, workspace_id)
        .await
        .map_err(DbError::from)?
        .ok_or((
            StatusCode::NOT_FOUND,
            SimpleError::from("broadcast not found"),
        ))
}

/// POST /broadcasts.schedule
///
/// moves a draft (or re-schedules a scheduled) broadcast and creates its
/// send task, scheduling twice never creates a second task
pub async fn schedule_broadcast(
    State(state): State<AppState>,
    Json(dto): Json<ScheduleBroadcastDto>,
) -> Result<Json<broadcast::Model>, RouteError> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let bc = find_broadcast(&state, dto.id, dto.workspace_id).await?;

    if !matches!(bc.status, BroadcastStatus::Draft | BroadcastStatus::Scheduled) {
        return Err((
            StatusCode::CONFLICT,
            SimpleError::from(BROADCAST_NOT_SCHEDULABLE),
        ));
    }

    if bc.audience.list_id.is_none() && bc.audience.segment_id.is_none() {
        return Err((StatusCode::BAD_REQUEST, SimpleError::from(EMPTY_AUDIENCE)));
    }

    if !service::is_ab_test(&bc) && bc.template_id.is_none() {
        return Err((
            StatusCode::BAD_REQUEST,
            SimpleError::from("broadcast has no template"),
        ));
    }

    let schedule = BroadcastSchedule {
        send_now: dto.send_now,
        scheduled_date: dto.scheduled_date,
        scheduled_time: dto.scheduled_time,
        timezone: dto.timezone,
        use_recipient_timezone: dto.use_recipient_timezone,
    };

    let run_at = service::scheduled_at(&schedule, Utc::now())
        .map_err(|err| (StatusCode::BAD_REQUEST, SimpleError::from(err.to_string())))?;

    let mut active: broadcast::ActiveModel = bc.into();
    active.status = Set(BroadcastStatus::Scheduled);
    active.schedule = Set(Some(schedule));
    active.updated_at = Set(Utc::now());

    let bc = active.update(&state.db).await.map_err(DbError::from)?;

    service::schedule_send_task(&state.db, &bc, run_at)
        .await
        .map_err(DbError::from)?;

    Ok(Json(bc))
}

/// POST /broadcasts.pause
pub async fn pause_broadcast(
    State(state): State<AppState>,
    Json(dto): Json<BroadcastIdDto>,
) -> Result<Json<serde_json::Value>, RouteError> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let bc = find_broadcast(&state, dto.id, dto.workspace_id).await?;

    let paused = service::transition_status(
        &state.db,
        bc.id,
        &[
            BroadcastStatus::Scheduled,
            BroadcastStatus::Sending,
            BroadcastStatus::Testing,
            BroadcastStatus::TestCompleted,
            BroadcastStatus::WinnerSelected,
        ],
        BroadcastStatus::Paused,
    )
    .await
    .map_err(DbError::from)?;

    if !paused {
        return Err((
            StatusCode::CONFLICT,
            SimpleError::from("broadcast is not in a pausable status"),
        ));
    }

    Ok(Json(serde_json::json!({ "paused": true })))
}

/// POST /broadcasts.resume
///
/// explicit resume: flips `paused` back to `sending` and makes the send
/// task due now, the next slice picks the right phase from its checkpoint
pub async fn resume_broadcast(
    State(state): State<AppState>,
    Json(dto): Json<BroadcastIdDto>,
) -> Result<Json<serde_json::Value>, RouteError> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let bc = find_broadcast(&state, dto.id, dto.workspace_id).await?;

    let resumed = service::transition_status(
        &state.db,
        bc.id,
        &[BroadcastStatus::Paused],
        BroadcastStatus::Sending,
    )
    .await
    .map_err(DbError::from)?;

    if !resumed {
        return Err((
            StatusCode::CONFLICT,
            SimpleError::from("broadcast is not paused"),
        ));
    }

    service::nudge_send_task(&state.db, bc.id)
        .await
        .map_err(DbError::from)?;

    Ok(Json(serde_json::json!({ "resumed": true })))
}

/// POST /broadcasts.cancel
///
/// only drafts and scheduled broadcasts can be cancelled, once sending
/// started the options are pause or let it finish
pub async fn cancel_broadcast(
    State(state): State<AppState>,
    Json(dto): Json<BroadcastIdDto>,
) -> Result<Json<serde_json::Value>, RouteError> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let bc = find_broadcast(&state, dto.id, dto.workspace_id).await?;

    let cancelled = service::transition_status(
        &state.db,
        bc.id,
        &[BroadcastStatus::Draft, BroadcastStatus::Scheduled],
        BroadcastStatus::Cancelled,
    )
    .await
    .map_err(DbError::from)?;

    if !cancelled {
        return Err((
            StatusCode::CONFLICT,
            SimpleError::from(BROADCAST_NOT_CANCELLABLE),
        ));
    }

    Ok(Json(serde_json::json!({ "cancelled": true })))
}

/// POST /broadcasts.selectWinner
pub async fn select_winner(
    State(state): State<AppState>,
    Json(dto): Json<SelectWinnerDto>,
) -> Result<Json<serde_json::Value>, RouteError> {
    dto.validate()
        .map_err(|e| (StatusCode::BAD_REQUEST, SimpleError::from(e)))?;

    let bc = find_broadcast(&state, dto.id, dto.workspace_id).await?;

    let is_variation = bc
        .test_settings
        .as_ref()
        .map(|t| t.variations.iter().any(|v| v.template_id == dto.template_id))
        .unwrap_or(false);

    if !is_variation {
        return Err((
            StatusCode::BAD_REQUEST,
            SimpleError::from(TEMPLATE_NOT_A_VARIATION),
        ));
    }

    let selected = service::select_winner_cas(&state.db, bc.id, dto.template_id)
        .await
        .map_err(DbError::from)?;

    if !selected {
        return Err((
            StatusCode::CONFLICT,
            SimpleError::from(BROADCAST_NOT_IN_TEST),
        ));
    }

    service::nudge_send_task(&state.db, bc.id)
        .await
        .map_err(DbError::from)?;

    Ok(Json(serde_json::json!({ "winningTemplateId": dto.template_id })))
}

/// GET /broadcasts.getTestResults
pub async fn get_test_results(
    State(state): State<AppState>,
    Query(query): Query<TestResultsQuery>,
) -> Result<Json<TestResultsDto>, RouteError> {
    let bc = find_broadcast(&state, query.id, query.workspace_id).await?;

    let stats = winner::load_variation_stats(&state.db, bc.id)
        .await
        .map_err(DbError::from)?;

    let variations = bc
        .test_settings
        .as_ref()
        .map(|t| t.variations.as_slice())
        .unwrap_or_default();

    let variations = variations
        .iter()
        .map(|variation| {
            let stats = stats
                .iter()
                .find(|s| s.template_id == variation.template_id)
                .cloned()
                .unwrap_or(winner::VariationStats {
                    template_id: variation.template_id,
                    ..Default::default()
                });

            VariationResultDto {
                variation_name: variation.variation_name.clone(),
                open_rate: stats.open_rate(),
                click_rate: stats.click_rate(),
                stats,
            }
        })
        .collect();

    Ok(Json(TestResultsDto {
        status: bc.status,
        winning_template_id: bc.winning_template_id,
        variations,
    }))
}

use super::bots;
use super::links::TRANSPARENT_PIXEL;
use crate::modules::webhook::fanout;
use crate::server::controller::AppState;
use axum::{
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
};
use chrono::Utc;
use entity::message_history;
use http::{header, HeaderMap, StatusCode};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, TransactionTrait};
use sea_query::Expr;
use serde::Deserialize;
use serde_json::json;
use shared::dto::events::{AppEvent, EventKind};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct VisitQuery {
    pub url: String,
    pub mid: Option<Uuid>,
    pub wid: Option<i32>,
    pub ts: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct OpensQuery {
    pub mid: Option<Uuid>,
    pub wid: Option<i32>,
    pub ts: Option<i64>,
}

enum Engagement {
    Open,
    Click,
}

fn user_agent(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::USER_AGENT).and_then(|v| v.to_str().ok())
}

/// Sets the engagement timestamp of a message, first hit wins, and fans
/// out the matching event when this hit was the one that landed
async fn record_engagement(
    state: &AppState,
    message_id: Uuid,
    workspace_id: i32,
    engagement: Engagement,
) {
    let column = match engagement {
        Engagement::Open => message_history::Column::OpenedAt,
        Engagement::Click => message_history::Column::ClickedAt,
    };

    let result = async {
        let Some(message) = message_history::Entity::find_by_id(message_id)
            .filter(message_history::Column::WorkspaceId.eq(workspace_id))
            .one(&state.db)
            .await?
        else {
            return Ok::<_, sea_orm::DbErr>(None);
        };

        let now = Utc::now();

        let txn = state.db.begin().await?;

        // conditional on the column still being null so repeat hits and
        // concurrent executors record a single engagement
        let updated = message_history::Entity::update_many()
            .col_expr(column, Expr::value(Some(now)))
            .filter(message_history::Column::Id.eq(message_id))
            .filter(column.is_null())
            .exec(&txn)
            .await?;

        if updated.rows_affected == 0 {
            txn.commit().await?;
            return Ok(None);
        }

        let kind = match engagement {
            Engagement::Open => EventKind::MessageOpened,
            Engagement::Click => EventKind::MessageClicked,
        };

        let event = AppEvent::new(
            kind,
            workspace_id,
            &message.recipient_email,
            json!({
                "message_id": message_id,
                "broadcast_id": message.broadcast_id,
                "template_id": message.template_id,
            }),
        );

        fanout::append_to_timeline(&txn, &event).await?;
        txn.commit().await?;

        Ok(Some(event))
    }
    .await;

    match result {
        Ok(Some(event)) => state.events.publish(event),
        Ok(None) => {}
        Err(err) => debug!("[TRACKING] failed to record engagement: {}", err),
    }
}

/// GET /visit
///
/// records the click (bot and prefetch gated) and 303s to the destination,
/// the redirect happens no matter what so broken tracking never breaks
/// the link for the reader
pub async fn visit(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<VisitQuery>,
) -> Response {
    let destination = match url::Url::parse(&query.url) {
        Ok(url) => url,
        Err(_) => return (StatusCode::BAD_REQUEST, "invalid url").into_response(),
    };

    if bots::should_record(user_agent(&headers), query.ts, Utc::now()) {
        if let (Some(mid), Some(wid)) = (query.mid, query.wid) {
            record_engagement(&state, mid, wid, Engagement::Click).await;
        }
    }

    Redirect::to(destination.as_str()).into_response()
}

/// GET /opens
///
/// records the open (same gating as clicks) and answers the 1x1 pixel
pub async fn opens(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OpensQuery>,
) -> Response {
    if bots::should_record(user_agent(&headers), query.ts, Utc::now()) {
        if let (Some(mid), Some(wid)) = (query.mid, query.wid) {
            record_engagement(&state, mid, wid, Engagement::Open).await;
        }
    }

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "image/png")],
        TRANSPARENT_PIXEL,
    )
        .into_response()
}

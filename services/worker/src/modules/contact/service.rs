use crate::modules::webhook::{fanout, EventBus};
use chrono::Utc;
use entity::contact_list::{self, SubscriptionStatus};
use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbErr, EntityTrait, QueryFilter,
    TransactionTrait,
};
use sea_query::Expr;
use serde_json::json;
use shared::dto::events::{AppEvent, EventKind};
use uuid::Uuid;

/// Unsubscribes a contact from one list (or all of them when `list_id` is
/// None), appending the timeline event and fanning it out when anything
/// actually changed
pub async fn unsubscribe(
    db: &DatabaseConnection,
    events: &EventBus,
    workspace_id: i32,
    email: &str,
    list_id: Option<i32>,
) -> Result<bool, DbErr> {
    let txn = db.begin().await?;

    let mut update = contact_list::Entity::update_many()
        .col_expr(
            contact_list::Column::Status,
            Expr::value(SubscriptionStatus::Unsubscribed),
        )
        .col_expr(contact_list::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(contact_list::Column::WorkspaceId.eq(workspace_id))
        .filter(contact_list::Column::Email.eq(email))
        .filter(contact_list::Column::Status.eq(SubscriptionStatus::Active));

    if let Some(list_id) = list_id {
        update = update.filter(contact_list::Column::ListId.eq(list_id));
    }

    let result = update.exec(&txn).await?;

    if result.rows_affected == 0 {
        txn.commit().await?;
        return Ok(false);
    }

    let event = AppEvent::new(
        EventKind::ContactUnsubscribed,
        workspace_id,
        email,
        json!({ "list_id": list_id }),
    );

    fanout::append_to_timeline(&txn, &event).await?;
    txn.commit().await?;

    events.publish(event);

    Ok(true)
}

/// Suppresses a hard bounced address on every list it is active on, meant
/// to run inside the batch transaction of the send that got rejected
///
/// returns the bounce event to publish after the transaction commits, or
/// None when the address had no active memberships left
pub async fn record_hard_bounce<C: ConnectionTrait>(
    conn: &C,
    workspace_id: i32,
    email: &str,
    message_id: Uuid,
    broadcast_id: i32,
) -> Result<Option<AppEvent>, DbErr> {
    let result = contact_list::Entity::update_many()
        .col_expr(
            contact_list::Column::Status,
            Expr::value(SubscriptionStatus::Bounced),
        )
        .col_expr(contact_list::Column::UpdatedAt, Expr::value(Utc::now()))
        .filter(contact_list::Column::WorkspaceId.eq(workspace_id))
        .filter(contact_list::Column::Email.eq(email))
        .filter(contact_list::Column::Status.eq(SubscriptionStatus::Active))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Ok(None);
    }

    let event = AppEvent::new(
        EventKind::MessageBounced,
        workspace_id,
        email,
        json!({ "message_id": message_id, "broadcast_id": broadcast_id }),
    );

    fanout::append_to_timeline(conn, &event).await?;

    Ok(Some(event))
}

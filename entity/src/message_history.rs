use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Envelope of a single message handed to a ESP, one row per
/// `(broadcast, recipient, template)` send
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "message_history")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub workspace_id: i32,
    pub broadcast_id: Option<i32>,
    pub template_id: i32,
    pub recipient_email: String,
    pub status: MessageStatus,

    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub bounced_at: Option<DateTime<Utc>>,

    /// failure description for `failed` rows
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
}

#[derive(
    Eq, Clone, Debug, Display, PartialEq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    #[sea_orm(string_value = "sent")]
    #[strum(serialize = "sent")]
    Sent,

    #[sea_orm(string_value = "failed")]
    #[strum(serialize = "failed")]
    Failed,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::broadcast::Entity",
        from = "Column::BroadcastId",
        to = "super::broadcast::Column::Id",
        on_update = "Cascade",
        on_delete = "SetNull"
    )]
    Broadcast,
    #[sea_orm(
        belongs_to = "super::template::Entity",
        from = "Column::TemplateId",
        to = "super::template::Column::Id",
        on_update = "Cascade",
        on_delete = "NoAction"
    )]
    Template,
}

impl Related<super::broadcast::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Broadcast.def()
    }
}

impl Related<super::template::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Template.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

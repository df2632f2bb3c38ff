use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

/// A subscriber endpoint for platform events
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "webhook_subscription")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub workspace_id: i32,

    pub url: String,

    /// HMAC key for the `webhook-signature` header
    #[serde(skip_serializing)]
    pub secret: String,

    /// dotted event kinds this subscription wants, eg: `["message.opened"]`
    #[sea_orm(column_type = "JsonBinary")]
    pub event_types: EventTypes,

    /// optional payload filters, every key present here must match the
    /// event payload for the event to be delivered
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub filters: Option<Json>,

    pub enabled: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, Default)]
pub struct EventTypes(pub Vec<String>);

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::workspace::Entity",
        from = "Column::WorkspaceId",
        to = "super::workspace::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Workspace,
}

impl Related<super::workspace::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Workspace.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

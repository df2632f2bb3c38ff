use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;

/// A tenant of the platform, every other entity is scoped to a workspace
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "workspace")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub name: String,

    /// IANA timezone name used as the workspace default
    pub timezone: String,

    /// if open / click tracking pixels and link rewriting are enabled
    pub tracking_enabled: bool,

    /// per workspace secret, used to sign webhook envelopes when a
    /// subscription does not carry its own secret
    #[serde(skip_serializing)]
    pub secret_key: String,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::email_integration::Entity")]
    EmailIntegration,
    #[sea_orm(has_many = "super::broadcast::Entity")]
    Broadcast,
    #[sea_orm(has_many = "super::segment::Entity")]
    Segment,
    #[sea_orm(has_many = "super::task::Entity")]
    Task,
    #[sea_orm(has_many = "super::webhook_subscription::Entity")]
    WebhookSubscription,
}

impl Related<super::email_integration::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::EmailIntegration.def()
    }
}

impl Related<super::broadcast::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Broadcast.def()
    }
}

impl Related<super::segment::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Segment.def()
    }
}

impl Related<super::task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Task.def()
    }
}

impl Related<super::webhook_subscription::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::WebhookSubscription.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

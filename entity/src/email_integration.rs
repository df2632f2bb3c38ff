use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use strum::Display;

/// A workspace owned connection to a email service provider
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "email_integration")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub workspace_id: i32,
    pub name: String,
    pub kind: IntegrationKind,

    /// provider specific connection settings
    #[sea_orm(column_type = "JsonBinary")]
    #[serde(skip_serializing)]
    pub settings: IntegrationSettings,

    /// sendEmail rate cap for this provider connection
    pub requests_per_minute: i32,

    /// if this is the integration used by broadcasts that do not name one
    pub is_default: bool,
}

#[derive(
    Eq, Clone, Debug, Display, PartialEq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
pub enum IntegrationKind {
    #[sea_orm(string_value = "smtp")]
    #[serde(rename = "smtp")]
    #[strum(serialize = "smtp")]
    Smtp,

    #[sea_orm(string_value = "ses")]
    #[serde(rename = "ses")]
    #[strum(serialize = "ses")]
    Ses,
}

/// connection settings for a provider, SMTP fields are used when
/// `kind = smtp`, region when `kind = ses`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, Default)]
#[serde(rename_all = "camelCase")]
pub struct IntegrationSettings {
    /// address used on the `From` header of sent emails
    pub sender: String,

    pub smtp_host: Option<String>,
    pub smtp_port: Option<u16>,
    pub smtp_username: Option<String>,
    pub smtp_password: Option<String>,

    pub aws_region: Option<String>,
}

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

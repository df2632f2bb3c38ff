use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::Serialize;

/// A contact, identified by its email address within a workspace
///
/// the composite `(created_at, email)` index on this table is what makes
/// audience cursor pagination stable under bulk imports, where hundreds of
/// rows share the same second precision timestamp
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "contact")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub workspace_id: i32,

    #[sea_orm(primary_key, auto_increment = false)]
    pub email: String,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// id of this contact on the callers system
    pub external_id: Option<String>,

    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub country: Option<String>,
    pub language: Option<String>,

    pub custom_string_1: Option<String>,
    pub custom_string_2: Option<String>,
    pub custom_string_3: Option<String>,
    pub custom_string_4: Option<String>,
    pub custom_string_5: Option<String>,

    pub custom_number_1: Option<f64>,
    pub custom_number_2: Option<f64>,
    pub custom_number_3: Option<f64>,
    pub custom_number_4: Option<f64>,
    pub custom_number_5: Option<f64>,

    pub custom_datetime_1: Option<DateTime<Utc>>,
    pub custom_datetime_2: Option<DateTime<Utc>>,
    pub custom_datetime_3: Option<DateTime<Utc>>,
    pub custom_datetime_4: Option<DateTime<Utc>>,
    pub custom_datetime_5: Option<DateTime<Utc>>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub custom_json_1: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub custom_json_2: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub custom_json_3: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub custom_json_4: Option<Json>,
    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub custom_json_5: Option<Json>,
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

use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Membership of a contact on a mailing list
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize)]
#[sea_orm(table_name = "contact_list")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub workspace_id: i32,

    #[sea_orm(primary_key, auto_increment = false)]
    pub email: String,

    #[sea_orm(primary_key, auto_increment = false)]
    pub list_id: i32,

    pub status: SubscriptionStatus,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(
    Eq, Clone, Debug, Display, PartialEq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    #[sea_orm(string_value = "active")]
    #[strum(serialize = "active")]
    Active,

    #[sea_orm(string_value = "unsubscribed")]
    #[strum(serialize = "unsubscribed")]
    Unsubscribed,

    #[sea_orm(string_value = "bounced")]
    #[strum(serialize = "bounced")]
    Bounced,

    #[sea_orm(string_value = "complained")]
    #[strum(serialize = "complained")]
    Complained,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

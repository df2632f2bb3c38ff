use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use strum::Display;

/// A single shot campaign towards a audience, optionally A/B tested
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "broadcast")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub workspace_id: i32,
    pub name: String,
    pub status: BroadcastStatus,

    #[sea_orm(column_type = "JsonBinary")]
    pub audience: BroadcastAudience,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub schedule: Option<BroadcastSchedule>,

    /// template used by broadcasts without A/B testing
    pub template_id: Option<i32>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub test_settings: Option<TestSettings>,

    /// template that won (or was manually selected for) the A/B test
    pub winning_template_id: Option<i32>,

    /// integration to dispatch with, the workspace default is used if None
    pub email_integration_id: Option<i32>,

    pub tracking_enabled: bool,
}

#[derive(
    Eq, Clone, Debug, Display, PartialEq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(24))")]
#[serde(rename_all = "snake_case")]
pub enum BroadcastStatus {
    #[sea_orm(string_value = "draft")]
    #[strum(serialize = "draft")]
    Draft,

    #[sea_orm(string_value = "scheduled")]
    #[strum(serialize = "scheduled")]
    Scheduled,

    #[sea_orm(string_value = "testing")]
    #[strum(serialize = "testing")]
    Testing,

    #[sea_orm(string_value = "test_completed")]
    #[strum(serialize = "test_completed")]
    TestCompleted,

    #[sea_orm(string_value = "winner_selected")]
    #[strum(serialize = "winner_selected")]
    WinnerSelected,

    #[sea_orm(string_value = "sending")]
    #[strum(serialize = "sending")]
    Sending,

    #[sea_orm(string_value = "paused")]
    #[strum(serialize = "paused")]
    Paused,

    #[sea_orm(string_value = "sent")]
    #[strum(serialize = "sent")]
    Sent,

    #[sea_orm(string_value = "cancelled")]
    #[strum(serialize = "cancelled")]
    Cancelled,

    #[sea_orm(string_value = "failed")]
    #[strum(serialize = "failed")]
    Failed,
}

/// Who a broadcast is sent to
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, Default)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastAudience {
    pub list_id: Option<i32>,
    pub segment_id: Option<i32>,

    /// skip contacts whose list membership is not active
    #[serde(default = "default_true")]
    pub exclude_unsubscribed: bool,

    /// collapse contacts appearing more than once on the audience
    #[serde(default = "default_true")]
    pub skip_duplicate_emails: bool,
}

/// When a broadcast should go out, `send_now` wins over the date fields
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult, Default)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastSchedule {
    #[serde(default)]
    pub send_now: bool,

    /// `YYYY-MM-DD` local date, paired with `scheduled_time` and `timezone`
    pub scheduled_date: Option<String>,

    /// `HH:MM` local time
    pub scheduled_time: Option<String>,

    /// IANA timezone the date / time above are expressed in
    pub timezone: Option<String>,

    #[serde(default)]
    pub use_recipient_timezone: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult, Default)]
#[serde(rename_all = "camelCase")]
pub struct TestSettings {
    pub enabled: bool,

    /// percentage (1..=100) of the audience receiving test variations
    pub sample_percentage: u8,

    /// if the winner phase starts by itself once the test window elapses
    pub auto_send_winner: bool,

    pub winner_metric: WinnerMetric,

    pub test_duration_hours: u32,

    pub variations: Vec<Variation>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WinnerMetric {
    #[default]
    OpenRate,
    ClickRate,
}

/// One arm of a A/B test
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Variation {
    pub template_id: i32,
    pub variation_name: String,
}

fn default_true() -> bool {
    true
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
    #[sea_orm(has_many = "super::message_history::Entity")]
    MessageHistory,
    #[sea_orm(has_many = "super::task::Entity")]
    Task,
}

impl Related<super::workspace::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Workspace.def()
    }
}

impl Related<super::message_history::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::MessageHistory.def()
    }
}

impl Related<super::task::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Task.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl crate::traits::WorkspaceScoped for Entity {
    fn workspace_column() -> Column {
        Column::WorkspaceId
    }
}

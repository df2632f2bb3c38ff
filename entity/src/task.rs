use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use strum::Display;

/// A durable unit of work advanced by the task runtime in bounded slices
///
/// the `state` column is the per type checkpoint, fully describing where
/// the task should resume from on its next slice
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "task")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub workspace_id: i32,
    pub kind: TaskKind,
    pub status: TaskStatus,

    /// 0..=100, purely informational
    pub progress: i32,

    #[sea_orm(column_type = "JsonBinary")]
    pub state: TaskState,

    /// wall clock budget of a single slice of this task
    pub max_runtime_seconds: i32,

    /// the task is not eligible for claiming before this instant
    pub next_run_after: DateTime<Utc>,

    pub last_run_at: Option<DateTime<Utc>>,

    pub broadcast_id: Option<i32>,
    pub segment_id: Option<i32>,

    /// failure description for `failed` tasks
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
}

#[derive(
    Eq,
    Hash,
    Clone,
    Copy,
    Debug,
    Display,
    PartialEq,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[sea_orm(string_value = "send_broadcast")]
    #[strum(serialize = "send_broadcast")]
    SendBroadcast,

    #[sea_orm(string_value = "build_segment")]
    #[strum(serialize = "build_segment")]
    BuildSegment,

    #[sea_orm(string_value = "check_segment_recompute")]
    #[strum(serialize = "check_segment_recompute")]
    CheckSegmentRecompute,
}

#[derive(
    Eq, Clone, Copy, Debug, Display, PartialEq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[sea_orm(string_value = "pending")]
    #[strum(serialize = "pending")]
    Pending,

    #[sea_orm(string_value = "running")]
    #[strum(serialize = "running")]
    Running,

    #[sea_orm(string_value = "paused")]
    #[strum(serialize = "paused")]
    Paused,

    #[sea_orm(string_value = "completed")]
    #[strum(serialize = "completed")]
    Completed,

    #[sea_orm(string_value = "failed")]
    #[strum(serialize = "failed")]
    Failed,
}

/// Per task kind checkpoint, stored as JSON with a `type` discriminator
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskState {
    SendBroadcast(SendBroadcastState),
    BuildSegment(BuildSegmentState),
    CheckSegmentRecompute(CheckSegmentRecomputeState),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SendPhase {
    #[default]
    Single,
    Test,
    Winner,
}

/// position of the audience cursor after the last committed batch, the
/// composite `(created_at, email)` key keeps pagination stable when many
/// contacts share a creation timestamp
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecipientCursor {
    pub created_at: DateTime<Utc>,
    pub email: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SendBroadcastState {
    pub phase: SendPhase,

    /// recipients handed to the dispatcher so far, across phases
    pub recipient_offset: i64,

    /// audience size frozen at the first slice, progress denominator only,
    /// completion is derived from cursor exhaustion
    pub total_recipients: i64,

    pub sent_count: i64,
    pub failed_count: i64,

    pub last_recipient_cursor: Option<RecipientCursor>,

    pub test_variation_counters: Vec<VariationCounters>,

    pub winning_template_id: Option<i32>,

    /// consecutive dispatch failures, feeds the circuit breaker
    pub failure_run_count: i32,
    pub last_failure_at: Option<DateTime<Utc>>,

    /// instant the test phase finished sending its sample
    pub test_started_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationCounters {
    pub template_id: i32,
    pub sent: i64,
    pub failed: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BuildSegmentState {
    /// version being built, the fence read by membership consumers
    pub segment_version: i32,

    /// instant relative date windows are resolved against, frozen when the
    /// build starts so a resumed slice pages the same result set instead
    /// of one whose WHERE clause shifted with the clock
    #[serde(default)]
    pub evaluated_at: Option<DateTime<Utc>>,

    /// rows of the compiled query already staged
    pub offset: i64,
    pub total: i64,

    pub added: i64,
    pub removed: i64,
    pub unchanged: i64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct CheckSegmentRecomputeState {
    pub last_checked_at: Option<DateTime<Utc>>,

    /// builds scheduled by the last run
    pub scheduled: i64,
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
    #[sea_orm(
        belongs_to = "super::broadcast::Entity",
        from = "Column::BroadcastId",
        to = "super::broadcast::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Broadcast,
    #[sea_orm(
        belongs_to = "super::segment::Entity",
        from = "Column::SegmentId",
        to = "super::segment::Column::Id",
        on_update = "Cascade",
        on_delete = "Cascade"
    )]
    Segment,
}

impl Related<super::workspace::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Workspace.def()
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

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_state_json_carries_the_type_discriminator() {
        let state = TaskState::SendBroadcast(SendBroadcastState {
            phase: SendPhase::Test,
            recipient_offset: 10,
            total_recipients: 100,
            sent_count: 9,
            failed_count: 1,
            ..Default::default()
        });

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["type"], "send_broadcast");
        assert_eq!(json["phase"], "test");

        let back: TaskState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }

    #[test]
    fn build_segment_state_round_trips_by_tag() {
        let state = TaskState::BuildSegment(BuildSegmentState {
            segment_version: 3,
            evaluated_at: Some(Utc::now()),
            offset: 500,
            total: 1200,
            added: 40,
            removed: 2,
            unchanged: 458,
        });

        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["type"], "build_segment");

        let back: TaskState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}

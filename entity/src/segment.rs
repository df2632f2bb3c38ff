use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};
use strum::Display;

/// A stored boolean predicate over contacts and their related tables,
/// materialized into `segment_membership` rows by build tasks
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize)]
#[sea_orm(table_name = "segment")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub workspace_id: i32,
    pub name: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub tree: SegmentTree,

    /// IANA timezone relative date windows are evaluated in
    pub timezone: String,

    pub status: SegmentStatus,

    /// membership count of the last completed build
    pub users_count: i64,

    /// bumped at the start of every build, membership rows carrying this
    /// version are the authoritative audience
    pub version: i32,

    /// next recompute instant, non null iff the tree has at least one
    /// relative date operator
    pub recompute_after: Option<DateTime<Utc>>,

    /// failure description for `failed` segments
    #[sea_orm(column_type = "Text", nullable)]
    pub error: Option<String>,
}

#[derive(
    Eq, Clone, Copy, Debug, Display, PartialEq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
)]
#[sea_orm(rs_type = "String", db_type = "String(Some(16))")]
#[serde(rename_all = "snake_case")]
pub enum SegmentStatus {
    #[sea_orm(string_value = "building")]
    #[strum(serialize = "building")]
    Building,

    #[sea_orm(string_value = "active")]
    #[strum(serialize = "active")]
    Active,

    #[sea_orm(string_value = "failed")]
    #[strum(serialize = "failed")]
    Failed,

    #[sea_orm(string_value = "deleted")]
    #[strum(serialize = "deleted")]
    Deleted,
}

/// Boolean AST of a segment, internal nodes are n-ary `and` / `or`,
/// leaves are predicates against one of three sources
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, FromJsonQueryResult)]
#[serde(tag = "node", rename_all = "snake_case")]
pub enum SegmentTree {
    Branch(SegmentBranch),
    Leaf(SegmentLeaf),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentBranch {
    pub operator: BoolOperator,
    pub leaves: Vec<SegmentTree>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoolOperator {
    And,
    Or,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum SegmentLeaf {
    /// conjunction of field filters against the contacts table
    Contacts { filters: Vec<FieldFilter> },

    /// membership (or absence) on a mailing list
    ContactLists {
        operator: ListOperator,
        list_id: i32,
    },

    /// count of timeline events of a kind, optionally time windowed
    ContactTimeline {
        kind: String,
        count_operator: CountOperator,
        count_value: i64,
        #[serde(skip_serializing_if = "Option::is_none")]
        timeframe_operator: Option<TimeframeOperator>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        timeframe_values: Vec<String>,
    },
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFilter {
    /// column name, standard field or `custom_*` slot
    pub field: String,
    pub operator: FieldOperator,
    #[serde(default)]
    pub values: Vec<serde_json::Value>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldOperator {
    Equals,
    NotEquals,
    In,
    Gte,
    Lte,
    Contains,
    IsSet,
    IsNotSet,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ListOperator {
    In,
    NotIn,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CountOperator {
    AtLeast,
    AtMost,
    Exactly,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeframeOperator {
    /// relative window, makes the segment time relative
    InTheLastDays,
    Before,
    After,
    Between,
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
    #[sea_orm(has_many = "super::segment_membership::Entity")]
    SegmentMembership,
    #[sea_orm(has_many = "super::task::Entity")]
    Task,
}

impl Related<super::workspace::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Workspace.def()
    }
}

impl Related<super::segment_membership::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::SegmentMembership.def()
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

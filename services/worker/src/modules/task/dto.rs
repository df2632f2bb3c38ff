use entity::task::{TaskKind, TaskStatus};
use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExecutePendingDto {
    /// maximum tasks to claim on this call
    #[validate(range(min = 1, max = 1000))]
    pub limit: u64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteOneDto {
    #[validate(range(min = 1))]
    pub workspace_id: i32,

    #[validate(range(min = 1))]
    pub id: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListTasksQuery {
    pub workspace_id: i32,

    #[serde(rename = "type")]
    pub kind: Option<TaskKind>,

    pub broadcast_id: Option<i32>,

    pub status: Option<TaskStatus>,
}

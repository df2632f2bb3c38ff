use entity::segment::SegmentTree;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSegmentDto {
    #[validate(range(min = 1))]
    pub workspace_id: i32,

    #[validate(length(min = 1, max = 255))]
    pub name: String,

    pub tree: SegmentTree,

    /// IANA timezone, defaults to the workspace timezone when omitted
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSegmentDto {
    #[validate(range(min = 1))]
    pub workspace_id: i32,

    #[validate(range(min = 1))]
    pub id: i32,

    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,

    pub tree: Option<SegmentTree>,

    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SegmentIdDto {
    #[validate(range(min = 1))]
    pub workspace_id: i32,

    #[validate(range(min = 1))]
    pub id: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct PreviewSegmentDto {
    #[validate(range(min = 1))]
    pub workspace_id: i32,

    pub tree: SegmentTree,

    /// accepted for API compatibility, the sample list is always empty
    pub limit: Option<u64>,
}

/// preview responses expose the count only, the emails list is always
/// empty so contact addresses never leave the workspace through previews
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResultDto {
    pub total_count: i64,
    pub emails: Vec<String>,
}

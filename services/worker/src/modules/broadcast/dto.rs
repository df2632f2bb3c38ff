use super::winner::VariationStats;
use entity::broadcast::BroadcastStatus;
use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleBroadcastDto {
    #[validate(range(min = 1))]
    pub workspace_id: i32,

    #[validate(range(min = 1))]
    pub id: i32,

    #[serde(default)]
    pub send_now: bool,

    /// `YYYY-MM-DD`, required unless `send_now`
    pub scheduled_date: Option<String>,

    /// `HH:MM`, required unless `send_now`
    pub scheduled_time: Option<String>,

    /// IANA timezone the date / time above are expressed in
    pub timezone: Option<String>,

    #[serde(default)]
    pub use_recipient_timezone: bool,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BroadcastIdDto {
    #[validate(range(min = 1))]
    pub workspace_id: i32,

    #[validate(range(min = 1))]
    pub id: i32,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SelectWinnerDto {
    #[validate(range(min = 1))]
    pub workspace_id: i32,

    #[validate(range(min = 1))]
    pub id: i32,

    #[validate(range(min = 1))]
    pub template_id: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultsQuery {
    pub workspace_id: i32,
    pub id: i32,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariationResultDto {
    pub variation_name: String,

    #[serde(flatten)]
    pub stats: VariationStats,

    pub open_rate: f64,
    pub click_rate: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TestResultsDto {
    pub status: BroadcastStatus,
    pub winning_template_id: Option<i32>,
    pub variations: Vec<VariationResultDto>,
}

use serde::Deserialize;
use validator::Validate;

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeDto {
    #[validate(range(min = 1))]
    pub workspace_id: i32,

    #[validate(email)]
    pub email: String,

    /// unsubscribes from every list when omitted
    pub list_id: Option<i32>,
}

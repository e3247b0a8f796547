use serde::Deserialize;

use crate::nutrition::MealType;

#[derive(Debug, Deserialize)]
pub struct CorrectRequest {
    pub instruction: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitRequest {
    pub meal_type: MealType,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

use serde::{Deserialize, Serialize};
use ts_rs::TS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

/// A coding prompt and its answer key. Copied into a battle when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(rename_all = "camelCase")]
#[ts(export)]
pub struct Challenge {
    pub id: String,
    pub title: String,
    pub description: String,
    pub initial_code: String,
    pub expected_output: String,
    pub difficulty: Difficulty,
    pub points: i32,
}

//! Lane payload schema (§3 DATA MODEL: LaneInfo/LaneRule).

use crate::tagrule::TagRule;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaneGroup {
    pub group_id: String,
    #[serde(default)]
    pub namespace_id: String,
    #[serde(default)]
    pub application_id: String,
    #[serde(default)]
    pub entrance: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaneInfo {
    pub id: String,
    #[serde(default)]
    pub group_list: Vec<LaneGroup>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LaneRule {
    pub lane_id: String,
    #[serde(default)]
    pub priority: i64,
    /// Unix milliseconds. Ties in `priority` break on earlier
    /// `create_time` (§3).
    #[serde(default)]
    pub create_time: i64,
    #[serde(default)]
    pub tag_rule: TagRule,
}

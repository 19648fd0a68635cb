//! Routing rule payload schema (§3 DATA MODEL: RuleGroup/Rule/Dest).

use crate::tagrule::TagRule;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RuleGroup {
    pub microservice_name: String,
    #[serde(default)]
    pub namespace_id: String,
    #[serde(default)]
    pub fallback_status: bool,
    #[serde(default)]
    pub rule_list: Vec<Rule>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Rule {
    #[serde(default)]
    pub tag_rule: TagRule,
    #[serde(default)]
    pub dest_list: Vec<Dest>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Dest {
    pub dest_id: String,
    pub dest_weight: i64,
    #[serde(default)]
    pub dest_item_list: Vec<DestItem>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DestItem {
    pub field: String,
    pub value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_minimal_rule_group() {
        let yaml = r#"
microservice_name: orders
fallback_status: true
rule_list:
  - dest_list:
      - dest_id: a
        dest_weight: 30
        dest_item_list:
          - field: group_id
            value: g1
"#;
        let group: RuleGroup = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(group.microservice_name, "orders");
        assert!(group.fallback_status);
        assert_eq!(group.rule_list[0].dest_list[0].dest_weight, 30);
    }
}

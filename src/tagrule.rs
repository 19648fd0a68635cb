//! Tag rule predicate evaluation (§3 GLOSSARY "Tag rule", §4.5.b, §4.6.b).
//!
//! The schema isn't pinned down further by spec.md beyond "a predicate
//! over a mixture of system keys ... and user metadata drawn from the
//! context"; this implements the conventional small predicate tree
//! (equality/inequality/set membership, composed with and/or/not) that
//! the original's rule configs serialize as.

use crate::metadata::RequestContext;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Equal,
    NotEqual,
    In,
    NotIn,
    Exists,
    NotExists,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operation: Operation,
    #[serde(default)]
    pub values: Vec<String>,
}

impl Condition {
    fn hit(&self, ctx: &RequestContext) -> bool {
        let actual = ctx.field(&self.field);
        match self.operation {
            Operation::Equal => actual.map(|v| Some(v) == self.values.first().map(|s| s.as_str())) == Some(true),
            Operation::NotEqual => actual.map(|v| Some(v) != self.values.first().map(|s| s.as_str())).unwrap_or(true),
            Operation::In => actual.map(|v| self.values.iter().any(|x| x == v)).unwrap_or(false),
            Operation::NotIn => actual.map(|v| !self.values.iter().any(|x| x == v)).unwrap_or(true),
            Operation::Exists => actual.is_some(),
            Operation::NotExists => actual.is_none(),
        }
    }
}

/// A tag rule, an `and`/`or`/`not` tree over `Condition` leaves. `Hit`
/// evaluates the predicate against a request context.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TagRule {
    All(Vec<TagRule>),
    Any(Vec<TagRule>),
    Not(Box<TagRule>),
    Cond(Condition),
    /// An empty/absent rule always matches — mirrors an unset `tag_rule`
    /// on a `Rule`/`LaneRule` being unconditionally effective.
    Always,
}

impl Default for TagRule {
    fn default() -> Self {
        TagRule::Always
    }
}

impl TagRule {
    pub fn hit(&self, ctx: &RequestContext) -> bool {
        match self {
            TagRule::All(rules) => rules.iter().all(|r| r.hit(ctx)),
            TagRule::Any(rules) => rules.iter().any(|r| r.hit(ctx)),
            TagRule::Not(rule) => !rule.hit(ctx),
            TagRule::Cond(cond) => cond.hit(ctx),
            TagRule::Always => true,
        }
    }
}

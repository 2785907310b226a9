//! Predicates for conditional execution groups.

use crate::ActionId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Predicate evaluated against the run's [`ExecutionContext`].
///
/// Keys are dotted paths. The first segment names a run variable or, failing
/// that, the id of an action whose output is then traversed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Always,
    Never,
    Exists { key: String },
    Equals { key: String, value: Value },
    NotEquals { key: String, value: Value },
    Succeeded { action_id: ActionId },
    Failed { action_id: ActionId },
    All { conditions: Vec<Condition> },
    Any { conditions: Vec<Condition> },
    Not { condition: Box<Condition> },
}

impl Condition {
    pub fn equals(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Condition::Equals {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn succeeded(action_id: impl Into<ActionId>) -> Self {
        Condition::Succeeded {
            action_id: action_id.into(),
        }
    }

    pub fn negate(self) -> Self {
        Condition::Not {
            condition: Box::new(self),
        }
    }

    pub fn evaluate(&self, ctx: &ExecutionContext) -> bool {
        match self {
            Condition::Always => true,
            Condition::Never => false,
            Condition::Exists { key } => ctx.lookup(key).is_some_and(|v| !v.is_null()),
            Condition::Equals { key, value } => ctx.lookup(key) == Some(value),
            Condition::NotEquals { key, value } => ctx.lookup(key) != Some(value),
            Condition::Succeeded { action_id } => ctx.succeeded.contains(action_id),
            Condition::Failed { action_id } => ctx.failed.contains(action_id),
            Condition::All { conditions } => conditions.iter().all(|c| c.evaluate(ctx)),
            Condition::Any { conditions } => conditions.iter().any(|c| c.evaluate(ctx)),
            Condition::Not { condition } => !condition.evaluate(ctx),
        }
    }
}

/// Data accumulated by a run and visible to conditions and actions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionContext {
    pub variables: HashMap<String, Value>,
    pub outputs: HashMap<ActionId, Value>,
    pub succeeded: HashSet<ActionId>,
    pub failed: HashSet<ActionId>,
}

impl ExecutionContext {
    pub fn new(variables: HashMap<String, Value>) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }

    pub fn lookup(&self, key: &str) -> Option<&Value> {
        let mut segments = key.split('.');
        let head = segments.next()?;
        let mut current = self
            .variables
            .get(head)
            .or_else(|| self.outputs.get(head))?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    pub fn record_success(&mut self, action_id: &str, output: Option<Value>) {
        self.failed.remove(action_id);
        self.succeeded.insert(action_id.to_string());
        if let Some(output) = output {
            self.outputs.insert(action_id.to_string(), output);
        }
    }

    pub fn record_failure(&mut self, action_id: &str) {
        self.failed.insert(action_id.to_string());
    }
}

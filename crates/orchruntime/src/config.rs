use orchcore::services::AgentRecoveryAction;
use orchcore::EngineError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// What the run does once a group has failed past its retries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FailureHandling {
    /// Fail the run immediately; later groups never start
    #[default]
    Abort,
    /// Keep running dependent groups; the run still ends failed
    Continue,
}

/// Maps failure-reason keywords to an agent recovery action
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecoveryRule {
    pub keywords: Vec<String>,
    pub action: AgentRecoveryAction,
}

impl AgentRecoveryRule {
    pub fn new(keywords: &[&str], action: AgentRecoveryAction) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.to_string()).collect(),
            action,
        }
    }

    pub fn matches(&self, reason: &str) -> bool {
        let reason = reason.to_lowercase();
        self.keywords
            .iter()
            .any(|k| !k.is_empty() && reason.contains(&k.to_lowercase()))
    }
}

/// Ordered rule table; the first matching rule wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryRuleTable {
    pub rules: Vec<AgentRecoveryRule>,
    pub fallback: AgentRecoveryAction,
}

impl RecoveryRuleTable {
    pub fn classify(&self, reason: &str) -> AgentRecoveryAction {
        self.rules
            .iter()
            .find(|rule| rule.matches(reason))
            .map(|rule| rule.action)
            .unwrap_or(self.fallback)
    }
}

impl Default for RecoveryRuleTable {
    fn default() -> Self {
        Self {
            rules: vec![
                AgentRecoveryRule::new(&["timeout", "temporary"], AgentRecoveryAction::Retry),
                AgentRecoveryRule::new(&["configuration", "invalid"], AgentRecoveryAction::Restart),
            ],
            fallback: AgentRecoveryAction::Disable,
        }
    }
}

/// Configuration for the engine
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on concurrent actions within one parallel group
    pub max_parallel_actions: usize,
    pub event_buffer_size: usize,
    /// Order actions by descending priority before grouping
    pub priority_grouping: bool,
    pub failure_handling: FailureHandling,
    pub recovery_rules: RecoveryRuleTable,
    /// Caps every backoff wait regardless of the action's policy
    pub max_backoff_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_parallel_actions: 10,
            event_buffer_size: 1000,
            priority_grouping: false,
            failure_handling: FailureHandling::Abort,
            recovery_rules: RecoveryRuleTable::default(),
            max_backoff_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_table_classifies_in_order() {
        let table = RecoveryRuleTable::default();
        assert_eq!(table.classify("Agent execution timeout"), AgentRecoveryAction::Retry);
        assert_eq!(table.classify("TEMPORARY outage"), AgentRecoveryAction::Retry);
        assert_eq!(table.classify("invalid configuration"), AgentRecoveryAction::Restart);
        // first rule wins when both match
        assert_eq!(table.classify("invalid response after timeout"), AgentRecoveryAction::Retry);
        assert_eq!(table.classify("segfault"), AgentRecoveryAction::Disable);
    }

    #[test]
    fn custom_table_from_json() {
        let config: EngineConfig = serde_json::from_str(
            r#"{
                "failure_handling": "continue",
                "recovery_rules": {
                    "rules": [{"keywords": ["quota"], "action": "disable"}],
                    "fallback": "retry"
                }
            }"#,
        )
        .unwrap();
        assert_eq!(config.failure_handling, FailureHandling::Continue);
        assert_eq!(config.max_parallel_actions, 10);
        assert_eq!(config.recovery_rules.classify("quota exceeded"), AgentRecoveryAction::Disable);
        assert_eq!(config.recovery_rules.classify("timeout"), AgentRecoveryAction::Retry);
    }
}

use async_trait::async_trait;
use orchcore::services::{BusinessRuleValidationService, ValidationVerdict};
use orchcore::{ActionNode, ServiceError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};

/// One declarative business rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum BusinessRule {
    /// The model must carry a non-null value at `key`
    ModelField { key: String },
    /// Every action must define parameter `key`
    RequireParameter { key: String },
    RequireAgent,
    MaxActions { limit: usize },
    UniqueExecutionOrder,
    /// Warn (never block) about actions whose retries are disabled
    WarnWithoutRetry,
}

impl BusinessRule {
    fn check(&self, model: &Value, actions: &[ActionNode], verdict: &mut ValidationVerdict) {
        match self {
            BusinessRule::ModelField { key } => {
                if model.get(key).map_or(true, Value::is_null) {
                    verdict.errors.push(format!("model field '{key}' is required"));
                }
            }
            BusinessRule::RequireParameter { key } => {
                for action in actions.iter().filter(|a| !a.parameters.contains_key(key)) {
                    verdict
                        .errors
                        .push(format!("action '{}' is missing parameter '{key}'", action.id));
                }
            }
            BusinessRule::RequireAgent => {
                for action in actions.iter().filter(|a| a.agent_id.is_none()) {
                    verdict
                        .errors
                        .push(format!("action '{}' has no assigned agent", action.id));
                }
            }
            BusinessRule::MaxActions { limit } => {
                if actions.len() > *limit {
                    verdict.errors.push(format!(
                        "{} actions exceed the limit of {limit}",
                        actions.len()
                    ));
                }
            }
            BusinessRule::UniqueExecutionOrder => {
                let mut seen = HashSet::new();
                for action in actions {
                    if !seen.insert(action.execution_order) {
                        verdict.errors.push(format!(
                            "execution order {} is used more than once",
                            action.execution_order
                        ));
                    }
                }
            }
            BusinessRule::WarnWithoutRetry => {
                for action in actions.iter().filter(|a| !a.retry_policy.is_enabled()) {
                    verdict
                        .warnings
                        .push(format!("action '{}' has retries disabled", action.id));
                }
            }
        }
    }
}

/// Validator that evaluates a fixed rule set; every violated rule is reported.
#[derive(Default)]
pub struct RuleSetValidator {
    rules: Vec<BusinessRule>,
    unavailable: AtomicBool,
}

impl RuleSetValidator {
    pub fn new(rules: Vec<BusinessRule>) -> Self {
        Self {
            rules,
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn rules(&self) -> &[BusinessRule] {
        &self.rules
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

#[async_trait]
impl BusinessRuleValidationService for RuleSetValidator {
    async fn validate_business_rules(
        &self,
        model: &Value,
        actions: &[ActionNode],
    ) -> Result<ValidationVerdict, ServiceError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(ServiceError::Unavailable("business rule engine".to_string()));
        }

        let mut verdict = ValidationVerdict::default();
        for rule in &self.rules {
            rule.check(model, actions, &mut verdict);
        }
        verdict.is_valid = verdict.errors.is_empty();

        tracing::debug!(
            rules = self.rules.len(),
            errors = verdict.errors.len(),
            warnings = verdict.warnings.len(),
            "business rules evaluated"
        );
        Ok(verdict)
    }
}

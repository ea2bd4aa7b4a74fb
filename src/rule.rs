//! Approval rules and the chain resolver
//!
//! One enabled rule per (movement type, level); the resolver walks the
//! levels in order, gating each rule on its optional condition and
//! expanding role approvers through the directory.

use crate::directory::RoleDirectory;
use crate::error::{ConfigurationError, ValidationError};
use crate::expr::{Condition, Scope};

pub const MAX_APPROVAL_LEVEL: u32 = 5;

/// The party a rule assigns a level to: a specific user, or every holder
/// of a named role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Approver {
    Role(String),
    User(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ApprovalRule {
    pub movement_code: String,
    pub level: u32,
    pub approver: Approver,
    pub sequence: u32,
    pub escalation_days: Option<u32>,
    pub enabled: bool,
    condition: Option<Condition>,
}

impl ApprovalRule {
    pub fn new(movement_code: &str, level: u32, approver: Approver) -> Self {
        Self {
            movement_code: movement_code.to_string(),
            level,
            approver,
            sequence: level,
            escalation_days: None,
            enabled: true,
            condition: None,
        }
    }

    pub fn with_sequence(mut self, sequence: u32) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn with_escalation_days(mut self, days: u32) -> Self {
        self.escalation_days = Some(days);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Gate this rule on a restricted condition over the request's field
    /// scope. Malformed expressions are refused before the rule exists.
    pub fn with_condition(mut self, expr: &str) -> Result<Self, ValidationError> {
        self.condition = Some(Condition::parse(expr)?);
        Ok(self)
    }

    /// Whether the rule applies to a given request. Evaluation faults gate
    /// the rule off rather than failing the transition.
    pub fn applies_to(&self, scope: &Scope) -> bool {
        match &self.condition {
            None => true,
            Some(condition) => match condition.evaluate(scope) {
                Ok(applies) => applies,
                Err(fault) => {
                    tracing::warn!(
                        movement_code = %self.movement_code,
                        level = self.level,
                        condition = condition.source(),
                        %fault,
                        "condition evaluation failed, gating rule off"
                    );
                    false
                }
            },
        }
    }
}

/// A resolved approval level: the rule that governs it and the concrete
/// users who may act on it, ordered by directory order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLevel {
    pub level: u32,
    pub approver: Approver,
    pub approvers: Vec<String>,
    pub escalation_days: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<ApprovalRule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a rule, enforcing the level range and the one-enabled-rule-per
    /// (movement type, level) invariant.
    pub fn add(&mut self, rule: ApprovalRule) -> anyhow::Result<()> {
        if rule.level < 1 || rule.level > MAX_APPROVAL_LEVEL {
            return Err(ValidationError::LevelOutOfRange {
                got: rule.level,
                max: MAX_APPROVAL_LEVEL,
            }
            .into());
        }
        if rule.enabled
            && self.rules.iter().any(|existing| {
                existing.enabled
                    && existing.movement_code == rule.movement_code
                    && existing.level == rule.level
            })
        {
            return Err(ConfigurationError::DuplicateRule {
                movement_code: rule.movement_code.clone(),
                level: rule.level,
            }
            .into());
        }
        self.rules.push(rule);
        Ok(())
    }

    /// Enabled rules for a movement type, ordered by level.
    pub fn rules_for(&self, movement_code: &str) -> Vec<&ApprovalRule> {
        let mut rules: Vec<&ApprovalRule> = self
            .rules
            .iter()
            .filter(|r| r.enabled && r.movement_code == movement_code)
            .collect();
        rules.sort_by_key(|r| (r.level, r.sequence));
        rules
    }

    pub fn has_rules_for(&self, movement_code: &str) -> bool {
        self.rules
            .iter()
            .any(|r| r.enabled && r.movement_code == movement_code)
    }

    /// Number of levels that apply to a request, counting from level 1
    /// until the first gap or gated-off level.
    pub fn applicable_levels(&self, movement_code: &str, scope: &Scope) -> u32 {
        let mut level = 1;
        while self
            .rule_for(movement_code, level)
            .is_some_and(|rule| rule.applies_to(scope))
        {
            level += 1;
        }
        level - 1
    }

    fn rule_for(&self, movement_code: &str, level: u32) -> Option<&ApprovalRule> {
        self.rules
            .iter()
            .find(|r| r.enabled && r.movement_code == movement_code && r.level == level)
    }

    /// Resolve the eligible approvers for one level.
    ///
    /// `NoRuleForLevel` signals the chain is complete at that point; a
    /// gated-off rule ends the chain the same way.
    pub fn approvers_for_level(
        &self,
        movement_code: &str,
        level: u32,
        scope: &Scope,
        directory: &RoleDirectory,
    ) -> Result<ResolvedLevel, ConfigurationError> {
        let missing = || ConfigurationError::NoRuleForLevel {
            movement_code: movement_code.to_string(),
            level,
        };

        let rule = self.rule_for(movement_code, level).ok_or_else(missing)?;
        if !rule.applies_to(scope) {
            return Err(missing());
        }

        let approvers = match &rule.approver {
            Approver::User(user) => vec![user.clone()],
            Approver::Role(role) => directory.users_with_role(role),
        };

        Ok(ResolvedLevel {
            level,
            approver: rule.approver.clone(),
            approvers,
            escalation_days: rule.escalation_days,
        })
    }

    /// Whether an actor may act on the given level: explicit user match,
    /// or holding the rule's role.
    pub fn is_eligible(
        &self,
        movement_code: &str,
        level: u32,
        actor: &str,
        scope: &Scope,
        directory: &RoleDirectory,
    ) -> bool {
        let Ok(resolved) = self.approvers_for_level(movement_code, level, scope, directory) else {
            return false;
        };
        match &resolved.approver {
            Approver::User(user) => user == actor,
            Approver::Role(role) => directory.user_has_role(actor, role),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::Value;

    fn directory() -> RoleDirectory {
        let mut directory = RoleDirectory::new();
        directory.add_user("sup1", &["Supervisor"]);
        directory.add_user("sup2", &["Supervisor"]);
        directory.add_user("mgr", &["Manager"]);
        directory
    }

    fn scope_with_qty(qty: f64) -> Scope {
        let mut scope = Scope::new();
        scope.insert("qty_total".into(), Value::Num(qty));
        scope
    }

    #[test]
    fn one_enabled_rule_per_level() {
        let mut rules = RuleSet::new();
        rules
            .add(ApprovalRule::new("261", 1, Approver::Role("Supervisor".into())))
            .unwrap();
        let err = rules
            .add(ApprovalRule::new("261", 1, Approver::User("mgr".into())))
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<ConfigurationError>(),
            Some(&ConfigurationError::DuplicateRule {
                movement_code: "261".into(),
                level: 1,
            })
        );

        // a disabled duplicate is fine
        rules
            .add(ApprovalRule::new("261", 1, Approver::User("mgr".into())).disabled())
            .unwrap();
    }

    #[test]
    fn level_range_is_enforced() {
        let mut rules = RuleSet::new();
        assert!(
            rules
                .add(ApprovalRule::new("261", 0, Approver::User("mgr".into())))
                .is_err()
        );
        assert!(
            rules
                .add(ApprovalRule::new("261", 6, Approver::User("mgr".into())))
                .is_err()
        );
    }

    #[test]
    fn role_rules_expand_to_all_holders() {
        let mut rules = RuleSet::new();
        rules
            .add(ApprovalRule::new("261", 1, Approver::Role("Supervisor".into())))
            .unwrap();

        let resolved = rules
            .approvers_for_level("261", 1, &Scope::new(), &directory())
            .unwrap();
        assert_eq!(resolved.approvers, vec!["sup1".to_string(), "sup2".to_string()]);
    }

    #[test]
    fn missing_level_signals_chain_complete() {
        let mut rules = RuleSet::new();
        rules
            .add(ApprovalRule::new("261", 1, Approver::Role("Supervisor".into())))
            .unwrap();

        let err = rules
            .approvers_for_level("261", 2, &Scope::new(), &directory())
            .unwrap_err();
        assert_eq!(
            err,
            ConfigurationError::NoRuleForLevel {
                movement_code: "261".into(),
                level: 2,
            }
        );
    }

    #[test]
    fn conditions_gate_rules() {
        let mut rules = RuleSet::new();
        rules
            .add(
                ApprovalRule::new("301", 1, Approver::User("mgr".into()))
                    .with_condition("qty_total > 100")
                    .unwrap(),
            )
            .unwrap();

        assert!(
            rules
                .approvers_for_level("301", 1, &scope_with_qty(500.0), &directory())
                .is_ok()
        );
        assert!(
            rules
                .approvers_for_level("301", 1, &scope_with_qty(10.0), &directory())
                .is_err()
        );
        // an eval fault (empty scope has no qty_total) gates the rule off
        assert!(
            rules
                .approvers_for_level("301", 1, &Scope::new(), &directory())
                .is_err()
        );
    }

    #[test]
    fn eligibility_covers_user_and_role_matches() {
        let mut rules = RuleSet::new();
        rules
            .add(ApprovalRule::new("261", 1, Approver::Role("Supervisor".into())))
            .unwrap();
        rules
            .add(ApprovalRule::new("261", 2, Approver::User("mgr".into())))
            .unwrap();

        let scope = Scope::new();
        let directory = directory();
        assert!(rules.is_eligible("261", 1, "sup1", &scope, &directory));
        assert!(!rules.is_eligible("261", 1, "mgr", &scope, &directory));
        assert!(rules.is_eligible("261", 2, "mgr", &scope, &directory));
        assert!(!rules.is_eligible("261", 3, "mgr", &scope, &directory));
    }
}

//! SAP-style movement type reference data
//!
//! Movement types are immutable reference data looked up by code. The
//! registry is held in memory by the service; the codes follow the SAP
//! convention the warehouse floor already speaks (261 FrontFlush, 311
//! BackFlush, and so on).

use std::collections::BTreeMap;

use crate::error::{ConfigurationError, ValidationError};
use crate::expr::Condition;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MovementCategory {
    GoodsReceipt,
    GoodsIssue,
    TransferPosting,
    Production,
}

impl MovementCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementCategory::GoodsReceipt => "Goods Receipt",
            MovementCategory::GoodsIssue => "Goods Issue",
            MovementCategory::TransferPosting => "Transfer Posting",
            MovementCategory::Production => "Production",
        }
    }
}

/// Effect a posted movement has on bin quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StockEffect {
    Increase,
    Decrease,
    Transfer,
}

/// Minimum authorization a movement type demands of its final approver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AuthorizationLevel {
    Operator,
    Supervisor,
    Manager,
    Director,
}

impl AuthorizationLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthorizationLevel::Operator => "Operator",
            AuthorizationLevel::Supervisor => "Supervisor",
            AuthorizationLevel::Manager => "Manager",
            AuthorizationLevel::Director => "Director",
        }
    }

    /// Authorization a role name carries, if it names one of the tiers.
    pub fn from_role(role: &str) -> Option<Self> {
        let lowered = role.to_lowercase();
        if lowered.contains("director") {
            Some(AuthorizationLevel::Director)
        } else if lowered.contains("manager") {
            Some(AuthorizationLevel::Manager)
        } else if lowered.contains("supervisor") {
            Some(AuthorizationLevel::Supervisor)
        } else if lowered.contains("operator") {
            Some(AuthorizationLevel::Operator)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MovementType {
    pub code: String,
    pub description: String,
    pub category: MovementCategory,
    pub effect: StockEffect,
    pub requires_approval: bool,
    pub requires_dual_signature: bool,
    pub authorization_level: AuthorizationLevel,
    pub requires_source_warehouse: bool,
    pub requires_target_warehouse: bool,
    pub allow_negative_stock: bool,
    pub is_active: bool,
    validation: Option<Condition>,
}

impl MovementType {
    pub fn new(
        code: &str,
        description: &str,
        category: MovementCategory,
        effect: StockEffect,
    ) -> Self {
        // transfers always need both endpoints
        let is_transfer = effect == StockEffect::Transfer;
        Self {
            code: code.to_string(),
            description: description.to_string(),
            category,
            effect,
            requires_approval: false,
            requires_dual_signature: false,
            authorization_level: AuthorizationLevel::Operator,
            requires_source_warehouse: is_transfer || effect == StockEffect::Decrease,
            requires_target_warehouse: is_transfer || effect == StockEffect::Increase,
            allow_negative_stock: false,
            is_active: true,
            validation: None,
        }
    }

    pub fn with_approval(mut self, authorization_level: AuthorizationLevel) -> Self {
        self.requires_approval = true;
        self.authorization_level = authorization_level;
        self
    }

    pub fn with_dual_signature(mut self) -> Self {
        self.requires_dual_signature = true;
        self
    }

    pub fn allow_negative_stock(mut self) -> Self {
        self.allow_negative_stock = true;
        self
    }

    pub fn deactivated(mut self) -> Self {
        self.is_active = false;
        self
    }

    /// Attach a restricted validation expression evaluated against the
    /// movement's field scope. Malformed expressions are refused here.
    pub fn with_validation(mut self, expr: &str) -> Result<Self, ValidationError> {
        self.validation = Some(Condition::parse(expr)?);
        Ok(self)
    }

    pub fn validation(&self) -> Option<&Condition> {
        self.validation.as_ref()
    }

    /// Display form used in slips and summaries, e.g. "261 - FrontFlush".
    pub fn display(&self) -> String {
        format!("{} - {}", self.code, self.description)
    }
}

/// Lookup table for movement types, keyed by code.
#[derive(Debug, Clone, Default)]
pub struct MovementTypeRegistry {
    types: BTreeMap<String, MovementType>,
}

impl MovementTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard SAP-style catalogue the warehouse app ships with.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        for movement_type in [
            MovementType::new(
                "101",
                "Goods Receipt for Purchase Order",
                MovementCategory::GoodsReceipt,
                StockEffect::Increase,
            ),
            MovementType::new(
                "201",
                "Goods Issue for Cost Center",
                MovementCategory::GoodsIssue,
                StockEffect::Decrease,
            )
            .with_approval(AuthorizationLevel::Supervisor),
            MovementType::new(
                "261",
                "FrontFlush (Goods Issue for Production)",
                MovementCategory::Production,
                StockEffect::Decrease,
            )
            .with_approval(AuthorizationLevel::Supervisor)
            .with_dual_signature(),
            MovementType::new(
                "301",
                "Transfer Posting Plant to Plant",
                MovementCategory::TransferPosting,
                StockEffect::Transfer,
            )
            .with_approval(AuthorizationLevel::Manager),
            MovementType::new(
                "311",
                "BackFlush (Transfer for Kitting)",
                MovementCategory::Production,
                StockEffect::Transfer,
            )
            .with_approval(AuthorizationLevel::Supervisor)
            .with_dual_signature(),
        ] {
            // the standard codes are distinct, insert cannot collide
            let _ = registry.insert(movement_type);
        }
        registry
    }

    pub fn insert(&mut self, movement_type: MovementType) -> Result<(), ConfigurationError> {
        if self.types.contains_key(&movement_type.code) {
            return Err(ConfigurationError::DuplicateMovementCode(
                movement_type.code.clone(),
            ));
        }
        if (movement_type.category == MovementCategory::GoodsReceipt
            && movement_type.effect != StockEffect::Increase)
            || (movement_type.category == MovementCategory::GoodsIssue
                && movement_type.effect != StockEffect::Decrease)
        {
            tracing::warn!(
                code = %movement_type.code,
                category = movement_type.category.as_str(),
                effect = ?movement_type.effect,
                "movement category and stock effect disagree"
            );
        }
        self.types.insert(movement_type.code.clone(), movement_type);
        Ok(())
    }

    pub fn get(&self, code: &str) -> Result<&MovementType, ConfigurationError> {
        self.types
            .get(code)
            .ok_or_else(|| ConfigurationError::UnknownMovementType(code.to_string()))
    }

    /// Active movement types, optionally narrowed to one category.
    pub fn active(&self, category: Option<MovementCategory>) -> Vec<&MovementType> {
        self.types
            .values()
            .filter(|t| t.is_active && category.is_none_or(|c| t.category == c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transfer_types_require_both_warehouses() {
        let mt = MovementType::new(
            "303",
            "Transfer Posting",
            MovementCategory::TransferPosting,
            StockEffect::Transfer,
        );
        assert!(mt.requires_source_warehouse);
        assert!(mt.requires_target_warehouse);
    }

    #[test]
    fn standard_catalogue_resolves_common_codes() {
        let registry = MovementTypeRegistry::standard();
        assert_eq!(
            registry.get("261").unwrap().display(),
            "261 - FrontFlush (Goods Issue for Production)"
        );
        assert!(registry.get("311").unwrap().requires_dual_signature);
        assert!(!registry.get("101").unwrap().requires_approval);
        assert_eq!(
            registry.get("999"),
            Err(ConfigurationError::UnknownMovementType("999".into()))
        );
    }

    #[test]
    fn duplicate_codes_are_refused() {
        let mut registry = MovementTypeRegistry::standard();
        let dup = MovementType::new(
            "261",
            "Duplicate",
            MovementCategory::Production,
            StockEffect::Decrease,
        );
        assert_eq!(
            registry.insert(dup),
            Err(ConfigurationError::DuplicateMovementCode("261".into()))
        );
    }
}

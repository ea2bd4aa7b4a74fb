//! Quick cross-module checks that the public API hangs together

use movement_approval::{
    details::MovementDetails,
    directory::RoleDirectory,
    error::ConfigurationError,
    expr::Value,
    movement::{AuthorizationLevel, MovementCategory, MovementTypeRegistry, StockEffect},
    rule::{ApprovalRule, Approver, RuleSet},
    temperature::TemperatureSpec,
    warehouse::{standard_hierarchy, WarehouseKind},
};

#[test]
fn standard_catalogue_is_coherent() {
    let registry = MovementTypeRegistry::standard();

    let receipt = registry.get("101").unwrap();
    assert_eq!(receipt.effect, StockEffect::Increase);
    assert!(!receipt.requires_approval);
    assert!(receipt.requires_target_warehouse);
    assert!(!receipt.requires_source_warehouse);

    let front_flush = registry.get("261").unwrap();
    assert_eq!(front_flush.category, MovementCategory::Production);
    assert!(front_flush.requires_approval);
    assert!(front_flush.requires_dual_signature);
    assert_eq!(
        front_flush.authorization_level,
        AuthorizationLevel::Supervisor
    );
    assert_eq!(
        front_flush.display(),
        "261 - FrontFlush (Goods Issue for Production)"
    );

    assert!(matches!(
        registry.get("999"),
        Err(ConfigurationError::UnknownMovementType(_))
    ));
    assert_eq!(registry.active(Some(MovementCategory::Production)).len(), 2);
}

#[test]
fn conditions_gate_rules_on_the_request_scope() {
    let mut rules = RuleSet::new();
    rules
        .add(ApprovalRule::new("201", 1, Approver::User("sam".into())))
        .unwrap();
    rules
        .add(
            ApprovalRule::new("201", 2, Approver::User("mia".into()))
                .with_condition("qty_total > 100")
                .unwrap(),
        )
        .unwrap();

    let directory = RoleDirectory::new();

    let small = MovementDetails::new()
        .set_movement_code("201")
        .add_item("BOLT-M8", 10.0, Some("Stores"), None);
    assert_eq!(rules.applicable_levels("201", &small.scope()), 1);

    let large = MovementDetails::new()
        .set_movement_code("201")
        .add_item("BOLT-M8", 500.0, Some("Stores"), None);
    assert_eq!(rules.applicable_levels("201", &large.scope()), 2);

    let resolved = rules
        .approvers_for_level("201", 2, &large.scope(), &directory)
        .unwrap();
    assert_eq!(resolved.approvers, vec!["mia"]);
}

#[test]
fn scope_values_feed_string_comparisons() {
    let details = MovementDetails::new()
        .set_movement_code("301")
        .add_item("PCB-01", 5.0, Some("Stores - AMB-W"), Some("WIP - AMB-W"));
    let scope = details.scope();
    assert_eq!(
        scope.get("movement_code"),
        Some(&Value::Str("301".into()))
    );

    let rule = ApprovalRule::new("301", 1, Approver::User("sam".into()))
        .with_condition("source_warehouse == 'Stores - AMB-W' and qty_total < 10")
        .unwrap();
    assert!(rule.applies_to(&scope));
}

#[test]
fn cold_chain_specs_parse_and_check() {
    let spec = TemperatureSpec::parse("2-8°C").unwrap();
    assert!(spec.contains(4.0));
    assert!(!spec.contains(10.0));

    let ambient = TemperatureSpec::parse("25°C/60%RH").unwrap();
    assert_eq!(ambient.humidity_pct, Some(60.0));
}

#[test]
fn a_new_site_gets_the_full_warehouse_tree() {
    let tree = standard_hierarchy("AMB-W");
    assert_eq!(tree.len(), 5);
    let stores = tree
        .iter()
        .find(|w| w.kind == WarehouseKind::RawMaterial)
        .unwrap();
    assert_eq!(stores.name, "Stores - AMB-W");
    assert!(stores.check_naming("AMB-W").is_empty());
}

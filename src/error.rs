//! Domain error types for the approval workflow

/// Errors caused by missing or inconsistent reference data.
///
/// `NoRuleForLevel` doubles as the chain-complete signal: the resolver
/// returns it when asked for a level no rule is configured for.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("no approval rules configured for movement type {0}")]
    NoRules(String),
    #[error("no approval rule for movement type {movement_code} at level {level}")]
    NoRuleForLevel { movement_code: String, level: u32 },
    #[error(
        "an enabled approval rule already exists for movement type {movement_code} at level {level}"
    )]
    DuplicateRule { movement_code: String, level: u32 },
    #[error("unknown movement type {0}")]
    UnknownMovementType(String),
    #[error("movement code {0} already exists")]
    DuplicateMovementCode(String),
    #[error("movement type {0} does not require approval")]
    ApprovalNotRequired(String),
}

/// Transition refused because the actor is not eligible. No state change.
#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PermissionError {
    #[error("{actor} is not an eligible approver for level {level}")]
    NotAnApprover { actor: String, level: u32 },
    #[error("movement type {movement_code} requires {required} authorization")]
    InsufficientAuthorization {
        movement_code: String,
        required: String,
    },
}

/// Input refused before any mutation takes place.
#[derive(thiserror::Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("rejection reason is required")]
    MissingRejectionReason,
    #[error("condition {expr:?} is malformed: {reason}")]
    MalformedCondition { expr: String, reason: String },
    #[error("approval level must be between 1 and {max}, got {got}")]
    LevelOutOfRange { got: u32, max: u32 },
    #[error("movement has no line items")]
    EmptyMovement,
    #[error("line quantity must be positive, got {0}")]
    NonPositiveQty(f64),
    #[error("movement type {0} requires a source warehouse")]
    MissingSourceWarehouse(String),
    #[error("movement type {0} requires a target warehouse")]
    MissingTargetWarehouse(String),
    #[error("movement type {0} is not active")]
    InactiveMovementType(String),
    #[error("movement failed validation condition {condition:?} of type {movement_code}")]
    ValidationFailed {
        movement_code: String,
        condition: String,
    },
    #[error(
        "insufficient stock for {item_code} in {warehouse}: available {available}, required {required}"
    )]
    InsufficientStock {
        item_code: String,
        warehouse: String,
        available: f64,
        required: f64,
    },
    #[error("{role} signature is required for movement type {movement_code}")]
    MissingSignature { role: String, movement_code: String },
    #[error("dual signatures must come from two distinct users")]
    DuplicateSignatory,
    #[error("request {0} is not in a state that allows this transition")]
    InvalidState(String),
    #[error("temperature specification {0:?} could not be parsed")]
    MalformedTemperature(String),
    #[error("request {0} was not found")]
    RequestNotFound(String),
    #[error("work order {0} was not found")]
    WorkOrderNotFound(String),
}

//! Multi-level approval workflow for warehouse stock movements.
//!
//! Movements are classified by SAP-style numeric codes, approved level
//! by level against configurable rules, and posted to a bin-level stock
//! ledger. Every transition is an event on an append-only audit chain,
//! and request state is derived from that chain rather than stored.

pub mod context;
pub mod details;
pub mod directory;
pub mod error;
pub mod expr;
pub mod movement;
pub mod notify;
pub mod rule;
pub mod service;
pub mod stock;
pub mod temperature;
pub mod utils;
pub mod warehouse;
pub mod zone;

pub use context::{ApprovalStatus, AuditEvent, AuditEventKind, RequestContext};
pub use details::{MovementDetails, MovementLine, Signature, TimeStamp};
pub use directory::RoleDirectory;
pub use error::{ConfigurationError, PermissionError, ValidationError};
pub use movement::{
    AuthorizationLevel, MovementCategory, MovementType, MovementTypeRegistry, StockEffect,
};
pub use rule::{ApprovalRule, Approver, RuleSet, MAX_APPROVAL_LEVEL};
pub use service::{ApprovalService, ApprovalSummary, EscalationReport, PendingApproval};
pub use stock::{Bin, StockLedger};
pub use temperature::{TemperatureSpec, TemperatureUnit};
pub use warehouse::{Warehouse, WarehouseKind};
pub use zone::{AssessmentLog, MaterialAssessment, WorkOrder, ZoneStatus};

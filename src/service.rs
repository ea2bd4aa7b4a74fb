//! The approval service: every workflow transition goes through here
//!
//! One service instance owns the sled handle plus the reference data
//! (movement types, rules, role directory). Requests and details are
//! persisted, configuration lives in memory and is loaded at startup.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use sled::Db;
use tracing::{info, warn};

use crate::context::{ApprovalStatus, AuditEventKind, RequestContext};
use crate::details::MovementDetails;
use crate::directory::RoleDirectory;
use crate::error::{ConfigurationError, PermissionError, ValidationError};
use crate::movement::{AuthorizationLevel, MovementType, MovementTypeRegistry};
use crate::notify::{LogNotifier, Notifier};
use crate::rule::RuleSet;
use crate::stock::StockLedger;
use crate::utils::new_uuid_to_bech32;
use crate::warehouse::Warehouse;
use crate::zone::{AssessmentLog, MaterialAssessment, WorkOrder};

const DETAILS_PREFIX: &str = "det/";
const REQUEST_HRP: &str = "mvr";

/// A request waiting on a user, as listed in their queue.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingApproval {
    pub request_id: String,
    pub movement_code: String,
    pub level: u32,
    pub escalated: bool,
}

/// Flat read model of one request for slips and dashboards.
#[derive(Debug, Clone)]
pub struct ApprovalSummary {
    pub request_id: String,
    pub movement: String,
    pub status: ApprovalStatus,
    pub current_level: u32,
    /// Levels that apply to this request's scope.
    pub total_levels: u32,
    pub pending_approvers: Vec<String>,
    pub comments: Vec<(String, String)>,
    pub history: Vec<String>,
}

/// Outcome of one escalation sweep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EscalationReport {
    pub checked: usize,
    pub escalated: usize,
    pub reminded: usize,
}

pub struct ApprovalService {
    db: Arc<Db>,
    registry: MovementTypeRegistry,
    rules: RuleSet,
    directory: RoleDirectory,
    notifier: Box<dyn Notifier>,
    fallback_role: String,
}

impl ApprovalService {
    pub fn new(
        db: Arc<Db>,
        registry: MovementTypeRegistry,
        rules: RuleSet,
        directory: RoleDirectory,
    ) -> Self {
        Self {
            db,
            registry,
            rules,
            directory,
            notifier: Box::new(LogNotifier),
            fallback_role: "Warehouse Admin".to_string(),
        }
    }

    pub fn with_notifier(mut self, notifier: Box<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    /// Role notified when an escalation finds no higher level to go to.
    pub fn with_fallback_role(mut self, role: &str) -> Self {
        self.fallback_role = role.to_string();
        self
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    pub fn ledger(&self) -> StockLedger<'_> {
        StockLedger::new(&self.db)
    }

    /// Validate a draft against its movement type and persist it.
    ///
    /// The details record and the opening audit event land in one batch,
    /// so a request never exists without the revision it refers to.
    pub fn submit_request(&self, details: &MovementDetails, requester: &str) -> Result<String> {
        let code = details
            .movement_code()
            .ok_or_else(|| anyhow::Error::msg("Movement code is not set"))?;
        let movement = self.registry.get(code)?.clone();
        if !movement.is_active {
            return Err(ValidationError::InactiveMovementType(code.to_string()).into());
        }
        if movement.requires_source_warehouse && !details.has_source_warehouse() {
            return Err(ValidationError::MissingSourceWarehouse(code.to_string()).into());
        }
        if movement.requires_target_warehouse && !details.has_target_warehouse() {
            return Err(ValidationError::MissingTargetWarehouse(code.to_string()).into());
        }
        if let Some(condition) = movement.validation() {
            if !condition.evaluate(&details.scope())? {
                return Err(ValidationError::ValidationFailed {
                    movement_code: code.to_string(),
                    condition: condition.source().to_string(),
                }
                .into());
            }
        }

        let (hash, contents) = details.validate_and_finalise()?;
        let request_id = new_uuid_to_bech32(REQUEST_HRP)?;

        let mut context = RequestContext::new(&request_id);
        context.append(requester, AuditEventKind::Submitted { details_hash: hash.clone() });

        let mut batch = sled::Batch::default();
        batch.insert(
            format!("{DETAILS_PREFIX}{hash}").into_bytes(),
            contents,
        );
        batch.insert(
            context.storage_key().into_bytes(),
            minicbor::to_vec(&context)?,
        );
        self.db.apply_batch(batch)?;

        info!(request_id, movement = movement.display(), requester, "request submitted");
        Ok(request_id)
    }

    fn load_details(&self, context: &RequestContext) -> Result<MovementDetails> {
        let hash = context.details_hash().ok_or_else(|| {
            ValidationError::InvalidState(context.request_id().to_string())
        })?;
        let Some(contents) = self.db.get(format!("{DETAILS_PREFIX}{hash}"))? else {
            return Err(anyhow::Error::msg(format!(
                "details record {hash} is missing"
            )));
        };
        Ok(minicbor::decode(&contents)?)
    }

    fn movement_for(&self, details: &MovementDetails) -> Result<MovementType> {
        let code = details
            .movement_code()
            .ok_or_else(|| anyhow::Error::msg("Movement code is not set"))?;
        Ok(self.registry.get(code)?.clone())
    }

    /// Whether this particular request needs sign-off: its movement type
    /// demands approval and at least one rule applies to its scope.
    pub fn approval_required(&self, details: &MovementDetails) -> Result<bool> {
        let movement = self.movement_for(details)?;
        if !movement.requires_approval {
            return Ok(false);
        }
        Ok(self.rules.applicable_levels(&movement.code, &details.scope()) > 0)
    }

    /// Open the approval chain at level 1.
    pub fn request_approval(&self, request_id: &str) -> Result<()> {
        let mut context = RequestContext::load_from_db(&self.db, request_id)?;
        if context.is_posted() || context.current_status() != ApprovalStatus::Draft {
            return Err(ValidationError::InvalidState(request_id.to_string()).into());
        }

        let details = self.load_details(&context)?;
        let movement = self.movement_for(&details)?;
        if !movement.requires_approval {
            return Err(ConfigurationError::ApprovalNotRequired(movement.code).into());
        }
        if !self.rules.has_rules_for(&movement.code) {
            return Err(ConfigurationError::NoRules(movement.code).into());
        }

        let scope = details.scope();
        let resolved = match self
            .rules
            .approvers_for_level(&movement.code, 1, &scope, &self.directory)
        {
            Ok(resolved) => resolved,
            // Every rule gated itself off for this request.
            Err(ConfigurationError::NoRuleForLevel { .. }) => {
                return Err(ConfigurationError::ApprovalNotRequired(movement.code).into());
            }
            Err(err) => return Err(err.into()),
        };

        context.append(
            "system",
            AuditEventKind::ApprovalRequested {
                level: 1,
                approvers: resolved.approvers.clone(),
            },
        );
        context.save_to_db(&self.db)?;

        if let Err(fault) = self
            .notifier
            .approval_requested(request_id, 1, &resolved.approvers)
        {
            warn!(request_id, %fault, "approval notification failed");
        }
        info!(request_id, approvers = ?resolved.approvers, "approval requested at level 1");
        Ok(())
    }

    /// Grant the pending level. Advances to the next level, or completes
    /// the chain when no further rule applies.
    pub fn approve(
        &self,
        request_id: &str,
        actor: &str,
        comment: Option<&str>,
    ) -> Result<ApprovalStatus> {
        let mut context = RequestContext::load_from_db(&self.db, request_id)?;
        let level = match context.current_status() {
            ApprovalStatus::Pending(level) | ApprovalStatus::Escalated(level) => level,
            _ => return Err(ValidationError::InvalidState(request_id.to_string()).into()),
        };

        let details = self.load_details(&context)?;
        let movement = self.movement_for(&details)?;
        let scope = details.scope();

        if !self
            .rules
            .is_eligible(&movement.code, level, actor, &scope, &self.directory)
        {
            return Err(PermissionError::NotAnApprover {
                actor: actor.to_string(),
                level,
            }
            .into());
        }

        let next = level + 1;
        let next_level = match self
            .rules
            .approvers_for_level(&movement.code, next, &scope, &self.directory)
        {
            Ok(resolved) => Some(resolved),
            Err(ConfigurationError::NoRuleForLevel { .. }) => None,
            Err(err) => return Err(err.into()),
        };

        // The last approver must carry the movement type's authorization
        // tier, whoever the rule named.
        if next_level.is_none() {
            let held = self
                .directory
                .roles_of(actor)
                .iter()
                .filter_map(|role| AuthorizationLevel::from_role(role))
                .max();
            if held < Some(movement.authorization_level) {
                return Err(PermissionError::InsufficientAuthorization {
                    movement_code: movement.code.clone(),
                    required: movement.authorization_level.as_str().to_string(),
                }
                .into());
            }
        }

        context.append(
            actor,
            AuditEventKind::Approved {
                level,
                comment: comment.map(str::to_string),
            },
        );

        if let Some(resolved) = next_level {
            context.append(
                "system",
                AuditEventKind::ApprovalRequested {
                    level: next,
                    approvers: resolved.approvers.clone(),
                },
            );
            context.save_to_db(&self.db)?;
            if let Err(fault) =
                self.notifier
                    .approval_requested(request_id, next, &resolved.approvers)
            {
                warn!(request_id, %fault, "approval notification failed");
            }
        } else {
            context.save_to_db(&self.db)?;
        }

        let status = context.current_status();
        info!(request_id, actor, level, %status, "approval granted");
        Ok(status)
    }

    /// Refuse the pending level. Terminal, and a reason is mandatory.
    pub fn reject(&self, request_id: &str, actor: &str, reason: &str) -> Result<()> {
        if reason.trim().is_empty() {
            return Err(ValidationError::MissingRejectionReason.into());
        }

        let mut context = RequestContext::load_from_db(&self.db, request_id)?;
        let level = match context.current_status() {
            ApprovalStatus::Pending(level) | ApprovalStatus::Escalated(level) => level,
            _ => return Err(ValidationError::InvalidState(request_id.to_string()).into()),
        };

        let details = self.load_details(&context)?;
        let movement = self.movement_for(&details)?;
        if !self
            .rules
            .is_eligible(&movement.code, level, actor, &details.scope(), &self.directory)
        {
            return Err(PermissionError::NotAnApprover {
                actor: actor.to_string(),
                level,
            }
            .into());
        }

        let requester = context
            .history()
            .first()
            .map(|e| e.actor.clone())
            .unwrap_or_default();

        context.append(
            actor,
            AuditEventKind::Rejected {
                reason: reason.to_string(),
            },
        );
        context.save_to_db(&self.db)?;

        if let Err(fault) = self.notifier.rejected(request_id, &requester, reason) {
            warn!(request_id, %fault, "rejection notification failed");
        }
        info!(request_id, actor, reason, "request rejected");
        Ok(())
    }

    /// Whether the pending level has sat past its escalation window.
    pub fn should_escalate(&self, request_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let context = RequestContext::load_from_db(&self.db, request_id)?;
        let ApprovalStatus::Pending(level) = context.current_status() else {
            return Ok(false);
        };

        let details = self.load_details(&context)?;
        let movement = self.movement_for(&details)?;
        let resolved = match self.rules.approvers_for_level(
            &movement.code,
            level,
            &details.scope(),
            &self.directory,
        ) {
            Ok(resolved) => resolved,
            Err(_) => return Ok(false),
        };
        let Some(days) = resolved.escalation_days else {
            return Ok(false);
        };
        let Some(requested_at) = context.requested_at() else {
            return Ok(false);
        };

        Ok(now - requested_at.to_datetime_utc() >= Duration::days(days as i64))
    }

    /// Re-notify without advancing the level: the next level's approvers
    /// when one exists, otherwise the fallback role. The approvers the
    /// request is parked with get a reminder in the same transition.
    pub fn escalate(&self, request_id: &str, now: DateTime<Utc>) -> Result<bool> {
        if !self.should_escalate(request_id, now)? {
            return Ok(false);
        }

        let mut context = RequestContext::load_from_db(&self.db, request_id)?;
        let ApprovalStatus::Pending(level) = context.current_status() else {
            return Ok(false);
        };
        let current_approvers = context.pending_approvers().unwrap_or_default();

        let details = self.load_details(&context)?;
        let movement = self.movement_for(&details)?;
        let notified = match self.rules.approvers_for_level(
            &movement.code,
            level + 1,
            &details.scope(),
            &self.directory,
        ) {
            Ok(resolved) => resolved.approvers,
            Err(ConfigurationError::NoRuleForLevel { .. }) => {
                self.directory.users_with_role(&self.fallback_role)
            }
            Err(err) => return Err(err.into()),
        };

        context.append(
            "system",
            AuditEventKind::Escalated {
                level,
                notified: notified.clone(),
            },
        );
        context.save_to_db(&self.db)?;

        if let Err(fault) = self.notifier.reminder(request_id, level, &current_approvers) {
            warn!(request_id, %fault, "reminder notification failed");
        }
        if let Err(fault) = self.notifier.escalated(request_id, level, &notified) {
            warn!(request_id, %fault, "escalation notification failed");
        }
        warn!(request_id, level, ?notified, "request escalated");
        Ok(true)
    }

    /// Walk every stored request once. Overdue pending requests escalate,
    /// already escalated ones get a reminder.
    pub fn run_escalation_sweep(&self, now: DateTime<Utc>) -> Result<EscalationReport> {
        let mut report = EscalationReport::default();
        for request_id in RequestContext::all_ids(&self.db)? {
            report.checked += 1;
            let context = RequestContext::load_from_db(&self.db, &request_id)?;
            match context.current_status() {
                ApprovalStatus::Pending(_) => {
                    if self.escalate(&request_id, now)? {
                        report.escalated += 1;
                    }
                }
                ApprovalStatus::Escalated(level) => {
                    let recipients = context.pending_approvers().unwrap_or_default();
                    if let Err(fault) = self.notifier.reminder(&request_id, level, &recipients) {
                        warn!(request_id, %fault, "reminder notification failed");
                    }
                    report.reminded += 1;
                }
                _ => (),
            }
        }
        info!(
            checked = report.checked,
            escalated = report.escalated,
            reminded = report.reminded,
            "escalation sweep complete"
        );
        Ok(report)
    }

    /// Apply the movement to the stock ledger.
    ///
    /// Requires the chain to be complete (or not required at all), dual
    /// signatures where the movement type demands them, and stock cover
    /// unless the type allows negative stock.
    pub fn post_movement(&self, request_id: &str, actor: &str) -> Result<()> {
        let mut context = RequestContext::load_from_db(&self.db, request_id)?;
        if context.is_posted() {
            return Err(ValidationError::InvalidState(request_id.to_string()).into());
        }

        let details = self.load_details(&context)?;
        let movement = self.movement_for(&details)?;

        let needs_approval = self.approval_required(&details)?;
        match context.current_status() {
            ApprovalStatus::Approved => (),
            ApprovalStatus::Draft if !needs_approval => (),
            _ => return Err(ValidationError::InvalidState(request_id.to_string()).into()),
        }

        if movement.requires_dual_signature {
            let operator = details.operator_signature().ok_or_else(|| {
                ValidationError::MissingSignature {
                    role: "operator".to_string(),
                    movement_code: movement.code.clone(),
                }
            })?;
            let supervisor = details.supervisor_signature().ok_or_else(|| {
                ValidationError::MissingSignature {
                    role: "supervisor".to_string(),
                    movement_code: movement.code.clone(),
                }
            })?;
            if operator.user == supervisor.user {
                return Err(ValidationError::DuplicateSignatory.into());
            }
        }

        let ledger = self.ledger();
        if !movement.allow_negative_stock {
            ledger.check_availability(&details, movement.effect)?;
        }
        ledger.apply(&details, movement.effect)?;

        context.append(actor, AuditEventKind::Posted);
        context.save_to_db(&self.db)?;
        info!(request_id, actor, movement = movement.display(), "movement posted");

        self.log_storage_conditions(request_id, &details)?;
        self.reassess_work_orders(details.affected_warehouses())?;
        Ok(())
    }

    /// Stock landing in a temperature controlled warehouse gets its
    /// required conditions on the record.
    fn log_storage_conditions(&self, request_id: &str, details: &MovementDetails) -> Result<()> {
        for line in details.items() {
            let Some(target) = line.target_warehouse.as_deref() else {
                continue;
            };
            let Some(warehouse) = Warehouse::load_from_db(&self.db, target)? else {
                continue;
            };
            if let Some(spec) = warehouse.temperature_spec() {
                info!(
                    request_id,
                    warehouse = target,
                    item = %line.item_code,
                    conditions = %spec,
                    "posted into a temperature controlled warehouse"
                );
            }
        }
        Ok(())
    }

    /// Re-run the zone assessment for every work order drawing from one
    /// of the given warehouses.
    fn reassess_work_orders(&self, warehouses: Vec<String>) -> Result<()> {
        let ledger = self.ledger();
        let log = AssessmentLog::new(&self.db);
        for id in WorkOrder::all_ids(&self.db)? {
            let work_order = WorkOrder::load_from_db(&self.db, &id)?;
            if !warehouses.iter().any(|w| work_order.draws_from(w)) {
                continue;
            }
            let assessment = MaterialAssessment::compute(&work_order, &ledger)?;
            info!(
                work_order = id,
                zone = %assessment.zone,
                completion = assessment.completion_percentage,
                "work order reassessed"
            );
            log.record(&assessment)?;
        }
        Ok(())
    }

    pub fn register_work_order(&self, work_order: &WorkOrder) -> Result<MaterialAssessment> {
        work_order.save_to_db(&self.db)?;
        self.assess_work_order(&work_order.id)
    }

    pub fn assess_work_order(&self, id: &str) -> Result<MaterialAssessment> {
        let work_order = WorkOrder::load_from_db(&self.db, id)?;
        let assessment = MaterialAssessment::compute(&work_order, &self.ledger())?;
        AssessmentLog::new(&self.db).record(&assessment)?;
        Ok(assessment)
    }

    /// Requests currently parked with the given user, escalated ones
    /// included.
    pub fn pending_approvals_for(&self, user: &str) -> Result<Vec<PendingApproval>> {
        let mut queue = Vec::new();
        for request_id in RequestContext::all_ids(&self.db)? {
            let context = RequestContext::load_from_db(&self.db, &request_id)?;
            let (level, escalated) = match context.current_status() {
                ApprovalStatus::Pending(level) => (level, false),
                ApprovalStatus::Escalated(level) => (level, true),
                _ => continue,
            };
            let waiting_on = context.pending_approvers().unwrap_or_default();
            if !waiting_on.iter().any(|approver| approver == user) {
                continue;
            }
            let details = self.load_details(&context)?;
            queue.push(PendingApproval {
                request_id,
                movement_code: details.movement_code().unwrap_or_default().to_string(),
                level,
                escalated,
            });
        }
        Ok(queue)
    }

    pub fn approval_summary(&self, request_id: &str) -> Result<ApprovalSummary> {
        let context = RequestContext::load_from_db(&self.db, request_id)?;
        let details = self.load_details(&context)?;
        let movement = self.movement_for(&details)?;

        Ok(ApprovalSummary {
            request_id: request_id.to_string(),
            movement: movement.display(),
            status: context.current_status(),
            current_level: context.current_level(),
            total_levels: self
                .rules
                .applicable_levels(&movement.code, &details.scope()),
            pending_approvers: context.pending_approvers().unwrap_or_default(),
            comments: context.comments(),
            history: context
                .history()
                .iter()
                .map(|event| {
                    format!(
                        "{} {}: {}",
                        event.at.to_datetime_utc().format("%Y-%m-%d %H:%M:%S"),
                        event.actor,
                        event.kind
                    )
                })
                .collect(),
        })
    }

    /// Test hook: rewrite a request's chain with explicit timestamps.
    #[doc(hidden)]
    pub fn backdate_request(
        &self,
        request_id: &str,
        rewrite: impl FnOnce(&mut RequestContext),
    ) -> Result<()> {
        let mut context = RequestContext::load_from_db(&self.db, request_id)?;
        rewrite(&mut context);
        context.save_to_db(&self.db)?;
        Ok(())
    }
}

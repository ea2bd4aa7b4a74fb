//! Request context: the append-only audit chain of one movement request
//!
//! Nothing here stores a status field. The status is derived by folding
//! the event chain, so the audit log is the system of record and can
//! never disagree with the state it reports.

use std::fmt;

use anyhow::Result;
use chrono::Utc;
use sled::Db;

use crate::details::TimeStamp;
use crate::error::ValidationError;

const KEY_PREFIX: &str = "req/";

/// Derived state of a movement request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalStatus {
    Draft,
    /// Waiting on the given approval level.
    Pending(u32),
    Approved,
    Rejected,
    /// Still waiting on the given level after its escalation window lapsed.
    Escalated(u32),
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Draft => write!(f, "Draft"),
            ApprovalStatus::Pending(level) => write!(f, "Pending level {level}"),
            ApprovalStatus::Approved => write!(f, "Approved"),
            ApprovalStatus::Rejected => write!(f, "Rejected"),
            ApprovalStatus::Escalated(level) => write!(f, "Escalated at level {level}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub enum AuditEventKind {
    /// Draft submitted; the details hash pins the exact revision.
    #[n(0)]
    Submitted {
        #[n(0)]
        details_hash: String,
    },
    #[n(1)]
    ApprovalRequested {
        #[n(0)]
        level: u32,
        #[n(1)]
        approvers: Vec<String>,
    },
    #[n(2)]
    Approved {
        #[n(0)]
        level: u32,
        #[n(1)]
        comment: Option<String>,
    },
    #[n(3)]
    Rejected {
        #[n(0)]
        reason: String,
    },
    #[n(4)]
    Escalated {
        #[n(0)]
        level: u32,
        #[n(1)]
        notified: Vec<String>,
    },
    /// Stock effect applied to the ledger.
    #[n(5)]
    Posted,
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditEventKind::Submitted { details_hash } => {
                write!(f, "submitted revision {details_hash}")
            }
            AuditEventKind::ApprovalRequested { level, approvers } => {
                write!(f, "approval requested at level {level} from {approvers:?}")
            }
            AuditEventKind::Approved { level, comment } => match comment {
                Some(comment) => write!(f, "approved at level {level}: {comment}"),
                None => write!(f, "approved at level {level}"),
            },
            AuditEventKind::Rejected { reason } => write!(f, "rejected: {reason}"),
            AuditEventKind::Escalated { level, notified } => {
                write!(f, "escalated at level {level}, notified {notified:?}")
            }
            AuditEventKind::Posted => write!(f, "posted to stock ledger"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct AuditEvent {
    #[n(0)]
    pub actor: String,
    #[n(1)]
    pub at: TimeStamp<Utc>,
    #[n(2)]
    pub kind: AuditEventKind,
}

#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct RequestContext {
    #[n(0)]
    request_id: String,
    #[n(1)]
    events: Vec<AuditEvent>,
}

impl RequestContext {
    pub fn new(request_id: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            events: Vec::new(),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn history(&self) -> &[AuditEvent] {
        &self.events
    }

    pub fn append(&mut self, actor: &str, kind: AuditEventKind) {
        self.append_at(actor, TimeStamp::new(), kind);
    }

    pub fn append_at(&mut self, actor: &str, at: TimeStamp<Utc>, kind: AuditEventKind) {
        self.events.push(AuditEvent {
            actor: actor.to_string(),
            at,
            kind,
        });
    }

    /// Fold over the chain. A rejection ends the fold, later events
    /// cannot resurrect the request.
    pub fn current_status(&self) -> ApprovalStatus {
        let mut status = ApprovalStatus::Draft;
        for event in &self.events {
            match &event.kind {
                AuditEventKind::Submitted { .. } => status = ApprovalStatus::Draft,
                AuditEventKind::ApprovalRequested { level, .. } => {
                    status = ApprovalStatus::Pending(*level)
                }
                AuditEventKind::Approved { .. } => status = ApprovalStatus::Approved,
                AuditEventKind::Rejected { .. } => return ApprovalStatus::Rejected,
                AuditEventKind::Escalated { level, .. } => {
                    status = ApprovalStatus::Escalated(*level)
                }
                AuditEventKind::Posted => (),
            }
        }
        status
    }

    /// Number of approval levels already granted. Monotone over the
    /// lifetime of the chain because events are never removed.
    pub fn current_level(&self) -> u32 {
        self.events
            .iter()
            .filter(|e| matches!(e.kind, AuditEventKind::Approved { .. }))
            .count() as u32
    }

    /// The level the request is waiting on next.
    pub fn pending_level(&self) -> u32 {
        self.current_level() + 1
    }

    /// Approvers the request is currently parked with, if any.
    ///
    /// Escalation widens the set rather than replacing it: the level's
    /// original approvers stay eligible, the escalation-notified users
    /// are appended.
    pub fn pending_approvers(&self) -> Option<Vec<String>> {
        match self.current_status() {
            ApprovalStatus::Pending(_) | ApprovalStatus::Escalated(_) => (),
            _ => return None,
        }

        let last_request = self
            .events
            .iter()
            .rposition(|e| matches!(e.kind, AuditEventKind::ApprovalRequested { .. }));

        let mut approvers: Vec<String> = Vec::new();
        for event in &self.events[last_request.unwrap_or(0)..] {
            match &event.kind {
                AuditEventKind::ApprovalRequested {
                    approvers: requested,
                    ..
                } => approvers = requested.clone(),
                AuditEventKind::Escalated { notified, .. } => {
                    for user in notified {
                        if !approvers.contains(user) {
                            approvers.push(user.clone());
                        }
                    }
                }
                _ => (),
            }
        }
        Some(approvers)
    }

    /// When the pending level was last asked for sign-off. Escalation
    /// timers run from here, not from submission.
    pub fn requested_at(&self) -> Option<TimeStamp<Utc>> {
        self.events.iter().rev().find_map(|e| match &e.kind {
            AuditEventKind::ApprovalRequested { .. } => Some(e.at.clone()),
            _ => None,
        })
    }

    /// The details revision the chain currently refers to.
    pub fn details_hash(&self) -> Option<&str> {
        self.events.iter().rev().find_map(|e| match &e.kind {
            AuditEventKind::Submitted { details_hash } => Some(details_hash.as_str()),
            _ => None,
        })
    }

    pub fn is_posted(&self) -> bool {
        self.events
            .iter()
            .any(|e| matches!(e.kind, AuditEventKind::Posted))
    }

    /// Approval comments and rejection reasons, newest first.
    pub fn comments(&self) -> Vec<(String, String)> {
        self.events
            .iter()
            .rev()
            .filter_map(|e| match &e.kind {
                AuditEventKind::Approved {
                    comment: Some(comment),
                    ..
                } => Some((e.actor.clone(), comment.clone())),
                AuditEventKind::Rejected { reason } => Some((e.actor.clone(), reason.clone())),
                _ => None,
            })
            .collect()
    }

    pub(crate) fn storage_key(&self) -> String {
        format!("{KEY_PREFIX}{}", self.request_id)
    }

    pub fn save_to_db(&self, db: &Db) -> Result<()> {
        let contents = minicbor::to_vec(self)?;
        db.insert(self.storage_key(), contents)?;
        Ok(())
    }

    pub fn load_from_db(db: &Db, request_id: &str) -> Result<Self> {
        let Some(contents) = db.get(format!("{KEY_PREFIX}{request_id}"))? else {
            return Err(ValidationError::RequestNotFound(request_id.to_string()).into());
        };
        let context = minicbor::decode(&contents)?;
        Ok(context)
    }

    /// All request ids currently in the store.
    pub fn all_ids(db: &Db) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        for entry in db.scan_prefix(KEY_PREFIX) {
            let (key, _) = entry?;
            let key = String::from_utf8(key.to_vec())?;
            ids.push(key[KEY_PREFIX.len()..].to_string());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submitted(hash: &str) -> AuditEventKind {
        AuditEventKind::Submitted {
            details_hash: hash.to_string(),
        }
    }

    #[test]
    fn empty_chain_is_draft() {
        let ctx = RequestContext::new("mvr-test");
        assert_eq!(ctx.current_status(), ApprovalStatus::Draft);
        assert_eq!(ctx.current_level(), 0);
        assert_eq!(ctx.pending_level(), 1);
    }

    #[test]
    fn rejection_is_terminal() {
        let mut ctx = RequestContext::new("mvr-test");
        ctx.append("alice", submitted("abc"));
        ctx.append(
            "system",
            AuditEventKind::ApprovalRequested {
                level: 1,
                approvers: vec!["bob".into()],
            },
        );
        ctx.append(
            "bob",
            AuditEventKind::Rejected {
                reason: "wrong bin".into(),
            },
        );
        ctx.append(
            "bob",
            AuditEventKind::Approved {
                level: 1,
                comment: None,
            },
        );

        assert_eq!(ctx.current_status(), ApprovalStatus::Rejected);
    }

    #[test]
    fn mid_chain_approval_yields_to_next_request() {
        let mut ctx = RequestContext::new("mvr-test");
        ctx.append("alice", submitted("abc"));
        ctx.append(
            "system",
            AuditEventKind::ApprovalRequested {
                level: 1,
                approvers: vec!["bob".into()],
            },
        );
        ctx.append(
            "bob",
            AuditEventKind::Approved {
                level: 1,
                comment: None,
            },
        );
        ctx.append(
            "system",
            AuditEventKind::ApprovalRequested {
                level: 2,
                approvers: vec!["carol".into()],
            },
        );

        assert_eq!(ctx.current_status(), ApprovalStatus::Pending(2));
        assert_eq!(ctx.current_level(), 1);
        assert_eq!(ctx.pending_approvers(), Some(vec!["carol".to_string()]));
    }

    #[test]
    fn escalation_does_not_advance_the_level() {
        let mut ctx = RequestContext::new("mvr-test");
        ctx.append("alice", submitted("abc"));
        ctx.append(
            "system",
            AuditEventKind::ApprovalRequested {
                level: 1,
                approvers: vec!["bob".into()],
            },
        );
        ctx.append(
            "system",
            AuditEventKind::Escalated {
                level: 1,
                notified: vec!["carol".into()],
            },
        );

        assert_eq!(ctx.current_status(), ApprovalStatus::Escalated(1));
        assert_eq!(ctx.current_level(), 0);
        assert_eq!(
            ctx.pending_approvers(),
            Some(vec!["bob".to_string(), "carol".to_string()])
        );
    }

    #[test]
    fn context_cbor_roundtrip() {
        let mut ctx = RequestContext::new("mvr-test");
        ctx.append("alice", submitted("abc"));
        ctx.append(
            "bob",
            AuditEventKind::Approved {
                level: 1,
                comment: Some("looks right".into()),
            },
        );

        let encoding = minicbor::to_vec(&ctx).unwrap();
        let decoded: RequestContext = minicbor::decode(&encoding).unwrap();
        assert_eq!(ctx, decoded);
    }
}

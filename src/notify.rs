//! Notification seam
//!
//! Delivery is pluggable. The service never lets a failed notification
//! fail the movement it belongs to, callers log and carry on.

use anyhow::Result;

/// Outbound messages raised along the approval chain.
pub trait Notifier {
    fn approval_requested(&self, request_id: &str, level: u32, recipients: &[String])
        -> Result<()>;

    fn rejected(&self, request_id: &str, requester: &str, reason: &str) -> Result<()>;

    fn escalated(&self, request_id: &str, level: u32, recipients: &[String]) -> Result<()>;

    fn reminder(&self, request_id: &str, level: u32, recipients: &[String]) -> Result<()>;
}

/// Default sink, writes every notification to the log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn approval_requested(
        &self,
        request_id: &str,
        level: u32,
        recipients: &[String],
    ) -> Result<()> {
        tracing::info!(request_id, level, ?recipients, "approval requested");
        Ok(())
    }

    fn rejected(&self, request_id: &str, requester: &str, reason: &str) -> Result<()> {
        tracing::info!(request_id, requester, reason, "request rejected");
        Ok(())
    }

    fn escalated(&self, request_id: &str, level: u32, recipients: &[String]) -> Result<()> {
        tracing::warn!(request_id, level, ?recipients, "approval escalated");
        Ok(())
    }

    fn reminder(&self, request_id: &str, level: u32, recipients: &[String]) -> Result<()> {
        tracing::info!(request_id, level, ?recipients, "approval reminder");
        Ok(())
    }
}

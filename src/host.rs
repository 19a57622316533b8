//! Collaborator interfaces supplied by the hosting commerce platform.
//!
//! The engine never renders text, sends email or builds URLs itself; those
//! concerns arrive through these seams so the core stays testable with
//! in-process fakes.

use crate::codec::TransactionCode;
use crate::store::{PaymentId, PaymentRecord};
use async_trait::async_trait;
use tracing::error;

// ---------------------------------------------------------------------------
// Capacity / quota
// ---------------------------------------------------------------------------

/// Hosting-system check run at confirmation time, inside the payment's row
/// lock. A rejection here triggers the compensating refund path.
#[async_trait]
pub trait CapacityCheck: Send + Sync {
    async fn reserve(&self, payment: &PaymentRecord) -> Result<(), String>;
}

/// Capacity check that always admits. Default for hosts without quotas.
pub struct UnlimitedCapacity;

#[async_trait]
impl CapacityCheck for UnlimitedCapacity {
    async fn reserve(&self, _payment: &PaymentRecord) -> Result<(), String> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Manual intervention
// ---------------------------------------------------------------------------

/// Call sites that can require an operator, recorded for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallSite {
    RefundPreauth,
    CancelCaptured,
}

impl std::fmt::Display for CallSite {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CallSite::RefundPreauth => write!(f, "refund_preauth"),
            CallSite::CancelCaptured => write!(f, "cancel_captured"),
        }
    }
}

/// Everything an operator needs to locate the money.
#[derive(Debug, Clone)]
pub struct InterventionNote {
    pub payment: PaymentId,
    pub transaction_code: TransactionCode,
    pub call_site: CallSite,
    pub reason: String,
}

/// Operator-facing notification channel (email-shaped in the hosting
/// platform). Fired when compensating actions fail or cannot be verified;
/// an unresolved refund must never fail silently.
#[async_trait]
pub trait InterventionNotifier: Send + Sync {
    async fn notify(&self, note: InterventionNote);
}

/// Fallback notifier that writes the note to the error log.
pub struct LoggingNotifier;

#[async_trait]
impl InterventionNotifier for LoggingNotifier {
    async fn notify(&self, note: InterventionNote) {
        error!(
            payment = %note.payment,
            transaction_code = %note.transaction_code,
            call_site = %note.call_site,
            reason = %note.reason,
            "manual intervention required"
        );
    }
}

// ---------------------------------------------------------------------------
// URLs and localization
// ---------------------------------------------------------------------------

/// Absolute callback URLs for the hosted payment page. The tamper-evident
/// order hash embedded in these URLs is the host's concern.
pub trait CallbackUrlBuilder: Send + Sync {
    fn success_url(&self, payment: &PaymentRecord) -> String;
    fn failure_url(&self, payment: &PaymentRecord) -> String;
}

/// Display formatting injected by the host; the core never localizes.
pub trait Localizer: Send + Sync {
    /// Language code understood by the payment page (e.g. "ITA", "ENG").
    fn language_code(&self) -> &str;
    /// Human-readable order description shown on the payment page.
    fn order_description(&self, payment: &PaymentRecord) -> String;
}

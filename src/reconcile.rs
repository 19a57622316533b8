//! The payment reconciliation state machine.
//!
//! Local payment state is reconciled against the provider's authoritative
//! order status. The same transition table runs no matter who triggers it
//! (the synchronous browser-return handler, the periodic sweep or an
//! operator), so any payment whose synchronous flow was interrupted is
//! re-derivable from a status query alone. That re-derivability is the
//! crate's core correctness argument: a capture whose outcome is ambiguous
//! (timeout, unverifiable response) is never blindly retried; the local
//! claim is reverted and the next status query decides.

use crate::codec::{transaction_code, TransactionCode};
use crate::config::XPayConfig;
use crate::error::GatewayError;
use crate::gateway::client::XPayGateway;
use crate::gateway::return_request::{ReturnOutcome, ReturnParams};
use crate::gateway::status::RemoteStatusClass;
use crate::gateway::types::RedirectParams;
use crate::host::{CallSite, InterventionNote, InterventionNotifier};
use crate::store::{
    ConfirmOutcome, PaymentId, PaymentRecord, PaymentState, PaymentStore, StoreError,
    TransitionOutcome,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// What a reconciliation pass did to the payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// Payment confirmed (and captured where the provider required it).
    Confirmed,
    /// The payment had already reached a terminal state. Benign under
    /// concurrent invocation; never shown to the user and never re-triggers
    /// side effects.
    AlreadyFinal,
    /// Advanced from `Created` to `Pending` on a pending remote status.
    MarkedPending,
    /// Marked failed (remote refunded/voided/denied, or failure redirect).
    Failed,
    /// Nothing to change yet; a later pass will revisit. Covers unknown
    /// remote statuses, unparsable responses and not-yet-registered orders.
    Deferred,
}

/// Result of an operator-initiated cancellation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// Canceled; any remote preauthorization was reversed.
    Canceled,
    /// Canceled locally, but the provider had already captured the funds;
    /// an operator must claw them back by hand.
    CanceledWithIntervention,
    /// The payment was already canceled.
    AlreadyCanceled,
}

/// Disposition handed back to the return handler so the host can redirect
/// the browser (with its paid-indicator where applicable).
#[derive(Debug, Clone, Copy)]
pub struct ReturnDisposition {
    pub outcome: ReconcileOutcome,
    pub state: PaymentState,
}

impl ReturnDisposition {
    pub fn paid(&self) -> bool {
        self.state == PaymentState::Confirmed
    }
}

/// Counters for one sweep cycle.
#[derive(Debug, Clone, Copy, Default)]
pub struct SweepReport {
    pub examined: usize,
    pub confirmed: usize,
    pub marked_pending: usize,
    pub failed: usize,
    pub deferred: usize,
    pub already_final: usize,
    pub errors: usize,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] StoreError),

    /// The provider reported a status outside the known vocabulary during a
    /// cancellation. Cancelling on top of an unknown remote state could
    /// strand money, so this is a hard error surfaced to the operator.
    #[error("unrecognized remote status {status:?} for transaction {transaction_code}")]
    UnrecognizedRemoteStatus {
        transaction_code: String,
        status: String,
    },
}

impl ReconcileError {
    pub fn is_retryable(&self) -> bool {
        match self {
            ReconcileError::Gateway(e) => e.is_retryable(),
            ReconcileError::Store(StoreError::Backend { retryable, .. }) => *retryable,
            ReconcileError::Store(_) => false,
            ReconcileError::UnrecognizedRemoteStatus { .. } => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            ReconcileError::Gateway(e) => e.user_message(),
            ReconcileError::Store(StoreError::CapacityExceeded { message, .. }) => message.clone(),
            ReconcileError::Store(_) => "The payment could not be processed.".to_string(),
            ReconcileError::UnrecognizedRemoteStatus { .. } => {
                "The payment is in an unexpected state at the provider.".to_string()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Reconciler
// ---------------------------------------------------------------------------

pub struct Reconciler {
    gateway: Arc<dyn XPayGateway>,
    store: Arc<dyn PaymentStore>,
    notifier: Arc<dyn InterventionNotifier>,
    config: XPayConfig,
}

impl Reconciler {
    pub fn new(
        gateway: Arc<dyn XPayGateway>,
        store: Arc<dyn PaymentStore>,
        notifier: Arc<dyn InterventionNotifier>,
        config: XPayConfig,
    ) -> Self {
        Self {
            gateway,
            store,
            notifier,
            config,
        }
    }

    fn code_for_attempt(&self, id: &PaymentId, attempt: u32) -> TransactionCode {
        transaction_code(
            id,
            &self.config.namespace,
            &self.config.code_secret,
            attempt,
        )
    }

    /// The attempt currently on the wire, if a redirect was ever issued.
    fn active_code(&self, payment: &PaymentRecord) -> Option<TransactionCode> {
        payment
            .attempts
            .checked_sub(1)
            .map(|attempt| self.code_for_attempt(&payment.id, attempt))
    }

    // -----------------------------------------------------------------------
    // Redirect issuance
    // -----------------------------------------------------------------------

    /// Mint a fresh attempt and build the hosted-payment-page parameters.
    /// This is the only place the attempt counter advances; status polls and
    /// reconciliation always reuse the code of the active attempt.
    pub async fn begin_redirect(&self, id: &PaymentId) -> Result<RedirectParams, ReconcileError> {
        let payment = self.store.load(id).await?;
        let attempt = self.store.next_attempt(id).await?;
        let code = self.code_for_attempt(id, attempt);

        info!(
            payment = %id,
            attempt = attempt,
            transaction_code = %code,
            "issuing payment-page redirect"
        );
        Ok(self.gateway.create_redirect_params(&payment, &code)?)
    }

    // -----------------------------------------------------------------------
    // Reconciliation
    // -----------------------------------------------------------------------

    /// Reconcile one payment against the provider's order status. Invoked
    /// identically from the return handler, the sweep and operator tooling.
    pub async fn reconcile(&self, id: &PaymentId) -> Result<ReconcileOutcome, ReconcileError> {
        let payment = self.store.load(id).await?;
        if payment.state.is_terminal() {
            return Ok(ReconcileOutcome::AlreadyFinal);
        }

        let Some(code) = self.active_code(&payment) else {
            debug!(payment = %id, "no redirect issued yet; nothing to reconcile");
            return Ok(ReconcileOutcome::Deferred);
        };

        let status = match self.gateway.get_order_status(&payment, &code).await {
            Ok(status) => status,
            Err(GatewayError::NotFound { .. }) => {
                // The customer may not have reached the payment page yet.
                debug!(payment = %id, transaction_code = %code, "order not registered yet");
                return Ok(ReconcileOutcome::Deferred);
            }
            Err(GatewayError::Parse { message }) => {
                // Unknown shape is not failure; do nothing yet.
                warn!(payment = %id, transaction_code = %code, error = %message,
                    "unparsable order status; leaving payment unchanged");
                return Ok(ReconcileOutcome::Deferred);
            }
            Err(e) => return Err(e.into()),
        };

        let class = status.class();
        debug!(payment = %id, transaction_code = %code, status = %status.status, ?class,
            "order status received");
        self.apply(&payment, &code, class, &status.status).await
    }

    /// The transition table.
    async fn apply(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
        class: RemoteStatusClass,
        raw_status: &str,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match class {
            RemoteStatusClass::Authorized => self.confirm_flow(payment, code, true).await,
            RemoteStatusClass::Captured => self.confirm_flow(payment, code, false).await,
            RemoteStatusClass::Pending => {
                let outcome = self
                    .store
                    .transition(&payment.id, &[PaymentState::Created], PaymentState::Pending)
                    .await?;
                Ok(match outcome {
                    TransitionOutcome::Applied => {
                        info!(payment = %payment.id, "payment marked pending");
                        ReconcileOutcome::MarkedPending
                    }
                    TransitionOutcome::AlreadyFinal => ReconcileOutcome::AlreadyFinal,
                    TransitionOutcome::Unchanged => ReconcileOutcome::Deferred,
                })
            }
            RemoteStatusClass::Refunded => {
                let outcome = self
                    .store
                    .transition(
                        &payment.id,
                        &[PaymentState::Created, PaymentState::Pending],
                        PaymentState::Failed,
                    )
                    .await?;
                Ok(match outcome {
                    TransitionOutcome::Applied => {
                        info!(payment = %payment.id, transaction_code = %code,
                            "payment failed: order refunded or voided at provider");
                        ReconcileOutcome::Failed
                    }
                    TransitionOutcome::AlreadyFinal => ReconcileOutcome::AlreadyFinal,
                    TransitionOutcome::Unchanged => ReconcileOutcome::Deferred,
                })
            }
            RemoteStatusClass::Unrecognized => {
                // Fail-safe: unknown is not failure.
                warn!(payment = %payment.id, transaction_code = %code, status = %raw_status,
                    "unrecognized order status; leaving payment unchanged");
                Ok(ReconcileOutcome::Deferred)
            }
        }
    }

    /// Confirm locally, then capture where the provider still holds a
    /// preauthorization.
    ///
    /// Winning the row-locked Created/Pending → Confirmed transition is the
    /// idempotency claim: losers observe `AlreadyConfirmed` and issue zero
    /// gateway calls, so at most one capture is ever sent per payment. If
    /// the capture outcome is ambiguous the claim is reverted to `Pending`
    /// and the sweep re-derives the truth from the next status query.
    async fn confirm_flow(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
        needs_capture: bool,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        match self.store.confirm(&payment.id).await {
            Ok(ConfirmOutcome::Confirmed) => {}
            Ok(ConfirmOutcome::AlreadyConfirmed) | Ok(ConfirmOutcome::AlreadyFinal) => {
                return Ok(ReconcileOutcome::AlreadyFinal);
            }
            Err(StoreError::CapacityExceeded { payment: id, message }) => {
                return self
                    .compensate_capacity_failure(payment, code, id, message)
                    .await;
            }
            Err(e) => return Err(e.into()),
        }

        if !needs_capture {
            // Money already captured at the provider; nothing left to send.
            info!(payment = %payment.id, transaction_code = %code,
                "payment confirmed from recorded order status");
            return Ok(ReconcileOutcome::Confirmed);
        }

        match self.gateway.confirm_preauth(payment, code).await {
            Ok(_) => {
                info!(payment = %payment.id, transaction_code = %code, "payment confirmed");
                Ok(ReconcileOutcome::Confirmed)
            }
            Err(capture_err) => {
                // The capture may or may not have landed. Revert the local
                // claim so the payment stays retryable; the sweep's status
                // query is the authoritative recovery path.
                error!(payment = %payment.id, transaction_code = %code, error = %capture_err,
                    "capture did not complete; reverting local confirmation");
                if let Err(revert_err) = self
                    .store
                    .transition(&payment.id, &[PaymentState::Confirmed], PaymentState::Pending)
                    .await
                {
                    error!(payment = %payment.id, error = %revert_err,
                        "failed to revert confirmation after capture failure");
                }
                Err(capture_err.into())
            }
        }
    }

    /// The compensating-transaction path: the order cannot be fulfilled, so
    /// the customer's money must not stay preauthorized. Exactly one refund
    /// is issued, the payment is failed, and the capacity error propagates
    /// to the caller.
    async fn compensate_capacity_failure(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
        id: PaymentId,
        message: String,
    ) -> Result<ReconcileOutcome, ReconcileError> {
        warn!(payment = %payment.id, transaction_code = %code, reason = %message,
            "capacity exhausted at confirmation; reversing preauthorization");

        if let Err(refund_err) = self.gateway.refund_preauth(payment, code).await {
            // The client has already notified the operator; the payment is
            // still failed locally so it cannot be confirmed later.
            error!(payment = %payment.id, transaction_code = %code, error = %refund_err,
                "compensating refund failed");
        }

        self.store
            .transition(
                &payment.id,
                &[PaymentState::Created, PaymentState::Pending],
                PaymentState::Failed,
            )
            .await?;

        Err(ReconcileError::Store(StoreError::CapacityExceeded {
            payment: id,
            message,
        }))
    }

    // -----------------------------------------------------------------------
    // Browser return
    // -----------------------------------------------------------------------

    /// Handle an inbound browser redirect. The redirect is authenticated and
    /// cross-checked against the active attempt before it may influence
    /// state; the actual decision is still driven by the authoritative
    /// status query, never by the redirect alone.
    pub async fn handle_return(
        &self,
        id: &PaymentId,
        params: &ReturnParams,
    ) -> Result<ReturnDisposition, ReconcileError> {
        let payment = self.store.load(id).await?;
        let outcome = params.verify(&self.config)?;

        let Some(code) = self.active_code(&payment) else {
            return Err(GatewayError::Integrity {
                transaction_code: params.cod_trans.clone(),
                context: "return for a payment with no issued redirect".to_string(),
            }
            .into());
        };
        if params.cod_trans != code.as_str() {
            return Err(GatewayError::Integrity {
                transaction_code: params.cod_trans.clone(),
                context: "return transaction code does not match active attempt".to_string(),
            }
            .into());
        }
        if params.importo != payment.amount_minor.to_string() {
            return Err(GatewayError::Integrity {
                transaction_code: params.cod_trans.clone(),
                context: "return amount does not match payment".to_string(),
            }
            .into());
        }

        let outcome = match outcome {
            ReturnOutcome::Failed => {
                // Authenticated failure outcome: fail locally, no gateway
                // call needed. Terminal rows are left untouched.
                let transition = self
                    .store
                    .transition(
                        id,
                        &[PaymentState::Created, PaymentState::Pending],
                        PaymentState::Failed,
                    )
                    .await?;
                match transition {
                    TransitionOutcome::Applied => {
                        info!(payment = %id, "payment failed on return redirect");
                        ReconcileOutcome::Failed
                    }
                    TransitionOutcome::AlreadyFinal => ReconcileOutcome::AlreadyFinal,
                    TransitionOutcome::Unchanged => ReconcileOutcome::Deferred,
                }
            }
            ReturnOutcome::Success | ReturnOutcome::Pending => self.reconcile(id).await?,
        };

        let state = self.store.load(id).await?.state;
        Ok(ReturnDisposition { outcome, state })
    }

    // -----------------------------------------------------------------------
    // Operator cancellation
    // -----------------------------------------------------------------------

    /// Operator-initiated cancellation. Queries remote status first; local
    /// cancellation cannot claw back captured funds, so that case cancels
    /// locally and alerts a human.
    pub async fn cancel(&self, id: &PaymentId) -> Result<CancelOutcome, ReconcileError> {
        let payment = self.store.load(id).await?;
        if payment.state == PaymentState::Canceled {
            return Ok(CancelOutcome::AlreadyCanceled);
        }

        let cancelable = [
            PaymentState::Created,
            PaymentState::Pending,
            PaymentState::Confirmed,
        ];

        let Some(code) = self.active_code(&payment) else {
            // No redirect was ever minted, so nothing can be held remotely.
            self.store
                .transition(id, &cancelable, PaymentState::Canceled)
                .await?;
            info!(payment = %id, "payment canceled before any redirect");
            return Ok(CancelOutcome::Canceled);
        };

        let remote = match self.gateway.get_order_status(&payment, &code).await {
            Ok(status) => Some((status.class(), status.status)),
            // No record at the provider: cancel is a no-op remotely.
            Err(GatewayError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        match remote {
            None | Some((RemoteStatusClass::Refunded, _)) => {
                self.store
                    .transition(id, &cancelable, PaymentState::Canceled)
                    .await?;
                info!(payment = %id, transaction_code = %code, "payment canceled");
                Ok(CancelOutcome::Canceled)
            }
            Some((RemoteStatusClass::Authorized, _)) | Some((RemoteStatusClass::Pending, _)) => {
                self.gateway.refund_preauth(&payment, &code).await?;
                self.store
                    .transition(id, &cancelable, PaymentState::Canceled)
                    .await?;
                info!(payment = %id, transaction_code = %code,
                    "payment canceled; preauthorization reversed");
                Ok(CancelOutcome::Canceled)
            }
            Some((RemoteStatusClass::Captured, _)) => {
                self.store
                    .transition(id, &cancelable, PaymentState::Canceled)
                    .await?;
                warn!(payment = %id, transaction_code = %code,
                    "payment canceled locally but funds are captured at the provider");
                self.notifier
                    .notify(InterventionNote {
                        payment: id.clone(),
                        transaction_code: code.clone(),
                        call_site: CallSite::CancelCaptured,
                        reason: "funds captured at provider; local cancellation cannot reverse them"
                            .to_string(),
                    })
                    .await;
                Ok(CancelOutcome::CanceledWithIntervention)
            }
            Some((RemoteStatusClass::Unrecognized, status)) => {
                Err(ReconcileError::UnrecognizedRemoteStatus {
                    transaction_code: code.as_str().to_string(),
                    status,
                })
            }
        }
    }

    // -----------------------------------------------------------------------
    // Periodic sweep
    // -----------------------------------------------------------------------

    /// One reconciliation pass over every outstanding payment. Designed to
    /// be re-invoked by an external scheduler; a failure on one payment
    /// never aborts the cycle.
    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let outstanding = match self
            .store
            .outstanding(self.config.reconcile_window, self.config.sweep_batch)
            .await
        {
            Ok(payments) => payments,
            Err(e) => {
                warn!(error = %e, "could not list outstanding payments");
                report.errors += 1;
                return report;
            }
        };

        for payment in outstanding {
            report.examined += 1;
            match self.reconcile(&payment.id).await {
                Ok(ReconcileOutcome::Confirmed) => report.confirmed += 1,
                Ok(ReconcileOutcome::MarkedPending) => report.marked_pending += 1,
                Ok(ReconcileOutcome::Failed) => report.failed += 1,
                Ok(ReconcileOutcome::Deferred) => report.deferred += 1,
                Ok(ReconcileOutcome::AlreadyFinal) => report.already_final += 1,
                Err(e) => {
                    warn!(payment = %payment.id, error = %e, "sweep reconciliation failed");
                    report.errors += 1;
                }
            }
        }

        info!(
            examined = report.examined,
            confirmed = report.confirmed,
            marked_pending = report.marked_pending,
            failed = report.failed,
            deferred = report.deferred,
            already_final = report.already_final,
            errors = report.errors,
            "reconciliation sweep finished"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disposition_paid_tracks_confirmed_state() {
        let paid = ReturnDisposition {
            outcome: ReconcileOutcome::Confirmed,
            state: PaymentState::Confirmed,
        };
        let unpaid = ReturnDisposition {
            outcome: ReconcileOutcome::Failed,
            state: PaymentState::Failed,
        };
        assert!(paid.paid());
        assert!(!unpaid.paid());
    }

    #[test]
    fn capacity_error_message_reaches_the_user() {
        let err = ReconcileError::Store(StoreError::CapacityExceeded {
            payment: PaymentId::new("A1B2C-P-1"),
            message: "event is sold out".to_string(),
        });
        assert_eq!(err.user_message(), "event is sold out");
        assert!(!err.is_retryable());
    }

    #[test]
    fn transport_errors_stay_retryable_through_the_wrapper() {
        let err = ReconcileError::Gateway(GatewayError::Transport {
            message: "timeout".to_string(),
        });
        assert!(err.is_retryable());
    }
}

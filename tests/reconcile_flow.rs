//! Reconciliation scenarios: the synchronous return path, the periodic
//! sweep, races between the two, and the compensating-refund path.

mod common;

use common::{harness, harness_with_store, test_config, transport_error};
use std::sync::Arc;
use xpay_recon::codec::transaction_code;
use xpay_recon::config::XPayConfig;
use xpay_recon::error::GatewayError;
use xpay_recon::gateway::return_request::ReturnParams;
use xpay_recon::host::CapacityCheck;
use xpay_recon::mac;
use xpay_recon::reconcile::{ReconcileError, ReconcileOutcome};
use xpay_recon::store::{
    MemoryStore, PaymentId, PaymentRecord, PaymentState, PaymentStore, StoreError,
};

fn payment_id() -> PaymentId {
    PaymentId::new("A1B2C-P-1")
}

fn signed_return(config: &XPayConfig, cod_trans: &str, esito: &str, importo: &str) -> ReturnParams {
    let mut params = ReturnParams {
        cod_trans: cod_trans.to_string(),
        esito: esito.to_string(),
        importo: importo.to_string(),
        data: "20260301".to_string(),
        orario: "093000".to_string(),
        cod_aut: "A1B2C3".to_string(),
        mac: String::new(),
    };
    params.mac = mac::sign(
        &[
            ("codTrans", &params.cod_trans),
            ("esito", &params.esito),
            ("importo", &params.importo),
            ("data", &params.data),
            ("orario", &params.orario),
            ("codAut", &params.cod_aut),
        ],
        &config.mac_secret,
        config.algorithm,
    );
    params
}

#[tokio::test]
async fn end_to_end_success_flow() {
    let h = harness();
    let config = test_config();
    h.store.insert(payment_id(), 1000).await;

    // First redirect uses attempt 0 and carries the signed digest.
    let params = h.reconciler.begin_redirect(&payment_id()).await.unwrap();
    let expected_code = transaction_code(&payment_id(), "shop/main", "codesecret", 0);
    assert_eq!(params.field("codTrans"), Some(expected_code.as_str()));
    assert_eq!(params.field("importo"), Some("1000"));
    let expected_mac = mac::sign(
        &[
            ("codTrans", expected_code.as_str()),
            ("divisa", "EUR"),
            ("importo", "1000"),
        ],
        &config.mac_secret,
        config.algorithm,
    );
    assert_eq!(params.field("mac"), Some(expected_mac.as_str()));

    // Browser comes back with a success outcome; the authoritative status
    // query reports an outstanding preauthorization.
    h.gateway.script_status(Ok("Autorizzato"));
    h.gateway.script_capture(Ok(()));

    let disposition = h
        .reconciler
        .handle_return(
            &payment_id(),
            &signed_return(&config, expected_code.as_str(), "OK", "1000"),
        )
        .await
        .unwrap();

    assert!(disposition.paid());
    assert_eq!(disposition.outcome, ReconcileOutcome::Confirmed);
    assert_eq!(h.gateway.status_count(), 1);
    assert_eq!(h.gateway.capture_count(), 1);
    assert_eq!(h.gateway.refund_count(), 0);
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Confirmed
    );
}

#[tokio::test]
async fn timed_out_capture_is_recovered_by_sweep_without_second_capture() {
    let h = harness();
    h.store.insert(payment_id(), 1000).await;
    h.reconciler.begin_redirect(&payment_id()).await.unwrap();

    // Capture times out; the outcome is ambiguous.
    h.gateway.script_status(Ok("Autorizzato"));
    h.gateway.script_capture(Err(transport_error()));

    let err = h
        .reconciler
        .reconcile(&payment_id())
        .await
        .expect_err("capture timeout should surface");
    assert!(err.is_retryable());
    // The local claim was reverted: the payment is retryable, not terminal.
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Pending
    );

    // The capture actually landed remotely. The sweep sees the recorded
    // order and confirms locally without issuing a second capture.
    h.gateway.script_status(Ok("Contabilizzato"));
    let report = h.reconciler.sweep_once().await;

    assert_eq!(report.examined, 1);
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.errors, 0);
    assert_eq!(h.gateway.capture_count(), 1);
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Confirmed
    );
}

#[tokio::test]
async fn second_reconcile_after_confirmation_issues_zero_calls() {
    let h = harness();
    h.store.insert(payment_id(), 1000).await;
    h.reconciler.begin_redirect(&payment_id()).await.unwrap();

    h.gateway.script_status(Ok("Autorizzato"));
    assert_eq!(
        h.reconciler.reconcile(&payment_id()).await.unwrap(),
        ReconcileOutcome::Confirmed
    );
    assert_eq!(h.gateway.capture_count(), 1);

    // Re-entry observes the terminal state and stops before any gateway call.
    assert_eq!(
        h.reconciler.reconcile(&payment_id()).await.unwrap(),
        ReconcileOutcome::AlreadyFinal
    );
    assert_eq!(h.gateway.status_count(), 1);
    assert_eq!(h.gateway.capture_count(), 1);
}

#[tokio::test]
async fn concurrent_reconciles_issue_at_most_one_capture() {
    let h = harness();
    h.store.insert(payment_id(), 1000).await;
    h.reconciler.begin_redirect(&payment_id()).await.unwrap();

    // Both invocations may get as far as the status query; only the winner
    // of the locked confirmation may capture.
    h.gateway.script_status(Ok("Autorizzato"));
    h.gateway.script_status(Ok("Autorizzato"));

    let first = {
        let reconciler = h.reconciler.clone();
        tokio::spawn(async move { reconciler.reconcile(&payment_id()).await })
    };
    let second = {
        let reconciler = h.reconciler.clone();
        tokio::spawn(async move { reconciler.reconcile(&payment_id()).await })
    };

    let outcomes = [
        first.await.unwrap().unwrap(),
        second.await.unwrap().unwrap(),
    ];

    assert!(outcomes.contains(&ReconcileOutcome::Confirmed));
    assert_eq!(h.gateway.capture_count(), 1);
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Confirmed
    );
}

struct SoldOut;

#[async_trait::async_trait]
impl CapacityCheck for SoldOut {
    async fn reserve(&self, _payment: &PaymentRecord) -> Result<(), String> {
        Err("event is sold out".to_string())
    }
}

#[tokio::test]
async fn capacity_exceeded_refunds_once_and_fails_the_payment() {
    let store = Arc::new(MemoryStore::with_capacity_check(Arc::new(SoldOut)));
    let h = harness_with_store(store);
    h.store.insert(payment_id(), 1000).await;
    h.reconciler.begin_redirect(&payment_id()).await.unwrap();

    h.gateway.script_status(Ok("Autorizzato"));
    let err = h
        .reconciler
        .reconcile(&payment_id())
        .await
        .expect_err("capacity error should propagate");

    assert!(matches!(
        err,
        ReconcileError::Store(StoreError::CapacityExceeded { .. })
    ));
    assert_eq!(err.user_message(), "event is sold out");
    assert_eq!(h.gateway.refund_count(), 1);
    assert_eq!(h.gateway.capture_count(), 0);
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Failed
    );
}

#[tokio::test]
async fn pending_remote_status_advances_created_to_pending() {
    let h = harness();
    h.store.insert(payment_id(), 1000).await;
    h.reconciler.begin_redirect(&payment_id()).await.unwrap();

    h.gateway.script_status(Ok("In corso"));
    assert_eq!(
        h.reconciler.reconcile(&payment_id()).await.unwrap(),
        ReconcileOutcome::MarkedPending
    );
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Pending
    );

    // Already pending: nothing to change.
    h.gateway.script_status(Ok("In corso"));
    assert_eq!(
        h.reconciler.reconcile(&payment_id()).await.unwrap(),
        ReconcileOutcome::Deferred
    );
}

#[tokio::test]
async fn refunded_remote_status_fails_the_payment() {
    let h = harness();
    h.store.insert(payment_id(), 1000).await;
    h.reconciler.begin_redirect(&payment_id()).await.unwrap();

    h.gateway.script_status(Ok("Annullato"));
    assert_eq!(
        h.reconciler.reconcile(&payment_id()).await.unwrap(),
        ReconcileOutcome::Failed
    );
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Failed
    );
    assert_eq!(h.gateway.capture_count(), 0);
    assert_eq!(h.gateway.refund_count(), 0);
}

#[tokio::test]
async fn unrecognized_remote_status_leaves_payment_unchanged() {
    let h = harness();
    h.store.insert(payment_id(), 1000).await;
    h.reconciler.begin_redirect(&payment_id()).await.unwrap();

    h.gateway.script_status(Ok("Qualcosa di strano"));
    assert_eq!(
        h.reconciler.reconcile(&payment_id()).await.unwrap(),
        ReconcileOutcome::Deferred
    );
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Created
    );
}

#[tokio::test]
async fn order_not_registered_yet_defers() {
    let h = harness();
    h.store.insert(payment_id(), 1000).await;
    h.reconciler.begin_redirect(&payment_id()).await.unwrap();

    // Empty script means the mock reports NotFound.
    assert_eq!(
        h.reconciler.reconcile(&payment_id()).await.unwrap(),
        ReconcileOutcome::Deferred
    );
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Created
    );
}

#[tokio::test]
async fn unparsable_status_defers_instead_of_failing() {
    let h = harness();
    h.store.insert(payment_id(), 1000).await;
    h.reconciler.begin_redirect(&payment_id()).await.unwrap();

    h.gateway
        .script_status(Err(GatewayError::parse("report list missing")));
    assert_eq!(
        h.reconciler.reconcile(&payment_id()).await.unwrap(),
        ReconcileOutcome::Deferred
    );
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Created
    );
}

#[tokio::test]
async fn reconcile_before_any_redirect_is_deferred() {
    let h = harness();
    h.store.insert(payment_id(), 1000).await;

    assert_eq!(
        h.reconciler.reconcile(&payment_id()).await.unwrap(),
        ReconcileOutcome::Deferred
    );
    assert_eq!(h.gateway.status_count(), 0);
}

#[tokio::test]
async fn failure_redirect_fails_payment_without_status_query() {
    let h = harness();
    let config = test_config();
    h.store.insert(payment_id(), 1000).await;
    let params = h.reconciler.begin_redirect(&payment_id()).await.unwrap();
    let code = params.field("codTrans").unwrap().to_string();

    let disposition = h
        .reconciler
        .handle_return(&payment_id(), &signed_return(&config, &code, "KO", "1000"))
        .await
        .unwrap();

    assert_eq!(disposition.outcome, ReconcileOutcome::Failed);
    assert!(!disposition.paid());
    assert_eq!(h.gateway.status_count(), 0);
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Failed
    );
}

#[tokio::test]
async fn tampered_return_never_influences_state() {
    let h = harness();
    let config = test_config();
    h.store.insert(payment_id(), 1000).await;
    let params = h.reconciler.begin_redirect(&payment_id()).await.unwrap();
    let code = params.field("codTrans").unwrap().to_string();

    let mut forged = signed_return(&config, &code, "OK", "1000");
    forged.esito = "KO".to_string(); // signature no longer matches

    let err = h
        .reconciler
        .handle_return(&payment_id(), &forged)
        .await
        .expect_err("forged redirect must be rejected");
    assert!(matches!(
        err,
        ReconcileError::Gateway(GatewayError::Integrity { .. })
    ));
    assert_eq!(h.gateway.status_count(), 0);
    assert_eq!(
        h.store.load(&payment_id()).await.unwrap().state,
        PaymentState::Created
    );
}

#[tokio::test]
async fn return_with_wrong_transaction_code_is_rejected() {
    let h = harness();
    let config = test_config();
    h.store.insert(payment_id(), 1000).await;
    h.reconciler.begin_redirect(&payment_id()).await.unwrap();

    // Validly signed, but for a different transaction code.
    let params = signed_return(&config, "ffffffffffffffffff", "OK", "1000");
    let err = h
        .reconciler
        .handle_return(&payment_id(), &params)
        .await
        .expect_err("mismatched code must be rejected");
    assert!(matches!(
        err,
        ReconcileError::Gateway(GatewayError::Integrity { .. })
    ));
}

#[tokio::test]
async fn return_with_wrong_amount_is_rejected() {
    let h = harness();
    let config = test_config();
    h.store.insert(payment_id(), 1000).await;
    let params = h.reconciler.begin_redirect(&payment_id()).await.unwrap();
    let code = params.field("codTrans").unwrap().to_string();

    let err = h
        .reconciler
        .handle_return(&payment_id(), &signed_return(&config, &code, "OK", "5000"))
        .await
        .expect_err("amount mismatch must be rejected");
    assert!(matches!(
        err,
        ReconcileError::Gateway(GatewayError::Integrity { .. })
    ));
}

#[tokio::test]
async fn retry_mints_a_new_transaction_code() {
    let h = harness();
    h.store.insert(payment_id(), 1000).await;

    let first = h.reconciler.begin_redirect(&payment_id()).await.unwrap();
    let second = h.reconciler.begin_redirect(&payment_id()).await.unwrap();
    assert_ne!(first.field("codTrans"), second.field("codTrans"));
    assert_eq!(
        second.field("codTrans"),
        Some(transaction_code(&payment_id(), "shop/main", "codesecret", 1).as_str())
    );
}

#[tokio::test]
async fn sweep_skips_terminal_payments() {
    let h = harness();
    h.store.insert(PaymentId::new("p-live"), 1000).await;
    h.store.insert(PaymentId::new("p-done"), 2000).await;
    h.reconciler
        .begin_redirect(&PaymentId::new("p-live"))
        .await
        .unwrap();
    h.store.confirm(&PaymentId::new("p-done")).await.unwrap();

    h.gateway.script_status(Ok("In corso"));
    let report = h.reconciler.sweep_once().await;

    assert_eq!(report.examined, 1);
    assert_eq!(report.marked_pending, 1);
    assert_eq!(h.gateway.status_count(), 1);
}

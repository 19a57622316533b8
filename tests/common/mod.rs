//! Shared fixtures: a scripted mock gateway with call counters, a recording
//! notifier and a pre-wired reconciler over the in-memory store.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use xpay_recon::codec::TransactionCode;
use xpay_recon::config::XPayConfig;
use xpay_recon::error::{GatewayError, GatewayResult};
use xpay_recon::gateway::client::{OperationReceipt, XPayGateway};
use xpay_recon::gateway::status::OrderStatus;
use xpay_recon::gateway::types::RedirectParams;
use xpay_recon::host::{CallSite, InterventionNote, InterventionNotifier};
use xpay_recon::mac::{self, MacAlgorithm};
use xpay_recon::reconcile::Reconciler;
use xpay_recon::store::{MemoryStore, PaymentRecord};

pub fn test_config() -> XPayConfig {
    XPayConfig {
        alias: "ALIAS_TEST".to_string(),
        api_key: "api-key".to_string(),
        mac_secret: "macsecret".to_string(),
        code_secret: "codesecret".to_string(),
        namespace: "shop/main".to_string(),
        algorithm: MacAlgorithm::Sha1,
        ..XPayConfig::default()
    }
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    notes: Mutex<Vec<InterventionNote>>,
}

impl RecordingNotifier {
    pub fn count(&self) -> usize {
        self.notes.lock().unwrap().len()
    }

    pub fn call_sites(&self) -> Vec<CallSite> {
        self.notes.lock().unwrap().iter().map(|n| n.call_site).collect()
    }
}

#[async_trait]
impl InterventionNotifier for RecordingNotifier {
    async fn notify(&self, note: InterventionNote) {
        self.notes.lock().unwrap().push(note);
    }
}

// ---------------------------------------------------------------------------
// Scripted gateway
// ---------------------------------------------------------------------------

/// Gateway double with scripted responses and per-operation call counters.
/// Mirrors the production client's refund contract: a refund failure also
/// fires the intervention notifier before the error is returned.
pub struct MockGateway {
    config: XPayConfig,
    notifier: Arc<RecordingNotifier>,
    statuses: Mutex<VecDeque<GatewayResult<String>>>,
    captures: Mutex<VecDeque<GatewayResult<()>>>,
    refunds: Mutex<VecDeque<GatewayResult<()>>>,
    pub status_calls: AtomicUsize,
    pub capture_calls: AtomicUsize,
    pub refund_calls: AtomicUsize,
}

impl MockGateway {
    pub fn new(config: XPayConfig, notifier: Arc<RecordingNotifier>) -> Self {
        Self {
            config,
            notifier,
            statuses: Mutex::new(VecDeque::new()),
            captures: Mutex::new(VecDeque::new()),
            refunds: Mutex::new(VecDeque::new()),
            status_calls: AtomicUsize::new(0),
            capture_calls: AtomicUsize::new(0),
            refund_calls: AtomicUsize::new(0),
        }
    }

    /// Queue a status-query result; the remote status string maps onto a
    /// one-operation-free [`OrderStatus`] with that derived status.
    pub fn script_status(&self, result: GatewayResult<&str>) {
        self.statuses
            .lock()
            .unwrap()
            .push_back(result.map(|s| s.to_string()));
    }

    pub fn script_capture(&self, result: GatewayResult<()>) {
        self.captures.lock().unwrap().push_back(result);
    }

    pub fn script_refund(&self, result: GatewayResult<()>) {
        self.refunds.lock().unwrap().push_back(result);
    }

    pub fn status_count(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    pub fn capture_count(&self) -> usize {
        self.capture_calls.load(Ordering::SeqCst)
    }

    pub fn refund_count(&self) -> usize {
        self.refund_calls.load(Ordering::SeqCst)
    }

    fn receipt() -> OperationReceipt {
        OperationReceipt {
            operation_id: Some("op-1".to_string()),
        }
    }
}

#[async_trait]
impl XPayGateway for MockGateway {
    fn create_redirect_params(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<RedirectParams> {
        let importo = payment.amount_minor.to_string();
        let mac = mac::sign(
            &[
                ("codTrans", code.as_str()),
                ("divisa", &self.config.currency),
                ("importo", &importo),
            ],
            &self.config.mac_secret,
            self.config.algorithm,
        );
        Ok(RedirectParams {
            url: format!("{}ecomm/DispatcherServlet", self.config.base_url),
            fields: vec![
                ("alias".to_string(), self.config.alias.clone()),
                ("importo".to_string(), importo),
                ("divisa".to_string(), self.config.currency.clone()),
                ("codTrans".to_string(), code.as_str().to_string()),
                ("mac".to_string(), mac),
            ],
        })
    }

    async fn confirm_preauth(
        &self,
        _payment: &PaymentRecord,
        _code: &TransactionCode,
    ) -> GatewayResult<OperationReceipt> {
        self.capture_calls.fetch_add(1, Ordering::SeqCst);
        match self.captures.lock().unwrap().pop_front() {
            Some(Ok(())) | None => Ok(Self::receipt()),
            Some(Err(e)) => Err(e),
        }
    }

    async fn refund_preauth(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<OperationReceipt> {
        self.refund_calls.fetch_add(1, Ordering::SeqCst);
        let result = match self.refunds.lock().unwrap().pop_front() {
            Some(Ok(())) | None => Ok(Self::receipt()),
            Some(Err(e)) => Err(e),
        };
        if let Err(err) = &result {
            self.notifier
                .notify(InterventionNote {
                    payment: payment.id.clone(),
                    transaction_code: code.clone(),
                    call_site: CallSite::RefundPreauth,
                    reason: err.to_string(),
                })
                .await;
        }
        result
    }

    async fn get_order_status(
        &self,
        _payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<OrderStatus> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.statuses.lock().unwrap().pop_front() {
            Some(Ok(status)) => Ok(OrderStatus {
                transaction_code: code.clone(),
                operations: Vec::new(),
                status,
            }),
            Some(Err(e)) => Err(e),
            None => Err(GatewayError::NotFound {
                transaction_code: code.as_str().to_string(),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub gateway: Arc<MockGateway>,
    pub notifier: Arc<RecordingNotifier>,
    pub reconciler: Arc<Reconciler>,
}

pub fn harness_with_store(store: Arc<MemoryStore>) -> Harness {
    let config = test_config();
    let notifier = Arc::new(RecordingNotifier::default());
    let gateway = Arc::new(MockGateway::new(config.clone(), notifier.clone()));
    let reconciler = Arc::new(Reconciler::new(
        gateway.clone(),
        store.clone(),
        notifier.clone(),
        config,
    ));
    Harness {
        store,
        gateway,
        notifier,
        reconciler,
    }
}

pub fn harness() -> Harness {
    harness_with_store(Arc::new(MemoryStore::new()))
}

pub fn transport_error() -> GatewayError {
    GatewayError::Transport {
        message: "connection timed out".to_string(),
    }
}

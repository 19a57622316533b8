//! Reconciliation engine for the XPay hosted-payment-page gateway.
//!
//! Drives a remote card-payment provider through a preauthorize →
//! capture/void lifecycle, authenticates every inbound message with a keyed
//! MAC, and reconciles local payment state against the provider's
//! authoritative order status whenever the synchronous redirect flow is
//! interrupted. The hosting commerce platform supplies persistence, quota
//! checks, URLs and localization through the traits in [`store`] and
//! [`host`].

pub mod codec;
pub mod config;
pub mod error;
pub mod gateway;
pub mod host;
pub mod logging;
pub mod mac;
pub mod reconcile;
pub mod store;
pub mod workers;

pub use config::XPayConfig;
pub use error::{GatewayError, GatewayResult};
pub use gateway::{OrderStatus, RemoteStatusClass, ReturnParams, XPayClient, XPayGateway};
pub use reconcile::{
    CancelOutcome, ReconcileError, ReconcileOutcome, Reconciler, ReturnDisposition, SweepReport,
};
pub use store::{PaymentId, PaymentRecord, PaymentState, PaymentStore};

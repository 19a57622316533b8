//! Everything that touches the provider's wire contract: typed schemas,
//! the HTTP client, the order-status parser and inbound redirect
//! authentication.

pub mod client;
pub mod return_request;
pub mod status;
pub mod types;

pub use client::{OperationReceipt, XPayClient, XPayGateway};
pub use return_request::{ReturnOutcome, ReturnParams};
pub use status::{OrderOperation, OrderStatus, OperationType, RemoteStatusClass};
pub use types::RedirectParams;

//! Typed wire schemas for the gateway's endpoints.
//!
//! Every operation has an explicit request/response shape; payloads are
//! validated at this boundary and shape mismatches fail fast instead of
//! leaking missing-key errors into business logic. Field names follow the
//! provider's wire contract.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Endpoints (relative to the configured base URL)
// ---------------------------------------------------------------------------

/// Hosted-payment-page form target; the browser POSTs here, not us.
pub const ENDPOINT_ORDER_CREATE: &str = "ecomm/DispatcherServlet";
pub const ENDPOINT_ORDER_CONFIRM: &str = "api/bo/contabilizza";
pub const ENDPOINT_ORDER_CANCEL: &str = "api/bo/storna";
pub const ENDPOINT_ORDER_STATUS: &str = "api/bo/situazioneOrdine";

// ---------------------------------------------------------------------------
// Outcome and status vocabulary
// ---------------------------------------------------------------------------

pub const ESITO_OK: &str = "OK";
pub const ESITO_SUCCESS: &[&str] = &["OK"];
pub const ESITO_FAILS: &[&str] = &["KO", "ANNULLO", "ERRORE"];
pub const ESITO_PENDING: &[&str] = &["PEN"];

/// Provider fault code for "ordine inesistente".
pub const FAULT_ORDER_NOT_FOUND: i64 = 2;

// ---------------------------------------------------------------------------
// Hosted payment page
// ---------------------------------------------------------------------------

/// Form parameters for redirecting the customer to the hosted payment page.
/// Pure data; the actual network hop is the user's browser.
#[derive(Debug, Clone, Serialize)]
pub struct RedirectParams {
    /// Absolute form target URL.
    pub url: String,
    /// Ordered form fields, `mac` included.
    pub fields: Vec<(String, String)>,
}

impl RedirectParams {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }
}

// ---------------------------------------------------------------------------
// Back-office JSON requests
// ---------------------------------------------------------------------------

/// Body shared by the capture, void and status-query endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct OperationRequest {
    #[serde(rename = "apiKey")]
    pub api_key: String,
    #[serde(rename = "codiceTransazione")]
    pub transaction_code: String,
    pub importo: u64,
    pub divisa: String,
    /// Epoch milliseconds, stringified as the provider expects.
    #[serde(rename = "timeStamp")]
    pub time_stamp: String,
    pub mac: String,
}

// ---------------------------------------------------------------------------
// Back-office JSON responses
// ---------------------------------------------------------------------------

/// Structured failure detail returned alongside `esito` = KO.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiFault {
    pub codice: i64,
    #[serde(default)]
    pub messaggio: String,
}

/// Response envelope for capture and void.
#[derive(Debug, Clone, Deserialize)]
pub struct OperationResponse {
    pub esito: String,
    #[serde(rename = "idOperazione", default)]
    pub operation_id: Option<String>,
    #[serde(rename = "timeStamp", default)]
    pub time_stamp: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub errore: Option<ApiFault>,
}

impl OperationResponse {
    pub fn is_ok(&self) -> bool {
        self.esito == ESITO_OK
    }
}

/// One order report inside a status-query response. Operation sub-objects
/// stay raw here; the status parser validates them individually.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "codiceTransazione")]
    pub transaction_code: String,
    /// Top-level fallback status, used when no operation list is present.
    #[serde(default)]
    pub stato: Option<String>,
    #[serde(default)]
    pub dettaglio: Vec<serde_json::Value>,
}

/// Response envelope for the status query.
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResponse {
    pub esito: String,
    #[serde(rename = "idOperazione", default)]
    pub operation_id: Option<String>,
    #[serde(rename = "timeStamp", default)]
    pub time_stamp: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    #[serde(default)]
    pub report: Vec<StatusReport>,
    #[serde(default)]
    pub errore: Option<ApiFault>,
}

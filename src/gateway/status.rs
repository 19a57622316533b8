//! Order status parsing.
//!
//! Turns a raw status-query response into a structured [`OrderStatus`] with
//! an ordered operation history. The provider may report several operations
//! for one transaction (preauthorization, then capture); the derived status
//! is the status of the EARLIEST operation by timestamp, so the reconciler
//! acts on the outstanding step instead of skipping ahead.

use crate::codec::TransactionCode;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::types::{StatusResponse, ESITO_OK};
use chrono::NaiveDateTime;
use serde_json::Value as JsonValue;

/// Fractional-seconds timestamp format used in operation reports. Fixed by
/// the provider; an unparsable value is a loud parse failure, never a
/// silent default.
pub const OPERATION_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

// ---------------------------------------------------------------------------
// Operation model
// ---------------------------------------------------------------------------

/// Gateway-reported lifecycle operation kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationType {
    Authorization,
    Capture,
    Void,
    Refund,
    Other(String),
}

impl OperationType {
    pub fn from_wire(value: &str) -> Self {
        match value.to_uppercase().as_str() {
            "AUTORIZZAZIONE" => OperationType::Authorization,
            "CONTABILIZZAZIONE" | "PAGAMENTO" => OperationType::Capture,
            "ANNULLO" | "STORNO" => OperationType::Void,
            "RIMBORSO" => OperationType::Refund,
            _ => OperationType::Other(value.to_string()),
        }
    }
}

/// One gateway-reported lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOperation {
    pub kind: OperationType,
    pub status: String,
    pub timestamp: NaiveDateTime,
}

// ---------------------------------------------------------------------------
// Remote status classification
// ---------------------------------------------------------------------------

/// Classes the reconciler's transition table is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteStatusClass {
    /// Funds preauthorized, capture still required.
    Authorized,
    /// Funds captured; nothing left to request.
    Captured,
    /// Outcome not yet decided by the provider.
    Pending,
    /// Refunded, voided or denied.
    Refunded,
    /// Unknown vocabulary. Fail-safe: unknown is not failure.
    Unrecognized,
}

impl RemoteStatusClass {
    pub fn classify(status: &str) -> Self {
        let status = status.trim();
        if status.eq_ignore_ascii_case("Autorizzato") {
            RemoteStatusClass::Authorized
        } else if status.eq_ignore_ascii_case("Contabilizzato")
            || status.eq_ignore_ascii_case("Pagato")
        {
            RemoteStatusClass::Captured
        } else if status.eq_ignore_ascii_case("In corso")
            || status.eq_ignore_ascii_case("Pending")
            || status.eq_ignore_ascii_case("In attesa di contabilizzazione")
        {
            RemoteStatusClass::Pending
        } else if status.eq_ignore_ascii_case("Rimborsato")
            || status.eq_ignore_ascii_case("Stornato")
            || status.eq_ignore_ascii_case("Annullato")
            || status.eq_ignore_ascii_case("Negato")
            || status.eq_ignore_ascii_case("Rifiutato")
        {
            RemoteStatusClass::Refunded
        } else {
            RemoteStatusClass::Unrecognized
        }
    }
}

// ---------------------------------------------------------------------------
// Aggregate
// ---------------------------------------------------------------------------

/// Authoritative provider-side view of one transaction.
#[derive(Debug, Clone)]
pub struct OrderStatus {
    pub transaction_code: TransactionCode,
    /// Operations sorted by timestamp, earliest first.
    pub operations: Vec<OrderOperation>,
    /// Earliest operation's status, or the report's fallback status when no
    /// operation list was present.
    pub status: String,
}

impl OrderStatus {
    pub fn class(&self) -> RemoteStatusClass {
        RemoteStatusClass::classify(&self.status)
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a raw status response for `requested`.
///
/// Fails with a parse error when the top-level success marker is missing or
/// false, the report list is empty, the echoed transaction code does not
/// match the requested one (guards against a response mix-up delivering
/// someone else's order), or neither operations nor a fallback status are
/// present.
pub fn parse(requested: &TransactionCode, raw: &StatusResponse) -> GatewayResult<OrderStatus> {
    if raw.esito != ESITO_OK {
        return Err(GatewayError::parse(format!(
            "status response esito is {:?}, expected {:?}",
            raw.esito, ESITO_OK
        )));
    }

    let report = raw
        .report
        .first()
        .ok_or_else(|| GatewayError::parse("status response carries no report"))?;

    if report.transaction_code != requested.as_str() {
        return Err(GatewayError::parse(format!(
            "status response echoes transaction {} but {} was requested",
            report.transaction_code, requested
        )));
    }

    let mut operations = report
        .dettaglio
        .iter()
        .map(parse_operation)
        .collect::<GatewayResult<Vec<_>>>()?;
    operations.sort_by_key(|op| op.timestamp);

    let status = match operations.first() {
        Some(earliest) => earliest.status.clone(),
        None => report
            .stato
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| {
                GatewayError::parse("status report has neither operations nor a status field")
            })?,
    };

    Ok(OrderStatus {
        transaction_code: requested.clone(),
        operations,
        status,
    })
}

/// Parse one operation sub-object. Mandatory fields: operation type, status,
/// timestamp.
fn parse_operation(raw: &JsonValue) -> GatewayResult<OrderOperation> {
    let kind = raw
        .get("tipoOperazione")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::parse("operation is missing tipoOperazione"))?;
    let status = raw
        .get("stato")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::parse("operation is missing stato"))?;
    let timestamp = raw
        .get("dataOperazione")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::parse("operation is missing dataOperazione"))?;

    let timestamp = NaiveDateTime::parse_from_str(timestamp, OPERATION_TIMESTAMP_FORMAT)
        .map_err(|e| {
            GatewayError::parse(format!("unparsable operation timestamp {timestamp:?}: {e}"))
        })?;

    Ok(OrderOperation {
        kind: OperationType::from_wire(kind),
        status: status.to_string(),
        timestamp,
    })
}

//! Authentication of inbound browser redirects.
//!
//! The redirect channel is untrustworthy: the customer's browser carries the
//! outcome parameters back to us and anything in the query string can be
//! forged. A redirect is allowed to influence payment state only after its
//! MAC verifies over the contractually fixed field order.

use crate::config::XPayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::types::{ESITO_FAILS, ESITO_PENDING, ESITO_SUCCESS};
use crate::mac;

/// Outcome classes carried by the `esito` query parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnOutcome {
    Success,
    Pending,
    Failed,
}

/// Parameters of an inbound return redirect.
#[derive(Debug, Clone)]
pub struct ReturnParams {
    pub cod_trans: String,
    pub esito: String,
    pub importo: String,
    pub data: String,
    pub orario: String,
    pub cod_aut: String,
    pub mac: String,
}

impl ReturnParams {
    /// Extract the expected parameters from query pairs. A missing parameter
    /// is a parse error; the redirect is rejected before any verification.
    pub fn from_query(pairs: &[(String, String)]) -> GatewayResult<Self> {
        let get = |name: &str| -> GatewayResult<String> {
            pairs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.clone())
                .ok_or_else(|| {
                    GatewayError::parse(format!("return request is missing parameter {name:?}"))
                })
        };

        Ok(Self {
            cod_trans: get("codTrans")?,
            esito: get("esito")?,
            importo: get("importo")?,
            data: get("data")?,
            orario: get("orario")?,
            cod_aut: get("codAut")?,
            mac: get("mac")?,
        })
    }

    /// Verify the MAC and classify the outcome. The digest covers the fields
    /// in the same fixed order the provider signs them in; a mismatch means
    /// the payload is untrusted and must not be acted upon.
    pub fn verify(&self, config: &XPayConfig) -> GatewayResult<ReturnOutcome> {
        let fields = [
            ("codTrans", self.cod_trans.as_str()),
            ("esito", self.esito.as_str()),
            ("importo", self.importo.as_str()),
            ("data", self.data.as_str()),
            ("orario", self.orario.as_str()),
            ("codAut", self.cod_aut.as_str()),
        ];
        if !mac::verify(&fields, &config.mac_secret, config.algorithm, &self.mac) {
            return Err(GatewayError::Integrity {
                transaction_code: self.cod_trans.clone(),
                context: "return redirect".to_string(),
            });
        }

        let esito = self.esito.to_uppercase();
        if ESITO_SUCCESS.contains(&esito.as_str()) {
            Ok(ReturnOutcome::Success)
        } else if ESITO_PENDING.contains(&esito.as_str()) {
            Ok(ReturnOutcome::Pending)
        } else if ESITO_FAILS.contains(&esito.as_str()) {
            Ok(ReturnOutcome::Failed)
        } else {
            Err(GatewayError::parse(format!(
                "unknown return outcome {:?}",
                self.esito
            )))
        }
    }
}

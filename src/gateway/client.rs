//! Gateway client: signed requests, bounded-timeout HTTP, validated
//! responses.
//!
//! Four operations: redirect-parameter construction (no network hop; the
//! customer's browser performs it), capture, void/refund and status query.
//! Transport failures are always translated into the crate's own error
//! taxonomy; a raw reqwest error never escapes this module.

use crate::codec::TransactionCode;
use crate::config::XPayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::gateway::status::{self, OrderStatus};
use crate::gateway::types::{
    OperationRequest, OperationResponse, RedirectParams, StatusResponse, ENDPOINT_ORDER_CANCEL,
    ENDPOINT_ORDER_CONFIRM, ENDPOINT_ORDER_CREATE, ENDPOINT_ORDER_STATUS, FAULT_ORDER_NOT_FOUND,
};
use crate::host::{CallSite, CallbackUrlBuilder, InterventionNote, InterventionNotifier, Localizer};
use crate::mac;
use crate::store::PaymentRecord;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Acknowledgement of a completed capture or refund.
#[derive(Debug, Clone)]
pub struct OperationReceipt {
    pub operation_id: Option<String>,
}

/// Seam between the reconciler and the wire. Implemented by [`XPayClient`]
/// in production and by mocks in tests.
#[async_trait]
pub trait XPayGateway: Send + Sync {
    /// Build the hosted-payment-page form parameters for one attempt.
    /// Pure construction; no network call.
    fn create_redirect_params(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<RedirectParams>;

    /// Capture a preauthorized transaction.
    async fn confirm_preauth(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<OperationReceipt>;

    /// Reverse a preauthorization (or refund a captured one). Any failure
    /// here leaves money held against the customer, so every failure path
    /// also notifies the operator before returning.
    async fn refund_preauth(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<OperationReceipt>;

    /// Query the provider's authoritative order status.
    async fn get_order_status(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<OrderStatus>;
}

// ---------------------------------------------------------------------------
// HTTP wrapper
// ---------------------------------------------------------------------------

struct GatewayHttpClient {
    client: reqwest::Client,
}

impl GatewayHttpClient {
    fn new(timeout: Duration) -> GatewayResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Transport {
                message: format!("failed to initialize HTTP client: {}", e),
            })?;
        Ok(Self { client })
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        url: &str,
        api_key: &str,
        body: &OperationRequest,
    ) -> GatewayResult<T> {
        let response = self
            .client
            .post(url)
            .header("X-Api-Key", api_key)
            .header("Correlation-Id", Uuid::new_v4().to_string())
            .json(body)
            .send()
            .await
            .map_err(|e| GatewayError::Transport {
                message: format!("provider request failed: {}", e),
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(GatewayError::Transport {
                message: format!("provider returned HTTP {}", status),
            });
        }

        serde_json::from_str::<T>(&text)
            .map_err(|e| GatewayError::parse(format!("invalid provider JSON response: {}", e)))
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

pub struct XPayClient {
    config: XPayConfig,
    http: GatewayHttpClient,
    urls: Arc<dyn CallbackUrlBuilder>,
    localizer: Arc<dyn Localizer>,
    notifier: Arc<dyn InterventionNotifier>,
}

impl XPayClient {
    pub fn new(
        config: XPayConfig,
        urls: Arc<dyn CallbackUrlBuilder>,
        localizer: Arc<dyn Localizer>,
        notifier: Arc<dyn InterventionNotifier>,
    ) -> GatewayResult<Self> {
        let http = GatewayHttpClient::new(config.request_timeout)?;
        Ok(Self {
            config,
            http,
            urls,
            localizer,
            notifier,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url, path)
    }

    /// Sign and assemble a back-office request body for one transaction.
    fn operation_request(&self, payment: &PaymentRecord, code: &TransactionCode) -> OperationRequest {
        let importo = payment.amount_minor.to_string();
        let time_stamp = chrono::Utc::now().timestamp_millis().to_string();
        let mac = mac::sign(
            &[
                ("apiKey", &self.config.api_key),
                ("codiceTransazione", code.as_str()),
                ("divisa", &self.config.currency),
                ("importo", &importo),
                ("timeStamp", &time_stamp),
            ],
            &self.config.mac_secret,
            self.config.algorithm,
        );
        OperationRequest {
            api_key: self.config.api_key.clone(),
            transaction_code: code.as_str().to_string(),
            importo: payment.amount_minor,
            divisa: self.config.currency.clone(),
            time_stamp,
            mac,
        }
    }

    /// Verify the digest on an `esito` = OK response envelope. The provider
    /// reported success, so a mismatch means money may have moved behind a
    /// payload we cannot trust.
    fn verify_response_mac(
        &self,
        code: &TransactionCode,
        context: &str,
        esito: &str,
        operation_id: Option<&str>,
        time_stamp: Option<&str>,
        candidate: Option<&str>,
    ) -> GatewayResult<()> {
        let candidate = candidate.ok_or_else(|| GatewayError::Integrity {
            transaction_code: code.as_str().to_string(),
            context: format!("{context}: response carries no MAC"),
        })?;
        let fields = [
            ("esito", esito),
            ("idOperazione", operation_id.unwrap_or("")),
            ("timeStamp", time_stamp.unwrap_or("")),
        ];
        if !mac::verify(
            &fields,
            &self.config.mac_secret,
            self.config.algorithm,
            candidate,
        ) {
            return Err(GatewayError::Integrity {
                transaction_code: code.as_str().to_string(),
                context: context.to_string(),
            });
        }
        Ok(())
    }

    /// Shared KO/OK handling for capture and void responses.
    fn settle_operation_response(
        &self,
        operation: &str,
        code: &TransactionCode,
        response: OperationResponse,
    ) -> GatewayResult<OperationReceipt> {
        if !response.is_ok() {
            let (fault_code, message) = match response.errore {
                Some(fault) => (Some(fault.codice), fault.messaggio),
                None => (None, format!("esito {}", response.esito)),
            };
            return Err(GatewayError::ProviderRejection {
                operation: operation.to_string(),
                transaction_code: code.as_str().to_string(),
                code: fault_code,
                message,
            });
        }

        self.verify_response_mac(
            code,
            operation,
            &response.esito,
            response.operation_id.as_deref(),
            response.time_stamp.as_deref(),
            response.mac.as_deref(),
        )?;

        Ok(OperationReceipt {
            operation_id: response.operation_id,
        })
    }

    async fn refund_preauth_inner(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<OperationReceipt> {
        let body = self.operation_request(payment, code);
        let response: OperationResponse = self
            .http
            .post_json(&self.endpoint(ENDPOINT_ORDER_CANCEL), &self.config.api_key, &body)
            .await?;
        self.settle_operation_response("refund", code, response)
    }
}

#[async_trait]
impl XPayGateway for XPayClient {
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

        let fields = vec![
            ("alias".to_string(), self.config.alias.clone()),
            ("importo".to_string(), importo),
            ("divisa".to_string(), self.config.currency.clone()),
            ("codTrans".to_string(), code.as_str().to_string()),
            ("url".to_string(), self.urls.success_url(payment)),
            ("url_back".to_string(), self.urls.failure_url(payment)),
            ("mac".to_string(), mac),
            (
                "languageId".to_string(),
                self.localizer.language_code().to_string(),
            ),
            (
                "descrizione".to_string(),
                self.localizer.order_description(payment),
            ),
        ];

        Ok(RedirectParams {
            url: self.endpoint(ENDPOINT_ORDER_CREATE),
            fields,
        })
    }

    async fn confirm_preauth(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<OperationReceipt> {
        let body = self.operation_request(payment, code);
        let response: OperationResponse = self
            .http
            .post_json(&self.endpoint(ENDPOINT_ORDER_CONFIRM), &self.config.api_key, &body)
            .await?;
        let receipt = self.settle_operation_response("capture", code, response)?;
        info!(
            payment = %payment.id,
            transaction_code = %code,
            operation_id = ?receipt.operation_id,
            "preauthorization captured"
        );
        Ok(receipt)
    }

    async fn refund_preauth(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<OperationReceipt> {
        match self.refund_preauth_inner(payment, code).await {
            Ok(receipt) => {
                info!(
                    payment = %payment.id,
                    transaction_code = %code,
                    operation_id = ?receipt.operation_id,
                    "preauthorization reversed"
                );
                Ok(receipt)
            }
            Err(err) => {
                // An unreversed preauthorization holds the customer's money;
                // never let this fail silently.
                warn!(
                    payment = %payment.id,
                    transaction_code = %code,
                    error = %err,
                    "preauthorization reversal failed"
                );
                self.notifier
                    .notify(InterventionNote {
                        payment: payment.id.clone(),
                        transaction_code: code.clone(),
                        call_site: CallSite::RefundPreauth,
                        reason: err.to_string(),
                    })
                    .await;
                Err(err)
            }
        }
    }

    async fn get_order_status(
        &self,
        payment: &PaymentRecord,
        code: &TransactionCode,
    ) -> GatewayResult<OrderStatus> {
        let body = self.operation_request(payment, code);
        let response: StatusResponse = self
            .http
            .post_json(&self.endpoint(ENDPOINT_ORDER_STATUS), &self.config.api_key, &body)
            .await?;

        if response.esito != crate::gateway::types::ESITO_OK {
            if let Some(fault) = &response.errore {
                if fault.codice == FAULT_ORDER_NOT_FOUND {
                    return Err(GatewayError::NotFound {
                        transaction_code: code.as_str().to_string(),
                    });
                }
            }
            let (fault_code, message) = match &response.errore {
                Some(fault) => (Some(fault.codice), fault.messaggio.clone()),
                None => (None, format!("esito {}", response.esito)),
            };
            return Err(GatewayError::ProviderRejection {
                operation: "status".to_string(),
                transaction_code: code.as_str().to_string(),
                code: fault_code,
                message,
            });
        }

        self.verify_response_mac(
            code,
            "status query",
            &response.esito,
            response.operation_id.as_deref(),
            response.time_stamp.as_deref(),
            response.mac.as_deref(),
        )?;

        status::parse(code, &response)
    }
}

use thiserror::Error;

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Errors raised while talking to the XPay gateway.
///
/// Raw transport errors never escape the client: everything the provider or
/// the network can do wrong is translated into one of these variants.
#[derive(Debug, Clone, Error)]
pub enum GatewayError {
    /// Network-level failure (connect, timeout, TLS) reaching the provider.
    /// A timed-out request may still have succeeded remotely; the
    /// reconciliation sweep recovers the true outcome from a status query.
    #[error("could not reach payment provider: {message}")]
    Transport { message: String },

    /// A response (or inbound redirect) failed MAC verification. The payload
    /// must be treated as untrusted and never acted upon.
    #[error("MAC verification failed for transaction {transaction_code} ({context})")]
    Integrity {
        transaction_code: String,
        context: String,
    },

    /// The provider returned a structured failure outcome (`esito` = KO).
    #[error("provider rejected {operation} for transaction {transaction_code}: {message}")]
    ProviderRejection {
        operation: String,
        transaction_code: String,
        code: Option<i64>,
        message: String,
    },

    /// The provider has no record of the transaction. Distinct from a
    /// generic rejection because callers treat it differently (cancel
    /// treats it as already void, reconcile retries later).
    #[error("provider has no record of transaction {transaction_code}")]
    NotFound { transaction_code: String },

    /// The response shape did not match the expected schema.
    #[error("malformed provider response: {message}")]
    Parse { message: String },
}

impl GatewayError {
    pub fn parse(message: impl Into<String>) -> Self {
        GatewayError::Parse {
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Transport { .. } => true,
            GatewayError::Integrity { .. } => false,
            GatewayError::ProviderRejection { .. } => false,
            GatewayError::NotFound { .. } => false,
            GatewayError::Parse { .. } => false,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            GatewayError::Transport { .. } => {
                "Could not reach the payment provider. Please try again.".to_string()
            }
            GatewayError::Integrity { .. } => {
                "The payment response could not be verified.".to_string()
            }
            GatewayError::ProviderRejection { .. } => {
                "The payment was rejected by the provider.".to_string()
            }
            GatewayError::NotFound { .. } => {
                "The payment could not be found at the provider.".to_string()
            }
            GatewayError::Parse { .. } => {
                "The payment provider returned an unexpected response.".to_string()
            }
        }
    }
}

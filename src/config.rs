//! Merchant and engine configuration.
//!
//! One explicit struct passed by reference into every component; no hidden
//! process-wide settings lookup. Values load from the environment with
//! sensible defaults and are validated once at startup.

use crate::mac::MacAlgorithm;
use std::env;
use std::time::Duration;

/// Sandbox gateway base URL.
pub const TEST_URL: &str = "https://int-ecommerce.nexi.it/ecomm/";
/// Production gateway base URL.
pub const PROD_URL: &str = "https://ecommerce.nexi.it/ecomm/";

#[derive(Debug, Clone)]
pub struct XPayConfig {
    /// Merchant alias sent with the hosted-payment-page form.
    pub alias: String,
    /// API key for the back-office JSON endpoints.
    pub api_key: String,
    /// Shared secret appended to every signed message.
    pub mac_secret: String,
    /// Private salt for transaction-code derivation.
    pub code_secret: String,
    /// Merchant namespace mixed into transaction codes (e.g. shop slug).
    pub namespace: String,
    /// Digest algorithm agreed with the merchant profile.
    pub algorithm: MacAlgorithm,
    /// Gateway base URL; sandbox or production.
    pub base_url: String,
    /// ISO currency code sent as `divisa`.
    pub currency: String,
    /// Per-request timeout. Default sits just past a doubled 15 s provider
    /// retransmission interval so a transient local timeout does not race a
    /// provider-side retry.
    pub request_timeout: Duration,
    /// Payments older than this are outside the reconcilable window and
    /// skipped by the sweep.
    pub reconcile_window: chrono::Duration,
    /// Maximum payments examined per sweep cycle.
    pub sweep_batch: i64,
}

impl Default for XPayConfig {
    fn default() -> Self {
        Self {
            alias: String::new(),
            api_key: String::new(),
            mac_secret: String::new(),
            code_secret: String::new(),
            namespace: String::new(),
            algorithm: MacAlgorithm::Sha1,
            base_url: TEST_URL.to_string(),
            currency: "EUR".to_string(),
            request_timeout: Duration::from_secs(31),
            reconcile_window: chrono::Duration::hours(48),
            sweep_batch: 200,
        }
    }
}

impl XPayConfig {
    /// Load configuration from environment variables. `XPAY_TESTMODE=false`
    /// switches the base URL to production unless `XPAY_BASE_URL` overrides
    /// it outright.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenv::dotenv().ok();

        let defaults = Self::default();
        let testmode = env::var("XPAY_TESTMODE")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(true);

        let config = Self {
            alias: env::var("XPAY_ALIAS")
                .map_err(|_| ConfigError::MissingVariable("XPAY_ALIAS".to_string()))?,
            api_key: env::var("XPAY_API_KEY")
                .map_err(|_| ConfigError::MissingVariable("XPAY_API_KEY".to_string()))?,
            mac_secret: env::var("XPAY_MAC_SECRET")
                .map_err(|_| ConfigError::MissingVariable("XPAY_MAC_SECRET".to_string()))?,
            code_secret: env::var("XPAY_CODE_SECRET")
                .map_err(|_| ConfigError::MissingVariable("XPAY_CODE_SECRET".to_string()))?,
            namespace: env::var("XPAY_NAMESPACE")
                .map_err(|_| ConfigError::MissingVariable("XPAY_NAMESPACE".to_string()))?,
            algorithm: env::var("XPAY_MAC_ALGORITHM")
                .unwrap_or_else(|_| "sha1".to_string())
                .parse()
                .map_err(|_| ConfigError::InvalidValue("XPAY_MAC_ALGORITHM".to_string()))?,
            base_url: env::var("XPAY_BASE_URL").unwrap_or_else(|_| {
                if testmode {
                    TEST_URL.to_string()
                } else {
                    PROD_URL.to_string()
                }
            }),
            currency: env::var("XPAY_CURRENCY").unwrap_or(defaults.currency),
            request_timeout: Duration::from_secs(
                env::var("XPAY_REQUEST_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
                    .unwrap_or(defaults.request_timeout.as_secs()),
            ),
            reconcile_window: chrono::Duration::hours(
                env::var("XPAY_RECONCILE_WINDOW_HOURS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok())
                    .unwrap_or(defaults.reconcile_window.num_hours()),
            ),
            sweep_batch: env::var("XPAY_SWEEP_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(defaults.sweep_batch),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.alias.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "XPAY_ALIAS cannot be empty".to_string(),
            ));
        }
        if self.mac_secret.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "XPAY_MAC_SECRET cannot be empty".to_string(),
            ));
        }
        if self.code_secret.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "XPAY_CODE_SECRET cannot be empty".to_string(),
            ));
        }
        if !self.base_url.starts_with("https://") && !self.base_url.starts_with("http://") {
            return Err(ConfigError::InvalidValue(
                "XPAY_BASE_URL must be a valid URL".to_string(),
            ));
        }
        if !self.base_url.ends_with('/') {
            return Err(ConfigError::InvalidValue(
                "XPAY_BASE_URL must end with a trailing slash".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "XPAY_REQUEST_TIMEOUT_SECS cannot be 0".to_string(),
            ));
        }
        if self.sweep_batch <= 0 {
            return Err(ConfigError::InvalidValue(
                "XPAY_SWEEP_BATCH_SIZE must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid value for configuration: {0}")]
    InvalidValue(String),
}

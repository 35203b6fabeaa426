// =============================================================================
// CONFIGURATION MODULE
// =============================================================================
// Loads the dashboard process configuration from environment variables.
//
// NOTES:
// - Only the binary reads the environment; the library takes EngineConfig
// - Parse failures stop startup with a message naming the variable
// =============================================================================

use anyhow::{bail, Context, Result};
use std::env;
use std::time::Duration;

use workorder_sync::{EngineConfig, RetryPolicy};

// -----------------------------------------------------------------------------
// CONFIG STRUCT
// -----------------------------------------------------------------------------
#[derive(Debug, Clone)]
pub struct Config {
    /// Dashboard HTTP port (default: 8080)
    pub port: u16,

    /// Backend REST root, e.g. https://mes.example.com/api
    pub api_base_url: String,

    /// Bearer token for the backend (optional)
    pub api_token: Option<String>,

    /// Name sent as `requested_by` on part requests (default: operator)
    pub operator_name: String,

    /// Work order list polling interval in seconds (default: 30)
    pub work_order_poll_secs: u64,

    /// Comments polling interval in seconds (default: 300)
    pub aggregate_poll_secs: u64,

    /// Attempts per backend call, first one included (default: 3)
    pub retry_max_attempts: u32,

    /// Flat wait between attempts in milliseconds (default: 1000)
    pub retry_backoff_ms: u64,

    /// Per-request timeout in seconds (default: 15)
    pub request_timeout_secs: u64,
}

/// Read `name`, falling back to `default` when unset.
fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

impl Config {
    // -------------------------------------------------------------------------
    // LOAD CONFIGURATION FROM ENVIRONMENT
    // -------------------------------------------------------------------------
    /// Creates a Config by reading environment variables.
    ///
    /// # Returns
    /// - `Ok(Config)` if API_BASE_URL is set and every value parses
    /// - `Err` naming the offending variable otherwise
    pub fn from_env() -> Result<Self> {
        let config = Self {
            port: var_or("PORT", "8080")
                .parse()
                .context("Failed to parse PORT as a number")?,

            // Required - no default value
            api_base_url: env::var("API_BASE_URL")
                .context("API_BASE_URL environment variable is required")?,

            // Empty counts as unset
            api_token: env::var("API_TOKEN").ok().filter(|t| !t.trim().is_empty()),

            operator_name: var_or("OPERATOR_NAME", "operator"),

            work_order_poll_secs: var_or("WORK_ORDER_POLL_SECS", "30")
                .parse()
                .context("Failed to parse WORK_ORDER_POLL_SECS as a number")?,

            aggregate_poll_secs: var_or("AGGREGATE_POLL_SECS", "300")
                .parse()
                .context("Failed to parse AGGREGATE_POLL_SECS as a number")?,

            retry_max_attempts: var_or("RETRY_MAX_ATTEMPTS", "3")
                .parse()
                .context("Failed to parse RETRY_MAX_ATTEMPTS as a number")?,

            retry_backoff_ms: var_or("RETRY_BACKOFF_MS", "1000")
                .parse()
                .context("Failed to parse RETRY_BACKOFF_MS as a number")?,

            request_timeout_secs: var_or("REQUEST_TIMEOUT_SECS", "15")
                .parse()
                .context("Failed to parse REQUEST_TIMEOUT_SECS as a number")?,
        };

        if config.work_order_poll_secs == 0 || config.aggregate_poll_secs == 0 {
            bail!("Polling intervals must be at least one second");
        }
        Ok(config)
    }

    /// Library-level settings for the engine session.
    pub fn engine(&self) -> EngineConfig {
        EngineConfig {
            base_url: self.api_base_url.clone(),
            token: self.api_token.clone(),
            operator: self.operator_name.clone(),
            work_order_poll: Duration::from_secs(self.work_order_poll_secs),
            aggregate_poll: Duration::from_secs(self.aggregate_poll_secs),
            retry: RetryPolicy::new(
                self.retry_max_attempts,
                Duration::from_millis(self.retry_backoff_ms),
            ),
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }
}

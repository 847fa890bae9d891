//! Client configuration.
//!
//! Environment-driven defaults; the host can also construct the struct
//! directly. No secrets live here.

use std::time::Duration;

use crate::relay::subscription::SubscriptionConfig;

/// Tuning for sessions opened by this process.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay offered for new ceremonies when the user has no preference.
    pub default_relay_url: String,

    /// Timeout for unary relay calls.
    pub unary_timeout: Duration,

    /// Reconnect and polling-fallback tuning.
    pub subscription: SubscriptionConfig,

    /// Cadence of the expiry sweep that wipes spent pad ranges.
    pub expiry_sweep_interval: Duration,

    /// Remaining-pad threshold below which `PadLow` events fire.
    pub pad_low_threshold: u64,
}

impl ClientConfig {
    /// Load configuration from environment variables, with defaults.
    pub fn from_env() -> Self {
        Self {
            default_relay_url: std::env::var("ASH_RELAY_URL")
                .unwrap_or_else(|_| "https://relay.ash.app".to_string()),
            unary_timeout: Duration::from_secs(
                std::env::var("ASH_UNARY_TIMEOUT_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(10),
            ),
            subscription: SubscriptionConfig::default(),
            expiry_sweep_interval: Duration::from_secs(
                std::env::var("ASH_EXPIRY_SWEEP_SECS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            pad_low_threshold: std::env::var("ASH_PAD_LOW_THRESHOLD")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(4096),
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ClientConfig::from_env();
        assert!(config.default_relay_url.starts_with("http"));
        assert_eq!(config.subscription.max_attempts, 5);
        assert!(config.pad_low_threshold > 0);
    }
}

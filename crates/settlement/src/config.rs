//! Settler configuration

use std::time::Duration;

use veilnet_core::HermesAddress;

use crate::{Result, SettlementError};

/// Configures the promise settler.
#[derive(Debug, Clone)]
pub struct SettlerConfig {
    /// Escrow contract all settlements go through.
    pub hermes_address: HermesAddress,
    /// Fraction of the available channel balance that triggers settlement,
    /// in `[0, 1]`. Lower values settle more eagerly and pay more fees;
    /// higher values risk the consumer draining the escrow first. Sensible
    /// deployments sit around 0.35–0.8.
    pub threshold: f64,
    /// How long to wait for the on-chain confirmation event before giving
    /// up on a settlement attempt.
    pub max_wait_for_settlement: Duration,
}

impl SettlerConfig {
    pub fn new(hermes_address: HermesAddress) -> Self {
        Self {
            hermes_address,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.threshold) {
            return Err(SettlementError::Config(format!(
                "threshold {} outside [0, 1]",
                self.threshold
            )));
        }
        if self.max_wait_for_settlement.is_zero() {
            return Err(SettlementError::Config(
                "max_wait_for_settlement must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SettlerConfig {
    fn default() -> Self {
        Self {
            hermes_address: HermesAddress::default(),
            threshold: 0.5,
            max_wait_for_settlement: Duration::from_secs(5 * 60),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SettlerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.threshold, 0.5);
        assert_eq!(config.max_wait_for_settlement, Duration::from_secs(300));
    }

    #[test]
    fn test_threshold_bounds() {
        let mut config = SettlerConfig::default();

        config.threshold = 0.0;
        assert!(config.validate().is_ok());
        config.threshold = 1.0;
        assert!(config.validate().is_ok());

        config.threshold = -0.1;
        assert!(config.validate().is_err());
        config.threshold = 1.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_wait_rejected() {
        let config = SettlerConfig {
            max_wait_for_settlement: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}

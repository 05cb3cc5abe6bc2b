//! Bitcoin networks the engine plans funding on.

use serde::{Deserialize, Serialize};

/// Bitcoin network type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    /// Bitcoin mainnet
    #[default]
    Mainnet,
    /// Bitcoin testnet4
    Testnet4,
}

impl Network {
    /// Get the mempool.space API base URL for this network.
    pub fn mempool_api_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://mempool.space/api",
            Network::Testnet4 => "https://mempool.space/testnet4/api",
        }
    }

    /// Recommended fee rates endpoint.
    pub fn fee_rates_url(&self) -> String {
        format!("{}/v1/fees/recommended", self.mempool_api_url())
    }

    /// Parse network from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mainnet" | "main" | "bitcoin" => Some(Network::Mainnet),
            "testnet4" | "testnet" | "test" => Some(Network::Testnet4),
            _ => None,
        }
    }

    /// Get network name as string.
    pub fn name(&self) -> &'static str {
        match self {
            Network::Mainnet => "mainnet",
            Network::Testnet4 => "testnet4",
        }
    }
}

impl core::fmt::Display for Network {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_from_str() {
        assert_eq!(Network::from_str("mainnet"), Some(Network::Mainnet));
        assert_eq!(Network::from_str("MAINNET"), Some(Network::Mainnet));
        assert_eq!(Network::from_str("testnet4"), Some(Network::Testnet4));
        assert_eq!(Network::from_str("invalid"), None);
    }

    #[test]
    fn test_fee_rates_url() {
        assert_eq!(
            Network::Testnet4.fee_rates_url(),
            "https://mempool.space/testnet4/api/v1/fees/recommended"
        );
        assert_eq!(Network::default().name(), "mainnet");
    }
}

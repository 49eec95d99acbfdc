//! runtime configuration and service endpoints
//!
//! nothing secret is compiled in. the binary fills this from flags and
//! environment variables, then calls [`Config::validate_for`] before any
//! network call so a missing api key or contract fails fast.

use alloy::primitives::Address;
use serde::{Deserialize, Serialize};

use crate::auth::AuthMode;
use crate::metadata::PayloadFormat;
use crate::vss::{SHARD_COUNT, THRESHOLD};
use crate::{Error, Result};

/// public lighthouse upload api
pub const DEFAULT_STORAGE_URL: &str = "https://node.lighthouse.storage";
/// public lighthouse ipfs gateway
pub const DEFAULT_GATEWAY_URL: &str = "https://gateway.lighthouse.storage";
/// public kavach challenge / key custody service
pub const DEFAULT_AUTH_URL: &str = "https://encryption.lighthouse.storage";
/// local hardhat / anvil node
pub const DEFAULT_RPC_URL: &str = "http://127.0.0.1:8545";
/// label attached to uploads
pub const DEFAULT_LABEL: &str = "land-metadata";

/// what a user-triggered action needs from configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Publish,
    PublishAndMint,
    Mint,
    ListLands,
    Decrypt,
    Transfer,
}

impl Action {
    pub fn needs_api_key(&self) -> bool {
        matches!(self, Action::Publish | Action::PublishAndMint)
    }

    pub fn needs_contract(&self) -> bool {
        matches!(self, Action::PublishAndMint | Action::Mint | Action::ListLands | Action::Transfer)
    }
}

/// service endpoints
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    /// challenge, session token and key custody service
    pub auth_url: String,
    /// upload api
    pub storage_url: String,
    /// ciphertext gateway
    pub gateway_url: String,
    /// evm json-rpc
    pub rpc_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            auth_url: DEFAULT_AUTH_URL.into(),
            storage_url: DEFAULT_STORAGE_URL.into(),
            gateway_url: DEFAULT_GATEWAY_URL.into(),
            rpc_url: DEFAULT_RPC_URL.into(),
        }
    }
}

/// full client configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub endpoints: Endpoints,
    /// storage service api key
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// deployed registry contract (hex)
    pub contract_address: Option<String>,
    /// expected chain id of the rpc node, checked before registry calls
    pub chain_id: Option<u64>,
    /// hex private key backing the wallet
    #[serde(skip_serializing)]
    pub wallet_key: Option<String>,
    /// custody nodes holding key shards
    pub shard_count: usize,
    /// shards needed to rebuild a key
    pub threshold: usize,
    /// upload label
    pub label: String,
    pub auth_mode: AuthMode,
    #[serde(skip)]
    pub payload_format: PayloadFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            endpoints: Endpoints::default(),
            api_key: None,
            contract_address: None,
            chain_id: None,
            wallet_key: None,
            shard_count: SHARD_COUNT,
            threshold: THRESHOLD,
            label: DEFAULT_LABEL.into(),
            auth_mode: AuthMode::default(),
            payload_format: PayloadFormat::default(),
        }
    }
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

impl Config {
    /// storage api key, or `MissingConfig`
    pub fn api_key(&self) -> Result<&str> {
        present(&self.api_key).ok_or(Error::MissingConfig("LIGHTHOUSE_API_KEY"))
    }

    /// parsed registry address, or `MissingConfig` / `InvalidConfig`
    pub fn contract_address(&self) -> Result<Address> {
        let raw = present(&self.contract_address)
            .ok_or(Error::MissingConfig("LAND_CONTRACT_ADDRESS"))?;
        raw.parse().map_err(|e| Error::InvalidConfig {
            name: "LAND_CONTRACT_ADDRESS",
            reason: format!("'{raw}': {e}"),
        })
    }

    /// wallet private key, or `NoWalletFound`
    pub fn wallet_key(&self) -> Result<&str> {
        present(&self.wallet_key).ok_or(Error::NoWalletFound)
    }

    /// check everything `action` needs before any network call
    pub fn validate_for(&self, action: Action) -> Result<()> {
        if action.needs_api_key() {
            self.api_key()?;
        }
        if action.needs_contract() {
            self.contract_address()?;
        }
        if self.threshold == 0 || self.threshold > self.shard_count || self.shard_count > 255 {
            return Err(Error::InvalidConfig {
                name: "shard threshold",
                reason: format!(
                    "need 1 <= threshold ({}) <= shards ({}) <= 255",
                    self.threshold, self.shard_count
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> Config {
        Config {
            api_key: Some("01eb.test".into()),
            contract_address: Some("0x5FbDB2315678afecb367f032d93F642f64180aa3".into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.shard_count, 5);
        assert_eq!(config.threshold, 3);
        assert_eq!(config.label, "land-metadata");
        assert_eq!(config.auth_mode, AuthMode::Signature);
    }

    #[test]
    fn test_missing_api_key_fails_publish() {
        let config = Config {
            api_key: None,
            ..configured()
        };
        assert!(matches!(
            config.validate_for(Action::PublishAndMint),
            Err(Error::MissingConfig("LIGHTHOUSE_API_KEY"))
        ));
        // decrypt does not need the upload key
        assert!(config.validate_for(Action::Decrypt).is_ok());
    }

    #[test]
    fn test_blank_values_count_as_missing() {
        let config = Config {
            contract_address: Some("   ".into()),
            ..configured()
        };
        assert!(matches!(
            config.validate_for(Action::ListLands),
            Err(Error::MissingConfig("LAND_CONTRACT_ADDRESS"))
        ));
    }

    #[test]
    fn test_invalid_contract_address() {
        let config = Config {
            contract_address: Some("0x1234".into()),
            ..configured()
        };
        assert!(matches!(
            config.validate_for(Action::Mint),
            Err(Error::InvalidConfig { .. })
        ));
    }

    #[test]
    fn test_wallet_key_absent_is_no_wallet() {
        assert!(matches!(Config::default().wallet_key(), Err(Error::NoWalletFound)));
    }

    #[test]
    fn test_bad_threshold() {
        let config = Config {
            threshold: 6,
            ..configured()
        };
        assert!(config.validate_for(Action::Decrypt).is_err());
    }

    #[test]
    fn test_secrets_not_serialized() {
        let config = Config {
            wallet_key: Some("0xsecret".into()),
            ..configured()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("0xsecret"));
        assert!(!json.contains("01eb.test"));
    }
}

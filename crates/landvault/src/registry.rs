//! token registry: writer and reader for the land nft contract
//!
//! the contract is an erc-721 enumerable whose token uri is the cid of the
//! encrypted metadata. writes block until a receipt is observed.

use alloy::network::{Ethereum, EthereumWallet};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{PendingTransactionBuilder, Provider, ProviderBuilder};
use alloy::signers::local::PrivateKeySigner;
use alloy::sol;
use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::storage::Cid;
use crate::{Error, Result};

sol! {
    #[allow(missing_docs)]
    #[sol(rpc)]
    #[derive(Debug)]
    contract LandNFT {
        event Transfer(address indexed from, address indexed to, uint256 indexed tokenId);

        function mintLand(string memory uri) external;
        function updateTokenURI(uint256 tokenId, string memory uri) external;
        function balanceOf(address owner) external view returns (uint256);
        function tokenOfOwnerByIndex(address owner, uint256 index) external view returns (uint256);
        function tokenURI(uint256 tokenId) external view returns (string memory);
    }
}

/// a confirmed registry write
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Confirmation {
    pub tx_hash: TxHash,
    /// token id from the receipt's Transfer event, when one was emitted
    pub token_id: Option<U256>,
}

/// one token owned by an account
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Land {
    pub token_id: U256,
    pub uri: Cid,
}

/// token registry contract trait
#[async_trait]
pub trait TokenRegistry: Send + Sync {
    /// mint a token whose uri is `cid` to the signer, wait for confirmation
    async fn mint(&self, cid: &Cid) -> Result<Confirmation>;

    /// point `token_id` at `cid`, wait for confirmation
    async fn update_token_uri(&self, token_id: U256, cid: &Cid) -> Result<Confirmation>;

    async fn balance_of(&self, owner: Address) -> Result<U256>;

    async fn token_of_owner_by_index(&self, owner: Address, index: U256) -> Result<U256>;

    async fn token_uri(&self, token_id: U256) -> Result<Cid>;
}

/// enumerate every token of `owner` in ascending index order
///
/// sequential: one `tokenOfOwnerByIndex` and one `tokenURI` per token.
pub async fn list_lands(registry: &dyn TokenRegistry, owner: Address) -> Result<Vec<Land>> {
    let balance = registry.balance_of(owner).await?;
    let count = u64::try_from(balance)
        .map_err(|_| Error::RegistryCall(format!("balance {balance} out of range")))?;
    debug!("{} holds {} token(s)", owner, count);

    let mut lands = Vec::new();
    for index in 0..count {
        let token_id = registry.token_of_owner_by_index(owner, U256::from(index)).await?;
        let uri = registry.token_uri(token_id).await?;
        lands.push(Land { token_id, uri });
    }
    Ok(lands)
}

/// pull a human-readable reason out of a node's revert message
///
/// handles geth/anvil (`execution reverted: reason`) and hardhat
/// (`reverted with reason string 'reason'`).
pub fn parse_revert_message(message: &str) -> Option<String> {
    const HARDHAT: &str = "reverted with reason string '";
    if let Some(start) = message.find(HARDHAT) {
        let rest = &message[start + HARDHAT.len()..];
        let reason = rest.split('\'').next().unwrap_or_default();
        return Some(reason.to_string());
    }

    if let Some(start) = message.find("execution reverted") {
        let rest = message[start + "execution reverted".len()..]
            .trim_start_matches(':')
            .trim();
        let rest = rest.strip_prefix("revert:").map(str::trim).unwrap_or(rest);
        return Some(if rest.is_empty() {
            "execution reverted".to_string()
        } else {
            rest.to_string()
        });
    }

    if message.to_ascii_lowercase().contains("revert") {
        return Some(message.to_string());
    }
    None
}

/// map a failed `send()` to a revert (with reason) or a plain call failure
fn send_error(err: alloy::contract::Error) -> Error {
    if let Some(data) = err.as_revert_data() {
        let reason = alloy::sol_types::decode_revert_reason(&data)
            .unwrap_or_else(|| format!("0x{}", hex::encode(&data)));
        return Error::TransactionReverted { reason };
    }
    let message = err.to_string();
    match parse_revert_message(&message) {
        Some(reason) => Error::TransactionReverted { reason },
        None => Error::RegistryCall(message),
    }
}

/// registry on an evm chain reached over json-rpc
pub struct EvmRegistry {
    rpc_url: String,
    contract_address: Address,
    signer: Option<PrivateKeySigner>,
}

impl EvmRegistry {
    /// read-only registry
    pub fn new(rpc_url: impl Into<String>, contract_address: Address) -> Result<Self> {
        let registry = Self {
            rpc_url: rpc_url.into(),
            contract_address,
            signer: None,
        };
        // fail at construction rather than at first call
        registry.provider()?;
        Ok(registry)
    }

    /// registry that can send transactions from `signer`
    pub fn with_signer(mut self, signer: PrivateKeySigner) -> Self {
        self.signer = Some(signer);
        self
    }

    /// fail unless the node serves chain `expected`
    pub async fn check_chain_id(&self, expected: u64) -> Result<()> {
        let actual = self
            .provider()?
            .get_chain_id()
            .await
            .map_err(|e| Error::RegistryCall(format!("chain id: {e}")))?;
        if actual != expected {
            return Err(Error::InvalidConfig {
                name: "CHAIN_ID",
                reason: format!("rpc serves chain {actual}, expected {expected}"),
            });
        }
        Ok(())
    }

    fn provider(&self) -> Result<impl Provider> {
        let rpc_url = self.rpc_url.parse().map_err(|e| Error::InvalidConfig {
            name: "rpc url",
            reason: format!("'{}': {}", self.rpc_url, e),
        })?;
        Ok(ProviderBuilder::new().connect_http(rpc_url))
    }

    fn signing_provider(&self) -> Result<impl Provider> {
        let signer = self.signer.clone().ok_or(Error::NoWalletFound)?;
        let rpc_url = self.rpc_url.parse().map_err(|e| Error::InvalidConfig {
            name: "rpc url",
            reason: format!("'{}': {}", self.rpc_url, e),
        })?;
        Ok(ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(rpc_url))
    }

    async fn confirm(&self, pending: PendingTransactionBuilder<Ethereum>) -> Result<Confirmation> {
        let tx_hash = *pending.tx_hash();
        debug!("tx sent: {}", tx_hash);

        let receipt = pending
            .get_receipt()
            .await
            .map_err(|e| Error::TransactionUnconfirmed(format!("{tx_hash}: {e}")))?;

        if !receipt.status() {
            warn!("tx {} reverted", tx_hash);
            return Err(Error::TransactionReverted {
                reason: format!("transaction {tx_hash} reverted on chain"),
            });
        }

        let token_id = receipt
            .inner
            .logs()
            .iter()
            .filter(|log| log.address() == self.contract_address)
            .find_map(|log| log.log_decode::<LandNFT::Transfer>().ok())
            .map(|log| log.inner.data.tokenId);

        info!("tx {} confirmed in block {:?}", tx_hash, receipt.block_number);
        Ok(Confirmation { tx_hash, token_id })
    }
}

#[async_trait]
impl TokenRegistry for EvmRegistry {
    async fn mint(&self, cid: &Cid) -> Result<Confirmation> {
        let provider = self.signing_provider()?;
        let contract = LandNFT::new(self.contract_address, &provider);

        let pending = contract
            .mintLand(cid.to_string())
            .send()
            .await
            .map_err(send_error)?;

        self.confirm(pending).await
    }

    async fn update_token_uri(&self, token_id: U256, cid: &Cid) -> Result<Confirmation> {
        let provider = self.signing_provider()?;
        let contract = LandNFT::new(self.contract_address, &provider);

        let pending = contract
            .updateTokenURI(token_id, cid.to_string())
            .send()
            .await
            .map_err(send_error)?;

        self.confirm(pending).await
    }

    async fn balance_of(&self, owner: Address) -> Result<U256> {
        let provider = self.provider()?;
        let contract = LandNFT::new(self.contract_address, &provider);
        contract
            .balanceOf(owner)
            .call()
            .await
            .map_err(|e| Error::RegistryCall(e.to_string()))
    }

    async fn token_of_owner_by_index(&self, owner: Address, index: U256) -> Result<U256> {
        let provider = self.provider()?;
        let contract = LandNFT::new(self.contract_address, &provider);
        contract
            .tokenOfOwnerByIndex(owner, index)
            .call()
            .await
            .map_err(|e| Error::RegistryCall(e.to_string()))
    }

    async fn token_uri(&self, token_id: U256) -> Result<Cid> {
        let provider = self.provider()?;
        let contract = LandNFT::new(self.contract_address, &provider);
        contract
            .tokenURI(token_id)
            .call()
            .await
            .map(Cid::new)
            .map_err(|e| Error::RegistryCall(e.to_string()))
    }
}

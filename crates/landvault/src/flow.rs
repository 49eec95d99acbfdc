//! user-triggered actions wired across wallet, auth, storage and registry
//!
//! every action runs one sequential pipeline:
//!
//! ```text
//! Idle -> WalletConnecting -> Authenticating -> Publishing | Decrypting | Transferring
//!      -> Confirming (on-chain writes only) -> Done
//! ```
//!
//! any error moves the flow to `Failed(reason)` and ends the action. the
//! current state is published on a watch channel for front ends.

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use alloy::primitives::{Address, TxHash, U256};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::auth::{self, AuthMode, AuthService, AuthToken};
use crate::config::Config;
use crate::metadata::{DecryptedPayload, LandMetadata, PayloadFormat, SignedPayload};
use crate::registry::{self, Confirmation, Land, TokenRegistry};
use crate::storage::{Cid, EncryptedStorage};
use crate::wallet::{self, signature_hex, Wallet};
use crate::{Error, Result};

/// progress of the running action
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FlowState {
    Idle,
    WalletConnecting,
    Authenticating,
    Publishing,
    Decrypting,
    Transferring,
    Confirming,
    Done,
    Failed(String),
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowState::Idle => f.write_str("idle"),
            FlowState::WalletConnecting => f.write_str("connecting wallet"),
            FlowState::Authenticating => f.write_str("authenticating"),
            FlowState::Publishing => f.write_str("publishing"),
            FlowState::Decrypting => f.write_str("decrypting"),
            FlowState::Transferring => f.write_str("transferring access"),
            FlowState::Confirming => f.write_str("waiting for confirmation"),
            FlowState::Done => f.write_str("done"),
            FlowState::Failed(reason) => write!(f, "failed: {reason}"),
        }
    }
}

/// external collaborators of a flow
#[derive(Clone)]
pub struct Services {
    /// `None` when no wallet is configured
    pub wallet: Option<Arc<dyn Wallet>>,
    pub auth: Arc<dyn AuthService>,
    pub storage: Arc<dyn EncryptedStorage>,
    pub registry: Arc<dyn TokenRegistry>,
}

/// per-flow settings taken from [`Config`]
#[derive(Clone, Debug, Default)]
pub struct FlowSettings {
    pub auth_mode: AuthMode,
    pub api_key: Option<String>,
    pub label: String,
    pub payload_format: PayloadFormat,
}

impl From<&Config> for FlowSettings {
    fn from(config: &Config) -> Self {
        Self {
            auth_mode: config.auth_mode,
            api_key: config.api_key.clone(),
            label: config.label.clone(),
            payload_format: config.payload_format,
        }
    }
}

/// encrypted document stored for `owner`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublishOutcome {
    pub owner: Address,
    pub cid: Cid,
}

impl PublishOutcome {
    pub fn status_line(&self) -> String {
        format!("published {} for {}", self.cid, self.owner)
    }
}

/// token minted with `cid` as its uri
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MintOutcome {
    pub owner: Address,
    pub cid: Cid,
    pub tx_hash: TxHash,
    /// `None` only when neither the receipt nor the registry revealed it
    pub token_id: Option<U256>,
}

impl MintOutcome {
    pub fn status_line(&self) -> String {
        match self.token_id {
            Some(id) => format!("minted token {} with uri {} (tx {})", id, self.cid, self.tx_hash),
            None => format!("minted token with uri {} (tx {})", self.cid, self.tx_hash),
        }
    }
}

/// decrypted content of a cid
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecryptOutcome {
    pub cid: Cid,
    pub payload: DecryptedPayload,
}

impl DecryptOutcome {
    pub fn status_line(&self) -> String {
        format!("decrypted {}", self.cid)
    }
}

/// access to `cid` moved from `from` to `to`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferOutcome {
    pub cid: Cid,
    pub from: Address,
    pub to: Address,
    /// uri re-confirmation, when a token id was given
    pub confirmation: Option<Confirmation>,
}

impl TransferOutcome {
    pub fn status_line(&self) -> String {
        match &self.confirmation {
            Some(c) => format!(
                "access to {} transferred to {} (uri confirmed in tx {})",
                self.cid, self.to, c.tx_hash
            ),
            None => format!("access to {} transferred to {}", self.cid, self.to),
        }
    }
}

/// resolve a transfer target: blank means the caller
pub fn resolve_target(target: &str, caller: Address) -> Result<Address> {
    let target = target.trim();
    if target.is_empty() {
        return Ok(caller);
    }
    target
        .parse()
        .map_err(|e| Error::InvalidTargetAddress(format!("'{target}': {e}")))
}

/// orchestrates the user actions
pub struct Flow {
    services: Services,
    settings: FlowSettings,
    state: watch::Sender<FlowState>,
}

impl Flow {
    pub fn new(services: Services, settings: FlowSettings) -> Self {
        let (state, _) = watch::channel(FlowState::Idle);
        Self {
            services,
            settings,
            state,
        }
    }

    /// follow state changes
    pub fn subscribe(&self) -> watch::Receiver<FlowState> {
        self.state.subscribe()
    }

    pub fn state(&self) -> FlowState {
        self.state.borrow().clone()
    }

    fn set(&self, state: FlowState) {
        debug!("flow: {}", state);
        self.state.send_replace(state);
    }

    /// run one action, settling on `Done` or `Failed`
    async fn track<T>(&self, action: &str, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match fut.await {
            Ok(value) => {
                self.set(FlowState::Done);
                Ok(value)
            }
            Err(e) => {
                error!("{} failed: {}", action, e.status_line());
                self.set(FlowState::Failed(e.to_string()));
                Err(e)
            }
        }
    }

    fn wallet(&self) -> Result<&Arc<dyn Wallet>> {
        self.services.wallet.as_ref().ok_or(Error::NoWalletFound)
    }

    fn api_key(&self) -> Result<&str> {
        self.settings
            .api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .ok_or(Error::MissingConfig("LIGHTHOUSE_API_KEY"))
    }

    async fn connect(&self) -> Result<Address> {
        self.set(FlowState::WalletConnecting);
        let address = wallet::connect(self.services.wallet.as_ref()).await?;
        info!("connected {}", address);
        Ok(address)
    }

    async fn authenticate(&self, address: Address) -> Result<AuthToken> {
        self.set(FlowState::Authenticating);
        let mode = self.settings.auth_mode;
        auth::authenticate(self.wallet()?, &self.services.auth, address, mode).await
    }

    /// payload text uploaded for `metadata`
    async fn payload_text(&self, metadata: &LandMetadata) -> Result<String> {
        match self.settings.payload_format {
            PayloadFormat::Plain => Ok(metadata.to_json()),
            PayloadFormat::Signed => {
                let signature = self.wallet()?.sign_message(&metadata.to_json()).await?;
                let signed = SignedPayload {
                    data: metadata.clone(),
                    signature: signature_hex(&signature),
                };
                Ok(signed.to_json())
            }
        }
    }

    async fn publish_steps(&self, metadata: &LandMetadata) -> Result<PublishOutcome> {
        let api_key = self.api_key()?;
        let owner = self.connect().await?;
        let token = self.authenticate(owner).await?;

        self.set(FlowState::Publishing);
        let text = self.payload_text(metadata).await?;
        let cid = self
            .services
            .storage
            .publish_encrypted(&text, api_key, owner, &token, &self.settings.label)
            .await?;
        info!("published {} for {}", cid, owner);

        Ok(PublishOutcome { owner, cid })
    }

    async fn mint_steps(&self, owner: Address, cid: Cid) -> Result<MintOutcome> {
        self.set(FlowState::Confirming);
        let confirmation = self.services.registry.mint(&cid).await?;

        let token_id = match confirmation.token_id {
            Some(id) => Some(id),
            None => self.latest_token_of(owner).await,
        };
        info!("minted {:?} with uri {}", token_id, cid);

        Ok(MintOutcome {
            owner,
            cid,
            tx_hash: confirmation.tx_hash,
            token_id,
        })
    }

    /// newest token of `owner`: `tokenOfOwnerByIndex(owner, balance - 1)`
    async fn latest_token_of(&self, owner: Address) -> Option<U256> {
        let registry = &self.services.registry;
        let lookup = async {
            let balance = registry.balance_of(owner).await?;
            if balance.is_zero() {
                return Ok(None);
            }
            registry
                .token_of_owner_by_index(owner, balance - U256::from(1))
                .await
                .map(Some)
        };
        match lookup.await {
            Ok(id) => id,
            Err(e) => {
                warn!("could not determine minted token id: {}", e);
                None
            }
        }
    }

    /// encrypt and store `metadata`, returning its cid
    pub async fn publish(&self, metadata: &LandMetadata) -> Result<PublishOutcome> {
        self.track("publish", self.publish_steps(metadata)).await
    }

    /// encrypt and store `metadata`, then mint a token pointing at it
    pub async fn publish_and_mint(&self, metadata: &LandMetadata) -> Result<MintOutcome> {
        self.track("publish and mint", async {
            let published = self.publish_steps(metadata).await?;
            self.mint_steps(published.owner, published.cid).await
        })
        .await
    }

    /// mint a token for an already published cid
    ///
    /// the cid is passed to the registry exactly as given.
    pub async fn mint(&self, cid: &Cid) -> Result<MintOutcome> {
        self.track("mint", async {
            let owner = self.connect().await?;
            self.mint_steps(owner, cid.clone()).await
        })
        .await
    }

    /// tokens owned by `owner`, or by the connected account when `None`
    pub async fn list_lands(&self, owner: Option<Address>) -> Result<Vec<Land>> {
        self.track("list lands", async {
            let owner = match owner {
                Some(owner) => owner,
                None => self.connect().await?,
            };
            let lands = registry::list_lands(self.services.registry.as_ref(), owner).await?;
            info!("{} owns {} land token(s)", owner, lands.len());
            Ok(lands)
        })
        .await
    }

    /// recover the key for `cid`, fetch and decrypt its content
    pub async fn decrypt(&self, cid: &Cid) -> Result<DecryptOutcome> {
        self.track("decrypt", async {
            let owner = self.connect().await?;
            let token = self.authenticate(owner).await?;

            self.set(FlowState::Decrypting);
            let storage = &self.services.storage;
            let key = storage.fetch_decryption_key(cid, owner, &token).await?;
            let plaintext = storage.fetch_and_decrypt(cid, &key).await?;
            let payload = DecryptedPayload::parse(&plaintext)?;

            if let DecryptedPayload::Signed(signed) = &payload {
                match signed.signer() {
                    Ok(signer) => info!("payload signed by {}", signer),
                    Err(e) => warn!("payload signature does not verify: {}", e),
                }
            }

            Ok(DecryptOutcome {
                cid: cid.clone(),
                payload,
            })
        })
        .await
    }

    /// move decryption access of `cid` to `target`, revoking the caller
    ///
    /// a blank target means the caller itself. with `token_id` set, the
    /// token's uri is re-confirmed on chain afterwards.
    pub async fn transfer_access(
        &self,
        cid: &Cid,
        target: &str,
        token_id: Option<U256>,
    ) -> Result<TransferOutcome> {
        self.track("transfer access", async {
            let from = self.connect().await?;
            let to = resolve_target(target, from)?;
            let token = self.authenticate(from).await?;

            self.set(FlowState::Transferring);
            self.services
                .auth
                .reshare_and_revoke(from, cid, to, &token, true)
                .await?;
            info!("access to {} moved from {} to {}", cid, from, to);

            let confirmation = match token_id {
                Some(id) => {
                    self.set(FlowState::Confirming);
                    Some(self.services.registry.update_token_uri(id, cid).await?)
                }
                None => None,
            };

            Ok(TransferOutcome {
                cid: cid.clone(),
                from,
                to,
                confirmation,
            })
        })
        .await
    }
}

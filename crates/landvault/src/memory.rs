//! in-memory backends for testing and demos
//!
//! [`MemoryBackend`] plays the challenge service, the key custody nodes and
//! the storage network at once. it issues real challenges, checks
//! signatures by recovery and seals payloads with real keys, so the flow
//! exercises the same checks it would against the live services.
//! [`MemoryRegistry`] is an erc-721 enumerable ledger.
//!
//! NOT a security boundary - state lives in process memory.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use alloy::primitives::{Address, Signature, TxHash, U256};
use async_trait::async_trait;
use tracing::debug;

use crate::auth::{AuthService, AuthToken, Challenge};
use crate::crypto::{self, random_bytes, FileKey};
use crate::registry::{Confirmation, TokenRegistry};
use crate::storage::{Cid, EncryptedStorage};
use crate::{Error, Result};

const CHALLENGE_PREFIX: &str = "Please sign this message to prove you are owner of this account: ";

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// one stored document
struct StoredFile {
    sealed: Vec<u8>,
    key: FileKey,
    owner: Address,
    /// previous owners kept on a non-revoking transfer
    readers: Vec<Address>,
}

impl StoredFile {
    fn readable_by(&self, address: Address) -> bool {
        self.owner == address || self.readers.contains(&address)
    }
}

#[derive(Default)]
struct BackendState {
    /// latest challenge per address
    challenges: HashMap<Address, String>,
    /// session token -> address
    sessions: HashMap<String, Address>,
    files: HashMap<Cid, StoredFile>,
}

#[derive(Default)]
struct BackendCounters {
    challenges: AtomicUsize,
    publishes: AtomicUsize,
    transfers: AtomicUsize,
}

/// auth service and encrypted storage sharing one in-memory state
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<RwLock<BackendState>>,
    counters: Arc<BackendCounters>,
    fail_challenges: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// make every challenge request fail, as an unreachable service would
    pub fn set_fail_challenges(&self, fail: bool) {
        self.fail_challenges.store(fail, Ordering::SeqCst);
    }

    pub fn challenge_calls(&self) -> usize {
        self.counters.challenges.load(Ordering::SeqCst)
    }

    pub fn publish_calls(&self) -> usize {
        self.counters.publishes.load(Ordering::SeqCst)
    }

    pub fn transfer_calls(&self) -> usize {
        self.counters.transfers.load(Ordering::SeqCst)
    }

    /// current owner of a stored document
    pub fn owner_of(&self, cid: &Cid) -> Option<Address> {
        read(&self.state).files.get(cid).map(|file| file.owner)
    }

    /// check that `token` proves control of `address`
    fn verify(&self, address: Address, token: &AuthToken) -> std::result::Result<(), String> {
        let state = read(&self.state);
        match token {
            AuthToken::Signature(sig) => {
                let challenge = state
                    .challenges
                    .get(&address)
                    .ok_or_else(|| format!("no challenge issued for {address}"))?;
                verify_signature(address, challenge, sig)
            }
            AuthToken::Session(token) => match state.sessions.get(token) {
                Some(owner) if *owner == address => Ok(()),
                Some(_) => Err("session token belongs to another account".into()),
                None => Err("unknown session token".into()),
            },
        }
    }
}

fn verify_signature(
    address: Address,
    message: &str,
    signature: &str,
) -> std::result::Result<(), String> {
    let signature: Signature = signature
        .parse()
        .map_err(|e| format!("malformed signature: {e}"))?;
    let recovered = signature
        .recover_address_from_msg(message.as_bytes())
        .map_err(|e| format!("signature does not recover: {e}"))?;
    if recovered != address {
        return Err(format!("signature is from {recovered}, not {address}"));
    }
    Ok(())
}

#[async_trait]
impl AuthService for MemoryBackend {
    async fn get_auth_challenge(&self, address: Address) -> Result<Challenge> {
        self.counters.challenges.fetch_add(1, Ordering::SeqCst);
        if self.fail_challenges.load(Ordering::SeqCst) {
            return Err(Error::ChallengeUnavailable("{}".into()));
        }

        let message = format!("{CHALLENGE_PREFIX}{}", hex::encode(random_bytes::<16>()));
        write(&self.state).challenges.insert(address, message.clone());
        Ok(Challenge::new(message))
    }

    async fn exchange_for_session_token(
        &self,
        address: Address,
        signature: &str,
    ) -> Result<String> {
        let mut state = write(&self.state);
        let challenge = state
            .challenges
            .get(&address)
            .ok_or_else(|| {
                Error::SessionTokenFailed(format!("no challenge issued for {address}"))
            })?;
        verify_signature(address, challenge, signature).map_err(Error::SessionTokenFailed)?;

        let token = hex::encode(random_bytes::<24>());
        state.sessions.insert(token.clone(), address);
        Ok(token)
    }

    async fn reshare_and_revoke(
        &self,
        address: Address,
        cid: &Cid,
        new_address: Address,
        token: &AuthToken,
        revoke: bool,
    ) -> Result<()> {
        self.counters.transfers.fetch_add(1, Ordering::SeqCst);
        self.verify(address, token).map_err(Error::TransferFailed)?;

        let mut state = write(&self.state);
        let file = state
            .files
            .get_mut(cid)
            .ok_or_else(|| Error::TransferFailed(format!("unknown cid {cid}")))?;
        if file.owner != address {
            return Err(Error::TransferFailed(format!("{address} does not own {cid}")));
        }

        debug!("moving {} from {} to {} (revoke={})", cid, address, new_address, revoke);
        if revoke {
            file.readers.clear();
        } else if !file.readers.contains(&address) {
            file.readers.push(address);
        }
        file.readers.retain(|reader| *reader != new_address);
        file.owner = new_address;
        Ok(())
    }
}

#[async_trait]
impl EncryptedStorage for MemoryBackend {
    async fn publish_encrypted(
        &self,
        text: &str,
        api_key: &str,
        address: Address,
        token: &AuthToken,
        _label: &str,
    ) -> Result<Cid> {
        self.counters.publishes.fetch_add(1, Ordering::SeqCst);
        if api_key.trim().is_empty() {
            return Err(Error::PublishFailed {
                status: Some(401),
                body: "missing api key".into(),
            });
        }
        self.verify(address, token)
            .map_err(|body| Error::PublishFailed {
                status: Some(401),
                body,
            })?;

        let key = FileKey::generate();
        let sealed = crypto::seal(&key, text.as_bytes())?;
        let cid = Cid::new(format!("Qm{}", hex::encode(random_bytes::<22>())));

        let file = StoredFile {
            sealed,
            key,
            owner: address,
            readers: Vec::new(),
        };
        write(&self.state).files.insert(cid.clone(), file);
        Ok(cid)
    }

    async fn fetch_decryption_key(
        &self,
        cid: &Cid,
        address: Address,
        token: &AuthToken,
    ) -> Result<FileKey> {
        self.verify(address, token).map_err(Error::KeyUnavailable)?;

        let state = read(&self.state);
        let file = state
            .files
            .get(cid)
            .ok_or_else(|| Error::KeyUnavailable(format!("no key registered for {cid}")))?;
        if !file.readable_by(address) {
            return Err(Error::KeyUnavailable(format!("{address} has no access to {cid}")));
        }
        Ok(file.key.clone())
    }

    async fn fetch_and_decrypt(&self, cid: &Cid, key: &FileKey) -> Result<Vec<u8>> {
        let state = read(&self.state);
        let file = state
            .files
            .get(cid)
            .ok_or_else(|| Error::DecryptionFailed(format!("{cid} not found")))?;
        crypto::open(key, &file.sealed)
    }
}

#[derive(Default)]
struct Ledger {
    next_id: u64,
    owners: HashMap<U256, Address>,
    uris: HashMap<U256, Cid>,
    /// tokens per owner in enumeration order
    owned: HashMap<Address, Vec<U256>>,
    /// every uri passed to mint, as received
    minted: Vec<Cid>,
}

#[derive(Default)]
struct RegistryFlags {
    mint_calls: AtomicUsize,
    update_calls: AtomicUsize,
    revert_mints: AtomicBool,
    unconfirm_mints: AtomicBool,
    hide_token_ids: AtomicBool,
}

/// erc-721 enumerable ledger, sending from one account
#[derive(Clone)]
pub struct MemoryRegistry {
    sender: Address,
    ledger: Arc<RwLock<Ledger>>,
    flags: Arc<RegistryFlags>,
}

impl MemoryRegistry {
    pub fn new(sender: Address) -> Self {
        Self {
            sender,
            ledger: Arc::new(RwLock::new(Ledger::default())),
            flags: Arc::new(RegistryFlags::default()),
        }
    }

    /// same ledger, transactions sent from `sender`
    pub fn connect(&self, sender: Address) -> Self {
        Self {
            sender,
            ledger: Arc::clone(&self.ledger),
            flags: Arc::clone(&self.flags),
        }
    }

    pub fn mint_calls(&self) -> usize {
        self.flags.mint_calls.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> usize {
        self.flags.update_calls.load(Ordering::SeqCst)
    }

    /// uris passed to mint, in call order
    pub fn minted_uris(&self) -> Vec<Cid> {
        read(&self.ledger).minted.clone()
    }

    /// make every mint revert
    pub fn set_revert_mints(&self, revert: bool) {
        self.flags.revert_mints.store(revert, Ordering::SeqCst);
    }

    /// make every mint time out waiting for its receipt
    pub fn set_unconfirm_mints(&self, unconfirm: bool) {
        self.flags.unconfirm_mints.store(unconfirm, Ordering::SeqCst);
    }

    /// leave token ids out of confirmations, as a receipt without logs would
    pub fn set_hide_token_ids(&self, hide: bool) {
        self.flags.hide_token_ids.store(hide, Ordering::SeqCst);
    }

    fn confirmation(&self, token_id: U256) -> Confirmation {
        let token_id = (!self.flags.hide_token_ids.load(Ordering::SeqCst)).then_some(token_id);
        Confirmation {
            tx_hash: TxHash::from(random_bytes::<32>()),
            token_id,
        }
    }
}

#[async_trait]
impl TokenRegistry for MemoryRegistry {
    async fn mint(&self, cid: &Cid) -> Result<Confirmation> {
        self.flags.mint_calls.fetch_add(1, Ordering::SeqCst);
        if self.flags.revert_mints.load(Ordering::SeqCst) {
            return Err(Error::TransactionReverted {
                reason: "minting paused".into(),
            });
        }
        if self.flags.unconfirm_mints.load(Ordering::SeqCst) {
            let tx_hash = TxHash::from(random_bytes::<32>());
            return Err(Error::TransactionUnconfirmed(format!("no receipt for {tx_hash}")));
        }

        let mut ledger = write(&self.ledger);
        let token_id = U256::from(ledger.next_id);
        ledger.next_id += 1;
        ledger.minted.push(cid.clone());
        ledger.owners.insert(token_id, self.sender);
        ledger.uris.insert(token_id, cid.clone());
        ledger.owned.entry(self.sender).or_default().push(token_id);
        drop(ledger);

        Ok(self.confirmation(token_id))
    }

    async fn update_token_uri(&self, token_id: U256, cid: &Cid) -> Result<Confirmation> {
        self.flags.update_calls.fetch_add(1, Ordering::SeqCst);
        let mut ledger = write(&self.ledger);
        match ledger.owners.get(&token_id) {
            Some(owner) if *owner == self.sender => {}
            Some(_) => {
                return Err(Error::TransactionReverted {
                    reason: "Not token owner".into(),
                })
            }
            None => {
                return Err(Error::TransactionReverted {
                    reason: "ERC721: invalid token ID".into(),
                })
            }
        }
        ledger.uris.insert(token_id, cid.clone());
        drop(ledger);

        Ok(self.confirmation(token_id))
    }

    async fn balance_of(&self, owner: Address) -> Result<U256> {
        let ledger = read(&self.ledger);
        Ok(U256::from(ledger.owned.get(&owner).map_or(0, Vec::len)))
    }

    async fn token_of_owner_by_index(&self, owner: Address, index: U256) -> Result<U256> {
        let ledger = read(&self.ledger);
        usize::try_from(index)
            .ok()
            .and_then(|i| ledger.owned.get(&owner)?.get(i).copied())
            .ok_or_else(|| {
                Error::RegistryCall("ERC721Enumerable: owner index out of bounds".into())
            })
    }

    async fn token_uri(&self, token_id: U256) -> Result<Cid> {
        read(&self.ledger)
            .uris
            .get(&token_id)
            .cloned()
            .ok_or_else(|| Error::RegistryCall("ERC721: invalid token ID".into()))
    }
}

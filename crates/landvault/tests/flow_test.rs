//! end-to-end flow tests against the in-memory backends

use std::sync::{Arc, Mutex, OnceLock};

use alloy::primitives::{Address, Signature, U256};
use async_trait::async_trait;
use landvault::wallet::signature_hex;
use landvault::{
    AuthMode, AuthService, AuthToken, Challenge, Cid, Confirmation, DecryptedPayload,
    EncryptedStorage, Error, ErrorKind, FileKey, Flow, FlowSettings, FlowState, LandMetadata,
    LocalWallet, MemoryBackend, MemoryRegistry, PayloadFormat, Result, Services, TokenRegistry,
    Wallet,
};
use tokio::sync::watch;

struct Harness {
    wallet: LocalWallet,
    backend: MemoryBackend,
    registry: MemoryRegistry,
}

impl Harness {
    fn new() -> Self {
        let wallet = LocalWallet::random();
        let registry = MemoryRegistry::new(wallet.address());
        Self {
            wallet,
            backend: MemoryBackend::new(),
            registry,
        }
    }

    fn flow(&self, mode: AuthMode) -> Flow {
        self.flow_for(&self.wallet, self.registry.clone(), mode, PayloadFormat::Plain)
    }

    fn flow_for(
        &self,
        wallet: &LocalWallet,
        registry: MemoryRegistry,
        mode: AuthMode,
        format: PayloadFormat,
    ) -> Flow {
        let wallet: Arc<dyn Wallet> = Arc::new(wallet.clone());
        let services = Services {
            wallet: Some(wallet),
            auth: Arc::new(self.backend.clone()),
            storage: Arc::new(self.backend.clone()),
            registry: Arc::new(registry),
        };
        Flow::new(services, settings(mode, format))
    }
}

fn settings(mode: AuthMode, format: PayloadFormat) -> FlowSettings {
    FlowSettings {
        auth_mode: mode,
        api_key: Some("test-api-key".into()),
        label: "land-metadata".into(),
        payload_format: format,
    }
}

fn main_st() -> LandMetadata {
    LandMetadata::new(123, "Main St", "Westside", "Metropolis", "CA")
        .with_timestamp(1_700_000_000)
}

/// service calls in order, each with the flow state current at the call
#[derive(Clone, Default)]
struct CallLog {
    state: Arc<OnceLock<watch::Receiver<FlowState>>>,
    calls: Arc<Mutex<Vec<(&'static str, FlowState)>>>,
}

impl CallLog {
    fn attach(&self, flow: &Flow) {
        let _ = self.state.set(flow.subscribe());
    }

    fn record(&self, call: &'static str) {
        let state = self
            .state
            .get()
            .map_or(FlowState::Idle, |rx| rx.borrow().clone());
        self.calls.lock().unwrap().push((call, state));
    }

    fn calls(&self) -> Vec<(&'static str, FlowState)> {
        self.calls.lock().unwrap().clone()
    }
}

/// a service that logs every call before delegating
#[derive(Clone)]
struct Recorded<T> {
    inner: T,
    log: CallLog,
}

impl<T> Recorded<T> {
    fn new(inner: T, log: &CallLog) -> Self {
        Self {
            inner,
            log: log.clone(),
        }
    }
}

#[async_trait]
impl Wallet for Recorded<LocalWallet> {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        self.log.record("request_accounts");
        self.inner.request_accounts().await
    }

    async fn sign_message(&self, message: &str) -> Result<Signature> {
        self.log.record("sign_message");
        self.inner.sign_message(message).await
    }
}

#[async_trait]
impl AuthService for Recorded<MemoryBackend> {
    async fn get_auth_challenge(&self, address: Address) -> Result<Challenge> {
        self.log.record("get_auth_challenge");
        self.inner.get_auth_challenge(address).await
    }

    async fn exchange_for_session_token(
        &self,
        address: Address,
        signature: &str,
    ) -> Result<String> {
        self.log.record("exchange_for_session_token");
        self.inner.exchange_for_session_token(address, signature).await
    }

    async fn reshare_and_revoke(
        &self,
        address: Address,
        cid: &Cid,
        new_address: Address,
        token: &AuthToken,
        revoke: bool,
    ) -> Result<()> {
        self.log.record("reshare_and_revoke");
        self.inner
            .reshare_and_revoke(address, cid, new_address, token, revoke)
            .await
    }
}

#[async_trait]
impl EncryptedStorage for Recorded<MemoryBackend> {
    async fn publish_encrypted(
        &self,
        text: &str,
        api_key: &str,
        address: Address,
        token: &AuthToken,
        label: &str,
    ) -> Result<Cid> {
        self.log.record("publish_encrypted");
        self.inner
            .publish_encrypted(text, api_key, address, token, label)
            .await
    }

    async fn fetch_decryption_key(
        &self,
        cid: &Cid,
        address: Address,
        token: &AuthToken,
    ) -> Result<FileKey> {
        self.log.record("fetch_decryption_key");
        self.inner.fetch_decryption_key(cid, address, token).await
    }

    async fn fetch_and_decrypt(&self, cid: &Cid, key: &FileKey) -> Result<Vec<u8>> {
        self.log.record("fetch_and_decrypt");
        self.inner.fetch_and_decrypt(cid, key).await
    }
}

#[async_trait]
impl TokenRegistry for Recorded<MemoryRegistry> {
    async fn mint(&self, cid: &Cid) -> Result<Confirmation> {
        self.log.record("mint");
        self.inner.mint(cid).await
    }

    async fn update_token_uri(&self, token_id: U256, cid: &Cid) -> Result<Confirmation> {
        self.log.record("update_token_uri");
        self.inner.update_token_uri(token_id, cid).await
    }

    async fn balance_of(&self, owner: Address) -> Result<U256> {
        self.log.record("balance_of");
        self.inner.balance_of(owner).await
    }

    async fn token_of_owner_by_index(&self, owner: Address, index: U256) -> Result<U256> {
        self.log.record("token_of_owner_by_index");
        self.inner.token_of_owner_by_index(owner, index).await
    }

    async fn token_uri(&self, token_id: U256) -> Result<Cid> {
        self.log.record("token_uri");
        self.inner.token_uri(token_id).await
    }
}

#[tokio::test]
async fn test_publish_mint_list_decrypt_scenario() {
    let h = Harness::new();
    let flow = h.flow(AuthMode::Signature);

    let minted = flow.publish_and_mint(&main_st()).await.unwrap();
    assert_eq!(minted.owner, h.wallet.address());
    assert_eq!(minted.token_id, Some(U256::ZERO));
    assert_eq!(flow.state(), FlowState::Done);

    let lands = flow.list_lands(None).await.unwrap();
    assert_eq!(lands.len(), 1);
    assert_eq!(lands[0].token_id, U256::ZERO);
    assert_eq!(lands[0].uri, minted.cid);

    let decrypted = flow.decrypt(&lands[0].uri).await.unwrap();
    assert_eq!(decrypted.payload, DecryptedPayload::Plain(main_st()));
    assert_eq!(
        decrypted.payload.metadata().to_json(),
        concat!(
            r#"{"StreetNumber":123,"StreetName":"Main St","Region":"Westside","#,
            r#""City":"Metropolis","State":"CA","timestamp":1700000000}"#,
        )
    );
}

#[tokio::test]
async fn test_decrypt_after_publish_session_token() {
    let h = Harness::new();
    let flow = h.flow(AuthMode::SessionToken);

    let published = flow.publish(&main_st()).await.unwrap();
    let decrypted = flow.decrypt(&published.cid).await.unwrap();
    assert_eq!(decrypted.payload.metadata(), &main_st());
    assert_eq!(h.registry.mint_calls(), 0);
}

#[tokio::test]
async fn test_signed_payload_recovers_publisher() {
    let h = Harness::new();
    let flow = h.flow_for(
        &h.wallet,
        h.registry.clone(),
        AuthMode::Signature,
        PayloadFormat::Signed,
    );

    let published = flow.publish(&main_st()).await.unwrap();
    let decrypted = flow.decrypt(&published.cid).await.unwrap();
    match decrypted.payload {
        DecryptedPayload::Signed(signed) => {
            assert_eq!(signed.data, main_st());
            assert_eq!(signed.signer().unwrap(), h.wallet.address());
        }
        other => panic!("expected signed payload, got {other:?}"),
    }
}

#[tokio::test]
async fn test_zero_balance_lists_empty() {
    let h = Harness::new();
    let flow = h.flow(AuthMode::Signature);

    assert!(flow.list_lands(None).await.unwrap().is_empty());
    assert!(flow.list_lands(Some(Address::repeat_byte(0x42))).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_lists_in_index_order() {
    let h = Harness::new();
    let flow = h.flow(AuthMode::Signature);

    let first = flow.publish_and_mint(&main_st()).await.unwrap();
    let second = flow
        .publish_and_mint(&LandMetadata::new(9, "Elm St", "Eastside", "Gotham", "NY"))
        .await
        .unwrap();

    let uris: Vec<Cid> = flow.list_lands(None).await.unwrap().into_iter().map(|l| l.uri).collect();
    assert_eq!(uris, vec![first.cid, second.cid]);
}

#[tokio::test]
async fn test_empty_target_defaults_to_caller() {
    let h = Harness::new();
    let flow = h.flow(AuthMode::Signature);
    let published = flow.publish(&main_st()).await.unwrap();

    let outcome = flow.transfer_access(&published.cid, "  ", None).await.unwrap();
    assert_eq!(outcome.to, h.wallet.address());
    assert_eq!(h.backend.owner_of(&published.cid), Some(h.wallet.address()));

    // still decryptable by the caller
    assert!(flow.decrypt(&published.cid).await.is_ok());
}

#[tokio::test]
async fn test_transfer_moves_access_and_reconfirms_uri() {
    let h = Harness::new();
    let alice = h.flow(AuthMode::Signature);
    let minted = alice.publish_and_mint(&main_st()).await.unwrap();

    let bob = LocalWallet::random();
    let outcome = alice
        .transfer_access(&minted.cid, &bob.address().to_string(), minted.token_id)
        .await
        .unwrap();
    assert_eq!(outcome.from, h.wallet.address());
    assert_eq!(outcome.to, bob.address());
    assert!(outcome.confirmation.is_some());
    assert_eq!(h.registry.update_calls(), 1);

    // alice is revoked
    let err = alice.decrypt(&minted.cid).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Decryption);

    let bob_flow = h.flow_for(
        &bob,
        h.registry.connect(bob.address()),
        AuthMode::Signature,
        PayloadFormat::Plain,
    );
    let decrypted = bob_flow.decrypt(&minted.cid).await.unwrap();
    assert_eq!(decrypted.payload.metadata(), &main_st());
}

#[tokio::test]
async fn test_invalid_target_rejected_before_auth() {
    let h = Harness::new();
    let flow = h.flow(AuthMode::Signature);

    let err = flow
        .transfer_access(&Cid::new("QmA"), "not-an-address", None)
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidTargetAddress(_)));
    assert_eq!(h.backend.challenge_calls(), 0);
    assert_eq!(h.backend.transfer_calls(), 0);
}

#[tokio::test]
async fn test_failed_challenge_blocks_everything() {
    let h = Harness::new();
    h.backend.set_fail_challenges(true);
    let flow = h.flow(AuthMode::Signature);

    let err = flow.publish_and_mint(&main_st()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);
    assert!(matches!(flow.state(), FlowState::Failed(_)));

    let err = flow.transfer_access(&Cid::new("QmA"), "", None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Authentication);

    assert_eq!(h.backend.publish_calls(), 0);
    assert_eq!(h.backend.transfer_calls(), 0);
    assert_eq!(h.registry.mint_calls(), 0);
}

#[tokio::test]
async fn test_cids_reach_registry_unmodified() {
    let h = Harness::new();
    let flow = h.flow(AuthMode::Signature);

    flow.mint(&Cid::new("")).await.unwrap();
    flow.mint(&Cid::new("  not a cid ")).await.unwrap();

    assert_eq!(
        h.registry.minted_uris(),
        vec![Cid::new(""), Cid::new("  not a cid ")]
    );
}

#[tokio::test]
async fn test_token_id_falls_back_to_enumeration() {
    let h = Harness::new();
    h.registry.set_hide_token_ids(true);
    let flow = h.flow(AuthMode::Signature);

    flow.mint(&Cid::new("QmA")).await.unwrap();
    let second = flow.mint(&Cid::new("QmB")).await.unwrap();
    assert_eq!(second.token_id, Some(U256::from(1)));
}

#[tokio::test]
async fn test_missing_api_key_fails_before_network() {
    let h = Harness::new();
    let wallet: Arc<dyn Wallet> = Arc::new(h.wallet.clone());
    let services = Services {
        wallet: Some(wallet),
        auth: Arc::new(h.backend.clone()),
        storage: Arc::new(h.backend.clone()),
        registry: Arc::new(h.registry.clone()),
    };
    let flow = Flow::new(services, FlowSettings::default());

    let err = flow.publish_and_mint(&main_st()).await.unwrap_err();
    assert!(matches!(err, Error::MissingConfig("LIGHTHOUSE_API_KEY")));
    assert_eq!(h.backend.challenge_calls(), 0);
    assert_eq!(h.registry.mint_calls(), 0);
}

#[tokio::test]
async fn test_no_wallet() {
    let h = Harness::new();
    let services = Services {
        wallet: None,
        auth: Arc::new(h.backend.clone()),
        storage: Arc::new(h.backend.clone()),
        registry: Arc::new(h.registry.clone()),
    };
    let flow = Flow::new(
        services,
        FlowSettings {
            api_key: Some("k".into()),
            ..Default::default()
        },
    );

    let err = flow.decrypt(&Cid::new("QmA")).await.unwrap_err();
    assert!(matches!(err, Error::NoWalletFound));
    assert_eq!(err.status_line(), "environment error: no wallet found");
    assert_eq!(flow.state(), FlowState::Failed("no wallet found".into()));
}

#[tokio::test]
async fn test_mint_revert_surfaces_reason() {
    let h = Harness::new();
    h.registry.set_revert_mints(true);
    let flow = h.flow(AuthMode::Signature);

    let err = flow.publish_and_mint(&main_st()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Chain);
    assert_eq!(err.status_line(), "chain error: transaction reverted: minting paused");
    // the upload itself happened
    assert_eq!(h.backend.publish_calls(), 1);
}

#[tokio::test]
async fn test_state_transitions_observed() {
    let h = Harness::new();
    let flow = h.flow(AuthMode::Signature);
    let mut rx = flow.subscribe();
    assert_eq!(*rx.borrow_and_update(), FlowState::Idle);

    flow.publish_and_mint(&main_st()).await.unwrap();
    assert!(rx.has_changed().unwrap());
    assert_eq!(*rx.borrow_and_update(), FlowState::Done);
}

#[tokio::test]
async fn test_each_step_runs_in_its_state() {
    let h = Harness::new();
    let log = CallLog::default();
    let wallet: Arc<dyn Wallet> = Arc::new(Recorded::new(h.wallet.clone(), &log));
    let backend = Recorded::new(h.backend.clone(), &log);
    let services = Services {
        wallet: Some(wallet),
        auth: Arc::new(backend.clone()),
        storage: Arc::new(backend),
        registry: Arc::new(Recorded::new(h.registry.clone(), &log)),
    };
    let config = settings(AuthMode::SessionToken, PayloadFormat::Plain);
    let flow = Flow::new(services, config);
    log.attach(&flow);

    flow.publish_and_mint(&main_st()).await.unwrap();
    assert_eq!(
        log.calls(),
        vec![
            ("request_accounts", FlowState::WalletConnecting),
            ("get_auth_challenge", FlowState::Authenticating),
            ("sign_message", FlowState::Authenticating),
            ("exchange_for_session_token", FlowState::Authenticating),
            ("publish_encrypted", FlowState::Publishing),
            ("mint", FlowState::Confirming),
        ]
    );
    assert_eq!(flow.state(), FlowState::Done);
}

#[tokio::test]
async fn test_unconfirmed_mint_reported() {
    let h = Harness::new();
    h.registry.set_unconfirm_mints(true);
    let flow = h.flow(AuthMode::Signature);

    let err = flow.publish_and_mint(&main_st()).await.unwrap_err();
    assert!(matches!(err, Error::TransactionUnconfirmed(_)));
    assert!(err
        .status_line()
        .starts_with("chain error: transaction unconfirmed: no receipt for 0x"));
    assert!(matches!(flow.state(), FlowState::Failed(_)));
    assert!(flow.list_lands(None).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_non_metadata_content_is_malformed() {
    let h = Harness::new();
    let owner = h.wallet.address();
    let challenge = h.backend.get_auth_challenge(owner).await.unwrap();
    let signature = h.wallet.sign_message(challenge.as_str()).await.unwrap();
    let token = AuthToken::Signature(signature_hex(&signature));
    let cid = h
        .backend
        .publish_encrypted(
            "not metadata",
            "test-api-key",
            owner,
            &token,
            "land-metadata",
        )
        .await
        .unwrap();

    let flow = h.flow(AuthMode::Signature);
    let err = flow.decrypt(&cid).await.unwrap_err();
    assert!(matches!(err, Error::MalformedPayload(_)));
    assert_eq!(err.kind(), ErrorKind::Decryption);
    assert!(matches!(flow.state(), FlowState::Failed(_)));
}

//! landctl - encrypted land registry client
//!
//! commands:
//! - mint: encrypt parcel metadata, upload it and mint a token for the cid
//! - publish: encrypt and upload only
//! - lands: list tokens owned by an account
//! - decrypt: recover the key of a cid and print its content
//! - transfer: move decryption access of a cid to another account
//! - demo: run publish -> mint -> list -> decrypt -> transfer in memory

use std::sync::Arc;

use alloy::primitives::{Address, U256};
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;

use landvault::config::{
    Action, DEFAULT_AUTH_URL, DEFAULT_GATEWAY_URL, DEFAULT_LABEL, DEFAULT_RPC_URL,
    DEFAULT_STORAGE_URL,
};
use landvault::{
    AuthMode, Cid, Config, CustodyClient, DecryptedPayload, Endpoints, EvmRegistry, Flow,
    FlowSettings, KavachClient, LandMetadata, LighthouseStorage, LocalWallet, MemoryBackend,
    MemoryRegistry, PayloadFormat, Services, Wallet,
};

#[derive(Parser, Debug)]
#[command(name = "landctl")]
#[command(
    about = "encrypt land metadata, mint it as a token, list, decrypt and transfer access",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// storage service api key
    #[arg(long, env = "LIGHTHOUSE_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// registry contract address
    #[arg(long, env = "LAND_CONTRACT_ADDRESS")]
    contract: Option<String>,

    /// evm json-rpc endpoint
    #[arg(long, env = "RPC_URL", default_value = DEFAULT_RPC_URL)]
    rpc_url: String,

    /// expected chain id of the rpc endpoint
    #[arg(long, env = "CHAIN_ID")]
    chain_id: Option<u64>,

    /// hex private key of the wallet
    #[arg(long, env = "WALLET_PRIVATE_KEY", hide_env_values = true)]
    wallet_key: Option<String>,

    /// challenge and key custody service
    #[arg(long, env = "KAVACH_URL", default_value = DEFAULT_AUTH_URL)]
    auth_url: String,

    /// upload api
    #[arg(long, env = "LIGHTHOUSE_NODE_URL", default_value = DEFAULT_STORAGE_URL)]
    storage_url: String,

    /// ipfs gateway
    #[arg(long, env = "LIGHTHOUSE_GATEWAY_URL", default_value = DEFAULT_GATEWAY_URL)]
    gateway_url: String,

    /// bearer credential: signature or session-token
    #[arg(long, env = "AUTH_MODE", default_value = "signature")]
    auth_mode: AuthMode,

    /// number of custody nodes
    #[arg(long, default_value_t = landvault::vss::SHARD_COUNT)]
    shards: usize,

    /// shards needed to rebuild a key
    #[arg(long, default_value_t = landvault::vss::THRESHOLD)]
    threshold: usize,

    /// upload label
    #[arg(long, default_value = DEFAULT_LABEL)]
    label: String,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// encrypt and upload parcel metadata, then mint a token for it
    Mint(LandArgs),

    /// encrypt and upload parcel metadata without minting
    Publish(LandArgs),

    /// list tokens owned by an account
    Lands {
        /// account to list (defaults to the wallet)
        #[arg(long)]
        owner: Option<String>,
    },

    /// decrypt the content behind a cid
    Decrypt {
        #[arg(long)]
        cid: String,
    },

    /// move decryption access of a cid to another account
    Transfer {
        #[arg(long)]
        cid: String,

        /// recipient (defaults to the wallet itself)
        #[arg(long, default_value = "")]
        to: String,

        /// token whose uri is re-confirmed after the transfer
        #[arg(long)]
        token_id: Option<u64>,
    },

    /// run the full flow against in-memory services
    Demo,
}

#[derive(Args, Debug)]
struct LandArgs {
    #[arg(long)]
    street_number: u64,

    #[arg(long)]
    street_name: String,

    #[arg(long)]
    region: String,

    #[arg(long)]
    city: String,

    #[arg(long)]
    state: String,

    /// upload a {data, signature} envelope signed by the wallet
    #[arg(long)]
    signed: bool,
}

impl Command {
    /// what the command needs from configuration; `None` for the demo
    fn action(&self) -> Option<Action> {
        match self {
            Command::Mint(_) => Some(Action::PublishAndMint),
            Command::Publish(_) => Some(Action::Publish),
            Command::Lands { .. } => Some(Action::ListLands),
            Command::Decrypt { .. } => Some(Action::Decrypt),
            Command::Transfer { .. } => Some(Action::Transfer),
            Command::Demo => None,
        }
    }
}

impl LandArgs {
    fn metadata(&self) -> LandMetadata {
        LandMetadata::new(
            self.street_number,
            &self.street_name,
            &self.region,
            &self.city,
            &self.state,
        )
    }

    fn format(&self) -> PayloadFormat {
        if self.signed {
            PayloadFormat::Signed
        } else {
            PayloadFormat::Plain
        }
    }
}

impl Cli {
    fn config(&self) -> Config {
        Config {
            endpoints: Endpoints {
                auth_url: self.auth_url.clone(),
                storage_url: self.storage_url.clone(),
                gateway_url: self.gateway_url.clone(),
                rpc_url: self.rpc_url.clone(),
            },
            api_key: self.api_key.clone(),
            contract_address: self.contract.clone(),
            chain_id: self.chain_id,
            wallet_key: self.wallet_key.clone(),
            shard_count: self.shards,
            threshold: self.threshold,
            label: self.label.clone(),
            auth_mode: self.auth_mode,
            payload_format: match &self.command {
                Command::Mint(land) | Command::Publish(land) => land.format(),
                _ => PayloadFormat::Plain,
            },
        }
    }
}

/// wire the http services and the evm registry from configuration
async fn live_services(config: &Config, action: Action) -> Result<Services> {
    let wallet = match config.wallet_key() {
        Ok(key) => Some(LocalWallet::from_private_key(key)?),
        // surfaces as NoWalletFound when the action connects
        Err(_) => None,
    };

    let endpoints = &config.endpoints;
    let custody = CustodyClient::new(&endpoints.auth_url, config.shard_count, config.threshold)?;
    let auth = KavachClient::new(&endpoints.auth_url, custody.clone());
    let storage = LighthouseStorage::new(&endpoints.storage_url, &endpoints.gateway_url, custody);

    // publish and decrypt never reach the registry
    let contract = if action.needs_contract() {
        config.contract_address()?
    } else {
        Address::ZERO
    };
    let mut registry = EvmRegistry::new(&endpoints.rpc_url, contract)?;
    if let Some(wallet) = &wallet {
        registry = registry.with_signer(wallet.signer().clone());
    }
    if let (true, Some(chain_id)) = (action.needs_contract(), config.chain_id) {
        registry.check_chain_id(chain_id).await?;
    }

    Ok(Services {
        wallet: wallet.map(|w| Arc::new(w) as Arc<dyn Wallet>),
        auth: Arc::new(auth),
        storage: Arc::new(storage),
        registry: Arc::new(registry),
    })
}

/// log every state change of the running action
fn follow(flow: &Flow) {
    let mut rx = flow.subscribe();
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let state = rx.borrow_and_update().clone();
            info!("{}", state);
        }
    });
}

fn print_payload(payload: &DecryptedPayload) {
    println!("{}", payload.to_json_pretty());
    if let DecryptedPayload::Signed(signed) = payload {
        match signed.signer() {
            Ok(signer) => println!("signed by {signer}"),
            Err(e) => println!("signature invalid: {e}"),
        }
    }
}

async fn run(flow: &Flow, config: &Config, command: &Command) -> landvault::Result<String> {
    match command {
        Command::Mint(land) => {
            let minted = flow.publish_and_mint(&land.metadata()).await?;
            println!("cid: {}", minted.cid);
            Ok(minted.status_line())
        }
        Command::Publish(land) => {
            let published = flow.publish(&land.metadata()).await?;
            println!("cid: {}", published.cid);
            Ok(published.status_line())
        }
        Command::Lands { owner } => {
            let owner = owner
                .as_deref()
                .map(|o| {
                    o.parse::<Address>().map_err(|e| landvault::Error::InvalidConfig {
                        name: "owner",
                        reason: format!("'{o}': {e}"),
                    })
                })
                .transpose()?;
            let lands = flow.list_lands(owner).await?;
            for land in &lands {
                println!("token {}: {}", land.token_id, land.uri);
            }
            Ok(format!("{} land token(s)", lands.len()))
        }
        Command::Decrypt { cid } => {
            let decrypted = flow.decrypt(&Cid::new(cid.as_str())).await?;
            print_payload(&decrypted.payload);
            Ok(decrypted.status_line())
        }
        Command::Transfer { cid, to, token_id } => {
            let outcome = flow
                .transfer_access(&Cid::new(cid.as_str()), to, token_id.map(U256::from))
                .await?;
            Ok(outcome.status_line())
        }
        Command::Demo => demo(config).await,
    }
}

/// publish -> mint -> list -> decrypt -> transfer against in-memory services
async fn demo(config: &Config) -> landvault::Result<String> {
    let alice = LocalWallet::random();
    let bob = LocalWallet::random();
    let backend = MemoryBackend::new();
    let registry = MemoryRegistry::new(alice.address());

    let settings = FlowSettings {
        api_key: Some("demo".into()),
        ..FlowSettings::from(config)
    };
    let flow = Flow::new(
        Services {
            wallet: Some(Arc::new(alice.clone())),
            auth: Arc::new(backend.clone()),
            storage: Arc::new(backend.clone()),
            registry: Arc::new(registry.clone()),
        },
        settings.clone(),
    );
    follow(&flow);

    let metadata = LandMetadata::new(123, "Main St", "Westside", "Metropolis", "CA")
        .with_timestamp(1_700_000_000);
    let minted = flow.publish_and_mint(&metadata).await?;
    println!("{}", minted.status_line());

    for land in flow.list_lands(None).await? {
        println!("token {}: {}", land.token_id, land.uri);
    }

    let decrypted = flow.decrypt(&minted.cid).await?;
    print_payload(&decrypted.payload);

    let transferred = flow
        .transfer_access(&minted.cid, &bob.address().to_string(), minted.token_id)
        .await?;
    println!("{}", transferred.status_line());

    let bob_flow = Flow::new(
        Services {
            wallet: Some(Arc::new(bob.clone())),
            auth: Arc::new(backend.clone()),
            storage: Arc::new(backend),
            registry: Arc::new(registry.connect(bob.address())),
        },
        settings,
    );
    let decrypted = bob_flow.decrypt(&minted.cid).await?;
    Ok(format!("{} decrypted {} after transfer", bob.address(), decrypted.cid))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "landctl=info,landvault=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = cli.config();

    let result = match cli.command.action() {
        None => demo(&config).await,
        Some(action) => {
            if let Err(e) = config.validate_for(action) {
                bail!(e.status_line());
            }
            let services = live_services(&config, action)
                .await
                .context("could not set up services")?;
            let flow = Flow::new(services, FlowSettings::from(&config));
            follow(&flow);
            run(&flow, &config, &cli.command).await
        }
    };

    match result {
        Ok(status) => {
            println!("{status}");
            Ok(())
        }
        Err(e) => bail!(e.status_line()),
    }
}

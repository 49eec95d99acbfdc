//! # landvault
//!
//! encrypted land-parcel metadata, minted as erc-721 tokens whose uri is
//! the cid of the ciphertext.
//!
//! ## architecture
//!
//! ```text
//!   wallet ──sign──▶ challenge ──▶ bearer token
//!                                      │
//!   metadata ──seal──▶ ciphertext ──upload──▶ cid ──mint──▶ token uri
//!      │                                 │
//!      └─ file key ──split 3-of-5──▶ custody nodes 1..5
//! ```
//!
//! decrypting recovers any 3 shards, rebuilds the file key, fetches the
//! ciphertext from the gateway and opens it. transferring access moves
//! every shard to a new owner and revokes the old one.
//!
//! ## usage
//!
//! ```rust,ignore
//! use landvault::{Flow, FlowSettings, LandMetadata, Services};
//!
//! let flow = Flow::new(services, FlowSettings::from(&config));
//! let metadata = LandMetadata::new(123, "Main St", "Westside", "Metropolis", "CA");
//! let minted = flow.publish_and_mint(&metadata).await?;
//! println!("{}", minted.status_line());
//! ```

pub mod auth;
pub mod config;
pub mod crypto;
pub mod custody;
pub mod error;
pub mod flow;
pub mod metadata;
pub mod registry;
pub mod storage;
pub mod vss;
pub mod wallet;

#[cfg(feature = "memory")]
pub mod memory;

pub use auth::{AuthMode, AuthService, AuthToken, Challenge, KavachClient};
pub use config::{Action, Config, Endpoints};
pub use crypto::FileKey;
pub use custody::CustodyClient;
pub use error::{Error, ErrorKind, Result};
pub use flow::{Flow, FlowSettings, FlowState, Services};
pub use metadata::{DecryptedPayload, LandMetadata, PayloadFormat, SignedPayload};
pub use registry::{Confirmation, EvmRegistry, Land, TokenRegistry};
pub use storage::{Cid, EncryptedStorage, LighthouseStorage};
pub use vss::{combine_shares, split_secret, KeyShard};
pub use wallet::{LocalWallet, Wallet};

#[cfg(feature = "memory")]
pub use memory::{MemoryBackend, MemoryRegistry};

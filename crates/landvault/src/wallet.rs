//! wallet connector
//!
//! a wallet hands out the account address and signs text messages
//! (eip-191 personal_sign). the cli backs it with a locally configured
//! private key; tests use the same type with throwaway keys.

use alloy::primitives::{Address, Signature};
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use crate::{Error, Result};

/// wallet provider trait
#[async_trait]
pub trait Wallet: Send + Sync {
    /// request account access, returns authorized addresses
    async fn request_accounts(&self) -> Result<Vec<Address>>;

    /// sign a text message with the active account
    async fn sign_message(&self, message: &str) -> Result<Signature>;
}

/// request account access and return the first authorized address
pub async fn connect(wallet: Option<&Arc<dyn Wallet>>) -> Result<Address> {
    let wallet = wallet.ok_or(Error::NoWalletFound)?;
    let accounts = wallet.request_accounts().await?;
    let address = accounts.first().copied().ok_or(Error::NoWalletFound)?;
    debug!("wallet connected: {}", address);
    Ok(address)
}

/// hex form of a signature as sent to services
pub fn signature_hex(signature: &Signature) -> String {
    format!("0x{}", hex::encode(signature.as_bytes()))
}

/// wallet backed by an in-process private key
#[derive(Clone)]
pub struct LocalWallet {
    signer: PrivateKeySigner,
}

impl LocalWallet {
    /// parse a hex private key (with or without 0x)
    pub fn from_private_key(key: &str) -> Result<Self> {
        let signer = key.trim().parse::<PrivateKeySigner>().map_err(|e| Error::InvalidConfig {
            name: "wallet private key",
            reason: e.to_string(),
        })?;
        Ok(Self { signer })
    }

    /// fresh random key
    pub fn random() -> Self {
        Self {
            signer: PrivateKeySigner::random(),
        }
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// underlying signer, for attaching to an rpc provider
    pub fn signer(&self) -> &PrivateKeySigner {
        &self.signer
    }
}

impl std::fmt::Debug for LocalWallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalWallet")
            .field("address", &self.address())
            .finish()
    }
}

#[async_trait]
impl Wallet for LocalWallet {
    async fn request_accounts(&self) -> Result<Vec<Address>> {
        Ok(vec![self.signer.address()])
    }

    async fn sign_message(&self, message: &str) -> Result<Signature> {
        self.signer
            .sign_message(message.as_bytes())
            .await
            .map_err(|e| Error::SigningFailed(e.to_string()))
    }
}

//! challenge authenticator
//!
//! flow:
//! 1. ask the auth service for a one-time challenge for an address
//! 2. sign it with the wallet
//! 3. depending on [`AuthMode`], use the signature directly as the bearer
//!    credential or exchange it for a session token

use alloy::primitives::Address;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::custody::CustodyClient;
use crate::storage::Cid;
use crate::wallet::{signature_hex, Wallet};
use crate::{Error, Result};

/// one-time challenge text issued for an address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Challenge(String);

impl Challenge {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// how the signed challenge is turned into a bearer credential
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// send the signed challenge itself
    #[default]
    Signature,
    /// exchange the signed challenge for a session token first
    SessionToken,
}

impl std::str::FromStr for AuthMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "signature" => Ok(AuthMode::Signature),
            "session-token" | "jwt" => Ok(AuthMode::SessionToken),
            other => Err(Error::InvalidConfig {
                name: "auth mode",
                reason: format!("unknown mode '{other}', expected signature or session-token"),
            }),
        }
    }
}

/// credential proving control of an account
#[derive(Clone, PartialEq, Eq)]
pub enum AuthToken {
    /// 0x-prefixed signature over a challenge
    Signature(String),
    /// session token issued in exchange for a signature
    Session(String),
}

impl AuthToken {
    /// value sent in the `Authorization: Bearer` header
    pub fn bearer(&self) -> String {
        match self {
            AuthToken::Signature(sig) => sig.clone(),
            AuthToken::Session(token) => format!("jwt:{token}"),
        }
    }
}

impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthToken::Signature(sig) => write!(f, "Signature({}…)", &sig[..sig.len().min(10)]),
            AuthToken::Session(_) => f.write_str("Session(..)"),
        }
    }
}

/// authentication service trait
#[async_trait]
pub trait AuthService: Send + Sync {
    /// request a challenge string for `address`
    async fn get_auth_challenge(&self, address: Address) -> Result<Challenge>;

    /// exchange a signed challenge for a session token
    async fn exchange_for_session_token(&self, address: Address, signature: &str) -> Result<String>;

    /// re-share decryption material of `cid` to `new_address`,
    /// revoking prior recipients when `revoke` is set
    async fn reshare_and_revoke(
        &self,
        address: Address,
        cid: &Cid,
        new_address: Address,
        token: &AuthToken,
        revoke: bool,
    ) -> Result<()>;
}

/// fetch a challenge, sign it, and produce the credential for `mode`
pub async fn authenticate(
    wallet: &Arc<dyn Wallet>,
    auth: &Arc<dyn AuthService>,
    address: Address,
    mode: AuthMode,
) -> Result<AuthToken> {
    let challenge = auth.get_auth_challenge(address).await?;
    debug!("challenge for {}: {}", address, challenge.as_str());

    let signature = signature_hex(&wallet.sign_message(challenge.as_str()).await?);

    match mode {
        AuthMode::Signature => Ok(AuthToken::Signature(signature)),
        AuthMode::SessionToken => {
            let token = auth.exchange_for_session_token(address, &signature).await?;
            info!("session token issued for {}", address);
            Ok(AuthToken::Session(token))
        }
    }
}

/// pull the challenge text out of any of the response shapes the service
/// has used: `[{message}]`, `{message}`, `{data: {message}}`, `{data: [{message}]}`
pub fn parse_challenge(value: &Value) -> Option<String> {
    let message = match value {
        Value::Array(items) => items.first().and_then(parse_challenge),
        Value::Object(map) => match map.get("message") {
            Some(Value::String(message)) => Some(message.clone()),
            _ => map.get("data").and_then(parse_challenge),
        },
        _ => None,
    };
    message.filter(|m| !m.is_empty())
}

#[derive(Debug, Serialize)]
struct SessionTokenRequest<'a> {
    address: String,
    signature: &'a str,
}

#[derive(Debug, Deserialize)]
struct SessionTokenResponse {
    token: Option<String>,
    #[serde(default)]
    error: Option<Value>,
}

/// http client for the challenge / session / custody service
#[derive(Clone, Debug)]
pub struct KavachClient {
    base_url: String,
    http: reqwest::Client,
    custody: CustodyClient,
}

impl KavachClient {
    pub fn new(base_url: impl Into<String>, custody: CustodyClient) -> Self {
        Self::with_http(base_url, custody, reqwest::Client::new())
    }

    pub fn with_http(
        base_url: impl Into<String>,
        custody: CustodyClient,
        http: reqwest::Client,
    ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http,
            custody,
        }
    }
}

#[async_trait]
impl AuthService for KavachClient {
    async fn get_auth_challenge(&self, address: Address) -> Result<Challenge> {
        let resp = self
            .http
            .get(format!("{}/api/message/{}", self.base_url, address))
            .send()
            .await
            .map_err(|e| Error::AuthNetwork(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::AuthNetwork(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::ChallengeUnavailable(format!("http {}: {}", status.as_u16(), body)));
        }

        let value: Value = serde_json::from_str(&body)
            .map_err(|_| Error::ChallengeUnavailable(format!("response is not json: {body}")))?;

        parse_challenge(&value)
            .map(Challenge)
            .ok_or_else(|| Error::ChallengeUnavailable(format!("no message in response: {body}")))
    }

    async fn exchange_for_session_token(
        &self,
        address: Address,
        signature: &str,
    ) -> Result<String> {
        let req = SessionTokenRequest {
            address: address.to_string(),
            signature,
        };
        let resp = self
            .http
            .post(format!("{}/api/message/get-jwt", self.base_url))
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::AuthNetwork(e.to_string()))?;

        let status = resp.status();
        let body = resp.text().await.map_err(|e| Error::AuthNetwork(e.to_string()))?;
        if !status.is_success() {
            return Err(Error::SessionTokenFailed(format!("http {}: {}", status.as_u16(), body)));
        }

        let parsed: SessionTokenResponse = serde_json::from_str(&body)
            .map_err(|e| Error::SessionTokenFailed(format!("{e}: {body}")))?;
        match (parsed.token, parsed.error) {
            (Some(token), None) if !token.is_empty() => Ok(token),
            (_, Some(error)) => Err(Error::SessionTokenFailed(error.to_string())),
            _ => Err(Error::SessionTokenFailed(format!("no token in response: {body}"))),
        }
    }

    async fn reshare_and_revoke(
        &self,
        address: Address,
        cid: &Cid,
        new_address: Address,
        token: &AuthToken,
        revoke: bool,
    ) -> Result<()> {
        self.custody
            .transfer_ownership(address, cid, new_address, token, revoke)
            .await
    }
}

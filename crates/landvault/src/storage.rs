//! encrypted publisher and decryptor
//!
//! publishing:
//! 1. generate a random file key and seal the payload under it
//! 2. upload the ciphertext in one request, receiving a cid
//! 3. split the file key into shards and hand one to each custody node,
//!    bound to (cid, owner) and authorized by the owner's credential
//!
//! decrypting reverses it: recover `threshold` shards, combine, fetch the
//! ciphertext from the gateway and open it.

use alloy::primitives::Address;
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use tracing::{debug, info};

use crate::auth::AuthToken;
use crate::crypto::{self, FileKey};
use crate::custody::CustodyClient;
use crate::vss;
use crate::{Error, Result};

/// content identifier returned by the storage network
///
/// opaque: never validated or normalized client side.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    pub fn new(cid: impl Into<String>) -> Self {
        Self(cid.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Cid {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Cid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// encrypted storage service trait
#[async_trait]
pub trait EncryptedStorage: Send + Sync {
    /// encrypt `text` for `address` and store it, returning its cid
    async fn publish_encrypted(
        &self,
        text: &str,
        api_key: &str,
        address: Address,
        token: &AuthToken,
        label: &str,
    ) -> Result<Cid>;

    /// obtain the decryption key for `cid` as `address`
    async fn fetch_decryption_key(
        &self,
        cid: &Cid,
        address: Address,
        token: &AuthToken,
    ) -> Result<FileKey>;

    /// fetch the stored ciphertext of `cid` and decrypt it
    async fn fetch_and_decrypt(&self, cid: &Cid, key: &FileKey) -> Result<Vec<u8>>;
}

/// pull the cid out of an upload response: `{Hash}`, `{data: {Hash}}`,
/// `{data: [{Hash}]}` or `[{Hash}]`
pub fn parse_upload_hash(value: &Value) -> Option<String> {
    let hash = match value {
        Value::Array(items) => items.first().and_then(parse_upload_hash),
        Value::Object(map) => match map.get("Hash") {
            Some(Value::String(hash)) => Some(hash.clone()),
            _ => map.get("data").and_then(parse_upload_hash),
        },
        _ => None,
    };
    hash.filter(|h| !h.is_empty())
}

/// lighthouse-style storage: ipfs upload api + gateway + key custody
#[derive(Clone, Debug)]
pub struct LighthouseStorage {
    upload_url: String,
    gateway_url: String,
    http: reqwest::Client,
    custody: CustodyClient,
}

impl LighthouseStorage {
    pub fn new(
        upload_url: impl Into<String>,
        gateway_url: impl Into<String>,
        custody: CustodyClient,
    ) -> Self {
        Self::with_http(upload_url, gateway_url, custody, reqwest::Client::new())
    }

    pub fn with_http(
        upload_url: impl Into<String>,
        gateway_url: impl Into<String>,
        custody: CustodyClient,
        http: reqwest::Client,
    ) -> Self {
        Self {
            upload_url: upload_url.into().trim_end_matches('/').to_string(),
            gateway_url: gateway_url.into().trim_end_matches('/').to_string(),
            http,
            custody,
        }
    }

    async fn upload(&self, sealed: Vec<u8>, api_key: &str, label: &str) -> Result<Cid> {
        let part = Part::bytes(sealed)
            .file_name(label.to_string())
            .mime_str("application/octet-stream")
            .map_err(|e| Error::PublishFailed {
                status: None,
                body: e.to_string(),
            })?;
        let form = Form::new().part("file", part);

        let resp = self
            .http
            .post(format!("{}/api/v0/add", self.upload_url))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| Error::PublishFailed {
                status: None,
                body: e.to_string(),
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| Error::PublishFailed {
                status: Some(status.as_u16()),
                body: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(Error::PublishFailed {
                status: Some(status.as_u16()),
                body,
            });
        }

        serde_json::from_str::<Value>(&body)
            .ok()
            .as_ref()
            .and_then(parse_upload_hash)
            .map(Cid)
            .ok_or_else(|| Error::PublishFailed {
                status: Some(status.as_u16()),
                body: format!("no CID returned: {body}"),
            })
    }
}

#[async_trait]
impl EncryptedStorage for LighthouseStorage {
    async fn publish_encrypted(
        &self,
        text: &str,
        api_key: &str,
        address: Address,
        token: &AuthToken,
        label: &str,
    ) -> Result<Cid> {
        let key = FileKey::generate();
        let sealed = crypto::seal(&key, text.as_bytes())?;
        debug!("sealed {} bytes into {} bytes", text.len(), sealed.len());

        let cid = self.upload(sealed, api_key, label).await?;
        info!("uploaded encrypted payload as {}", cid);

        let (threshold, shard_count) = (self.custody.threshold(), self.custody.shard_count());
        let shards = vss::split_secret(key.as_bytes(), threshold, shard_count)?;
        self.custody.save_shards(address, &cid, token, &shards).await?;

        Ok(cid)
    }

    async fn fetch_decryption_key(
        &self,
        cid: &Cid,
        address: Address,
        token: &AuthToken,
    ) -> Result<FileKey> {
        let shards = self.custody.recover_shards(address, cid, token).await?;
        let bytes = vss::combine_shares(&shards, self.custody.threshold())?;
        let bytes: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::KeyUnavailable(format!("recovered key is {} bytes", b.len()))
        })?;
        Ok(FileKey::from_bytes(bytes))
    }

    async fn fetch_and_decrypt(&self, cid: &Cid, key: &FileKey) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(format!("{}/ipfs/{}", self.gateway_url, cid))
            .send()
            .await
            .map_err(|e| Error::DecryptionFailed(format!("gateway unreachable: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::DecryptionFailed(format!(
                "gateway http {}: {}",
                status.as_u16(),
                body
            )));
        }

        let sealed = resp
            .bytes()
            .await
            .map_err(|e| Error::DecryptionFailed(e.to_string()))?;
        debug!("fetched {} bytes for {}", sealed.len(), cid);

        crypto::open(key, &sealed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_upload_hash_shapes() {
        assert_eq!(
            parse_upload_hash(&json!({"Name": "land-metadata", "Hash": "QmA", "Size": "10"})),
            Some("QmA".into())
        );
        assert_eq!(parse_upload_hash(&json!({"data": {"Hash": "QmB"}})), Some("QmB".into()));
        assert_eq!(parse_upload_hash(&json!({"data": [{"Hash": "QmC"}]})), Some("QmC".into()));
        assert_eq!(parse_upload_hash(&json!([{"Hash": "QmD"}])), Some("QmD".into()));
        assert_eq!(parse_upload_hash(&json!({"data": []})), None);
        assert_eq!(parse_upload_hash(&json!({"Hash": ""})), None);
    }

    #[test]
    fn test_cid_is_opaque() {
        let cid = Cid::new("  not a cid  ");
        assert_eq!(cid.as_str(), "  not a cid  ");
        assert_eq!(serde_json::to_string(&cid).unwrap(), "\"  not a cid  \"");
    }
}

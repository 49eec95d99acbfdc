//! http client for the key-shard custody nodes
//!
//! the custody service runs `n` nodes behind one base url
//! (`{base}/api/<op>/{1..=n}`). each node holds one shard of a file key
//! per (cid, owner). one logical call fans out to every node concurrently.

use alloy::primitives::Address;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::auth::AuthToken;
use crate::storage::Cid;
use crate::vss::KeyShard;
use crate::{Error, Result};

/// failure reported by a single node
#[derive(Clone, Debug)]
pub struct NodeFailure {
    pub node: u8,
    pub status: Option<u16>,
    pub body: String,
}

impl std::fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "node {} (http {}): {}", self.node, status, self.body),
            None => write!(f, "node {}: {}", self.node, self.body),
        }
    }
}

fn summarize(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SaveShardRequest {
    pub address: String,
    pub cid: String,
    pub payload: KeyShard,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrieveShardRequest {
    pub address: String,
    pub cid: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetrieveShardResponse {
    pub payload: Option<KeyShard>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferOwnershipRequest {
    pub address: String,
    pub cid: String,
    pub new_owner: String,
    pub reset_shared_to: bool,
}

/// custody client for `shard_count` nodes with reconstruction `threshold`
#[derive(Clone, Debug)]
pub struct CustodyClient {
    base_url: String,
    shard_count: usize,
    threshold: usize,
    http: reqwest::Client,
}

impl CustodyClient {
    pub fn new(base_url: impl Into<String>, shard_count: usize, threshold: usize) -> Result<Self> {
        Self::with_http(base_url, shard_count, threshold, reqwest::Client::new())
    }

    /// share an existing http client
    pub fn with_http(
        base_url: impl Into<String>,
        shard_count: usize,
        threshold: usize,
        http: reqwest::Client,
    ) -> Result<Self> {
        if threshold == 0 || threshold > shard_count || shard_count > 255 {
            return Err(Error::InvalidConfig {
                name: "shard threshold",
                reason: format!(
                    "need 1 <= threshold ({threshold}) <= shards ({shard_count}) <= 255"
                ),
            });
        }
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            shard_count,
            threshold,
            http,
        })
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    pub fn threshold(&self) -> usize {
        self.threshold
    }

    fn node_url(&self, op: &str, node: u8) -> String {
        format!("{}/api/{}/{}", self.base_url, op, node)
    }

    fn nodes(&self) -> impl Iterator<Item = u8> {
        1..=self.shard_count as u8
    }

    /// POST json to one node, returning the response body on success
    async fn post_node<T: Serialize>(
        &self,
        op: &str,
        node: u8,
        token: &AuthToken,
        body: &T,
    ) -> std::result::Result<String, NodeFailure> {
        let resp = self
            .http
            .post(self.node_url(op, node))
            .bearer_auth(token.bearer())
            .json(body)
            .send()
            .await
            .map_err(|e| NodeFailure {
                node,
                status: None,
                body: e.to_string(),
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| NodeFailure {
                node,
                status: Some(status.as_u16()),
                body: e.to_string(),
            })?;

        if !status.is_success() {
            return Err(NodeFailure {
                node,
                status: Some(status.as_u16()),
                body: text,
            });
        }
        Ok(text)
    }

    /// store one shard per node; every node must accept
    pub async fn save_shards(
        &self,
        address: Address,
        cid: &Cid,
        token: &AuthToken,
        shards: &[KeyShard],
    ) -> Result<()> {
        if shards.len() != self.shard_count {
            return Err(Error::EncryptionFailed(format!(
                "expected {} shards, got {}",
                self.shard_count,
                shards.len()
            )));
        }

        let futures: Vec<_> = shards
            .iter()
            .map(|shard| {
                let req = SaveShardRequest {
                    address: address.to_string(),
                    cid: cid.to_string(),
                    payload: shard.clone(),
                };
                async move { self.post_node("setSharedKey", shard.index, token, &req).await }
            })
            .collect();

        let failures: Vec<NodeFailure> = join_all(futures)
            .await
            .into_iter()
            .filter_map(|r| r.err())
            .collect();

        if let Some(first) = failures.first() {
            warn!("{} of {} custody nodes rejected shards", failures.len(), self.shard_count);
            return Err(Error::PublishFailed {
                status: first.status,
                body: summarize(&failures),
            });
        }

        debug!("stored {} shards for {}", self.shard_count, cid);
        Ok(())
    }

    /// collect shards from nodes; need at least `threshold`
    pub async fn recover_shards(
        &self,
        address: Address,
        cid: &Cid,
        token: &AuthToken,
    ) -> Result<Vec<KeyShard>> {
        let req = RetrieveShardRequest {
            address: address.to_string(),
            cid: cid.to_string(),
        };

        let futures: Vec<_> = self
            .nodes()
            .map(|node| {
                let req = &req;
                async move {
                    let text = self.post_node("retrieveSharedKey", node, token, req).await?;
                    let resp: RetrieveShardResponse = serde_json::from_str(&text)
                        .map_err(|e| NodeFailure {
                            node,
                            status: None,
                            body: e.to_string(),
                        })?;
                    match (resp.payload, resp.error) {
                        (Some(shard), _) => Ok(shard),
                        (None, error) => Err(NodeFailure {
                            node,
                            status: None,
                            body: error.unwrap_or_else(|| "no shard returned".into()),
                        }),
                    }
                }
            })
            .collect();

        let mut shards = Vec::new();
        let mut failures = Vec::new();
        for result in join_all(futures).await {
            match result {
                Ok(shard) => shards.push(shard),
                Err(e) => failures.push(e),
            }
        }

        if shards.len() < self.threshold {
            return Err(Error::KeyUnavailable(format!(
                "only {} of {} shards recovered (need {}): {}",
                shards.len(),
                self.shard_count,
                self.threshold,
                summarize(&failures)
            )));
        }

        debug!("recovered {} shards for {}", shards.len(), cid);
        Ok(shards)
    }

    /// move every node's shard to `new_owner`, optionally revoking prior access
    pub async fn transfer_ownership(
        &self,
        address: Address,
        cid: &Cid,
        new_owner: Address,
        token: &AuthToken,
        reset_shared_to: bool,
    ) -> Result<()> {
        let req = TransferOwnershipRequest {
            address: address.to_string(),
            cid: cid.to_string(),
            new_owner: new_owner.to_string(),
            reset_shared_to,
        };

        let futures: Vec<_> = self
            .nodes()
            .map(|node| self.post_node("transferOwnership", node, token, &req))
            .collect();

        let failures: Vec<NodeFailure> = join_all(futures)
            .await
            .into_iter()
            .filter_map(|r| r.err())
            .collect();

        if !failures.is_empty() {
            return Err(Error::TransferFailed(summarize(&failures)));
        }
        Ok(())
    }
}

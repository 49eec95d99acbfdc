//! land parcel metadata and the payloads built from it
//!
//! the record is serialized as compact json with the field names and order
//! used by the published documents, e.g. (wrapped)
//!
//! ```text
//! {"StreetNumber":123,"StreetName":"Main St","Region":"Westside",
//!  "City":"Metropolis","State":"CA","timestamp":1700000000}
//! ```

use alloy::primitives::{Address, Signature};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::{Error, Result};

/// description of one real-world parcel
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LandMetadata {
    #[serde(rename = "StreetNumber")]
    pub street_number: u64,
    #[serde(rename = "StreetName")]
    pub street_name: String,
    #[serde(rename = "Region")]
    pub region: String,
    #[serde(rename = "City")]
    pub city: String,
    #[serde(rename = "State")]
    pub state: String,
    /// unix seconds at submission
    pub timestamp: u64,
}

impl LandMetadata {
    /// record stamped with the current time
    pub fn new(
        street_number: u64,
        street_name: impl Into<String>,
        region: impl Into<String>,
        city: impl Into<String>,
        state: impl Into<String>,
    ) -> Self {
        Self {
            street_number,
            street_name: street_name.into(),
            region: region.into(),
            city: city.into(),
            state: state.into(),
            timestamp: unix_now(),
        }
    }

    pub fn with_timestamp(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn to_json(&self) -> String {
        // a struct of strings and integers cannot fail to serialize
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| Error::MalformedPayload(e.to_string()))
    }
}

/// metadata plus the owner's signature over its json text
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub data: LandMetadata,
    /// 0x-prefixed 65-byte ecdsa signature (eip-191)
    pub signature: String,
}

impl SignedPayload {
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }

    /// recover the address that signed `data`
    pub fn signer(&self) -> Result<Address> {
        let signature: Signature = self
            .signature
            .parse()
            .map_err(|e| Error::MalformedPayload(format!("bad signature: {e}")))?;
        signature
            .recover_address_from_msg(self.data.to_json().as_bytes())
            .map_err(|e| Error::MalformedPayload(format!("signature does not recover: {e}")))
    }
}

/// what gets encrypted and uploaded
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PayloadFormat {
    /// bare metadata json
    #[default]
    Plain,
    /// `{data, signature}` envelope signed by the publishing wallet
    Signed,
}

/// a decrypted document, in whichever form it was published
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DecryptedPayload {
    Signed(SignedPayload),
    Plain(LandMetadata),
}

impl DecryptedPayload {
    /// parse decrypted bytes
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::MalformedPayload(format!("not utf-8: {e}")))?;
        serde_json::from_str(text).map_err(|e| Error::MalformedPayload(e.to_string()))
    }

    pub fn metadata(&self) -> &LandMetadata {
        match self {
            DecryptedPayload::Signed(signed) => &signed.data,
            DecryptedPayload::Plain(metadata) => metadata,
        }
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

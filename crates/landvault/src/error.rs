//! error types for landvault
//!
//! every variant belongs to exactly one [`ErrorKind`]. errors are terminal
//! for the action that raised them; nothing here is retried.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// coarse error taxonomy, one per failing stage of a flow
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// missing wallet or missing configuration
    Environment,
    /// challenge fetch, signing or session exchange
    Authentication,
    /// encryption or upload
    Publish,
    /// transaction revert or confirmation
    Chain,
    /// key fetch, decrypt or parse
    Decryption,
    /// re-share / revoke
    Transfer,
}

impl ErrorKind {
    /// label used as the prefix of a status line
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Environment => "environment error",
            ErrorKind::Authentication => "authentication error",
            ErrorKind::Publish => "publish error",
            ErrorKind::Chain => "chain error",
            ErrorKind::Decryption => "decrypt error",
            ErrorKind::Transfer => "transfer error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    // === environment ===
    #[error("no wallet found")]
    NoWalletFound,

    #[error("missing configuration: {0}")]
    MissingConfig(&'static str),

    #[error("invalid configuration {name}: {reason}")]
    InvalidConfig { name: &'static str, reason: String },

    // === authentication ===
    #[error("auth challenge unavailable: {0}")]
    ChallengeUnavailable(String),

    #[error("signing failed: {0}")]
    SigningFailed(String),

    #[error("session token exchange failed: {0}")]
    SessionTokenFailed(String),

    #[error("auth service unreachable: {0}")]
    AuthNetwork(String),

    // === publish ===
    #[error("publish failed{}: {body}", http_status(.status))]
    PublishFailed { status: Option<u16>, body: String },

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    // === chain ===
    #[error("transaction reverted: {reason}")]
    TransactionReverted { reason: String },

    #[error("transaction unconfirmed: {0}")]
    TransactionUnconfirmed(String),

    #[error("registry call failed: {0}")]
    RegistryCall(String),

    // === decryption ===
    #[error("decryption key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("not enough key shards: have {have}, need {need}")]
    NotEnoughShards { have: usize, need: usize },

    // === transfer ===
    #[error("transfer failed: {0}")]
    TransferFailed(String),

    #[error("invalid target address: {0}")]
    InvalidTargetAddress(String),
}

impl Error {
    /// which stage of the taxonomy this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NoWalletFound | Error::MissingConfig(_) | Error::InvalidConfig { .. } => {
                ErrorKind::Environment
            }
            Error::ChallengeUnavailable(_)
            | Error::SigningFailed(_)
            | Error::SessionTokenFailed(_)
            | Error::AuthNetwork(_) => ErrorKind::Authentication,
            Error::PublishFailed { .. } | Error::EncryptionFailed(_) => ErrorKind::Publish,
            Error::TransactionReverted { .. }
            | Error::TransactionUnconfirmed(_)
            | Error::RegistryCall(_) => ErrorKind::Chain,
            Error::KeyUnavailable(_)
            | Error::DecryptionFailed(_)
            | Error::MalformedPayload(_)
            | Error::NotEnoughShards { .. } => ErrorKind::Decryption,
            Error::TransferFailed(_) | Error::InvalidTargetAddress(_) => ErrorKind::Transfer,
        }
    }

    /// single human-readable line for the end of an action
    pub fn status_line(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }
}

fn http_status(status: &Option<u16>) -> String {
    status.map(|s| format!(" (http {s})")).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_taxonomy() {
        assert_eq!(Error::NoWalletFound.kind(), ErrorKind::Environment);
        assert_eq!(Error::MissingConfig("LIGHTHOUSE_API_KEY").kind(), ErrorKind::Environment);
        assert_eq!(Error::ChallengeUnavailable("{}".into()).kind(), ErrorKind::Authentication);
        assert_eq!(
            Error::PublishFailed {
                status: Some(500),
                body: "boom".into(),
            }
            .kind(),
            ErrorKind::Publish
        );
        assert_eq!(
            Error::TransactionReverted {
                reason: "nope".into(),
            }
            .kind(),
            ErrorKind::Chain
        );
        assert_eq!(Error::MalformedPayload("x".into()).kind(), ErrorKind::Decryption);
        assert_eq!(Error::TransferFailed("x".into()).kind(), ErrorKind::Transfer);
    }

    #[test]
    fn test_status_line() {
        let err = Error::PublishFailed {
            status: Some(401),
            body: "bad api key".into(),
        };
        assert_eq!(err.status_line(), "publish error: publish failed (http 401): bad api key");

        let err = Error::PublishFailed {
            status: None,
            body: "connection refused".into(),
        };
        assert_eq!(err.status_line(), "publish error: publish failed: connection refused");
    }
}

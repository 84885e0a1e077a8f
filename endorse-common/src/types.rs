use crate::crypto;

use std::fmt;

use borsh::{BorshDeserialize, BorshSerialize};

pub type Digest = [u8; 32];

/// Status codes carried by `Status::Failure`, loosely following HTTP.
pub mod status_code {
    pub const SUCCESS: u32 = 200;
    pub const BAD_REQUEST: u32 = 400;
    pub const FORBIDDEN: u32 = 403;
    pub const NOT_FOUND: u32 = 404;
    pub const UNKNOWN_OPERATION: u32 = 405;
    pub const ENDORSEMENT_INVALID: u32 = 412;
    pub const INTERNAL: u32 = 500;
    pub const UNAVAILABLE: u32 = 503;
}

/// Correlation key of a transaction: hex(sha256(nonce || creator)).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, BorshSerialize, BorshDeserialize)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn derive(nonce: &[u8], creator: &[u8]) -> Self {
        Self(hex::encode(crypto::sha256_concat(&[nonce, creator])))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TransactionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum Status {
    Success,
    Failure { code: u32, message: String },
}

impl Status {
    pub fn failure(code: u32, message: impl Into<String>) -> Self {
        Self::Failure {
            code,
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn code(&self) -> u32 {
        match self {
            Self::Success => status_code::SUCCESS,
            Self::Failure { code, .. } => *code,
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success => write!(f, "{}", status_code::SUCCESS),
            Self::Failure { code, message } => write!(f, "{code} {message}"),
        }
    }
}

/// One state change produced by a chaincode execution. `None` deletes the key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct KvWrite {
    pub key: String,
    pub value: Option<Vec<u8>>,
}

/// Outcome of the ledger-side checks run when a block is committed.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum TxValidation {
    Valid,
    Invalid(String),
}

impl TxValidation {
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::Valid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_is_hex_sha256_of_nonce_and_creator() {
        let id = TransactionId::derive(b"nonce", b"creator");
        assert_eq!(id.as_str().len(), 64);
        assert_eq!(id, TransactionId::derive(b"nonce", b"creator"));
        assert_ne!(id, TransactionId::derive(b"nonce2", b"creator"));
    }

    #[test]
    fn status_codes() {
        assert_eq!(Status::Success.code(), status_code::SUCCESS);
        let failed = Status::failure(status_code::NOT_FOUND, "no such key");
        assert!(!failed.is_success());
        assert_eq!(failed.to_string(), "404 no such key");
    }
}

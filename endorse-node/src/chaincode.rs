//! Chaincode execution against a state snapshot.

use crate::kv_store::{Snapshot, WriteBatch};

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use endorse_common::{status_code, KvWrite, ProposalHeader, Status};
use log::debug;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChaincodeError {
    #[error("unknown operation `{0}`")]
    UnknownOperation(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("key `{0}` not found")]
    NotFound(String),
    #[error("chaincode failure: {0}")]
    Internal(String),
}

impl ChaincodeError {
    pub fn status(&self) -> Status {
        let code = match self {
            Self::UnknownOperation(_) => status_code::UNKNOWN_OPERATION,
            Self::InvalidArguments(_) => status_code::BAD_REQUEST,
            Self::NotFound(_) => status_code::NOT_FOUND,
            Self::Internal(_) => status_code::INTERNAL,
        };
        Status::failure(code, self.to_string())
    }
}

/// What a chaincode sees of the proposal and the ledger while it runs.
pub struct ChaincodeStub<'a> {
    header: &'a ProposalHeader,
    transient: &'a BTreeMap<String, Vec<u8>>,
    snapshot: Snapshot,
    writes: WriteBatch,
}

impl<'a> ChaincodeStub<'a> {
    pub fn new(
        header: &'a ProposalHeader,
        transient: &'a BTreeMap<String, Vec<u8>>,
        snapshot: Snapshot,
    ) -> Self {
        Self {
            header,
            transient,
            snapshot,
            writes: WriteBatch::new(),
        }
    }

    pub fn function(&self) -> &str {
        &self.header.function
    }

    pub fn args(&self) -> &[Vec<u8>] {
        &self.header.args
    }

    /// Argument `index` as UTF-8.
    pub fn string_arg(&self, index: usize) -> Result<String, ChaincodeError> {
        let arg = self.header.args.get(index).ok_or_else(|| {
            ChaincodeError::InvalidArguments(format!(
                "{} expects at least {} arguments",
                self.header.function,
                index + 1
            ))
        })?;
        String::from_utf8(arg.clone())
            .map_err(|_| ChaincodeError::InvalidArguments(format!("argument {index} is not UTF-8")))
    }

    pub fn transient(&self, key: &str) -> Option<&[u8]> {
        self.transient.get(key).map(Vec::as_slice)
    }

    /// The client's proposal timestamp: identical on every endorser.
    pub fn tx_timestamp(&self) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(self.header.timestamp_ms)
            .single()
            .unwrap_or_default()
    }

    /// Reads its own writes first, then the snapshot.
    pub fn get_state(&self, key: &str) -> Option<Vec<u8>> {
        match self.writes.pending(key) {
            Some(pending) => pending,
            None => self.snapshot.get(key),
        }
    }

    pub fn put_state(&mut self, key: &str, value: &[u8]) {
        self.writes.set(key, value);
    }

    pub fn del_state(&mut self, key: &str) {
        self.writes.delete(key);
    }

    pub fn into_write_set(self) -> Vec<KvWrite> {
        self.writes.into_write_set()
    }
}

pub trait Chaincode: Send + Sync {
    fn invoke(&self, stub: &mut ChaincodeStub) -> Result<Vec<u8>, ChaincodeError>;
}

#[derive(Serialize)]
struct Value<'a> {
    value: &'a str,
}

fn json_value(value: &str) -> Result<Vec<u8>, ChaincodeError> {
    serde_json::to_vec(&Value { value }).map_err(|e| ChaincodeError::Internal(e.to_string()))
}

/// Transient entry a caller can set to choose the payload `put` answers with.
pub const ECHO_KEY: &str = "result";

/// `put <key>` records when the proposal was made under `key`, `get <key>`
/// reads it back and `del <key>` removes it.
#[derive(Debug, Default, Clone, Copy)]
pub struct DemoChaincode;

impl Chaincode for DemoChaincode {
    fn invoke(&self, stub: &mut ChaincodeStub) -> Result<Vec<u8>, ChaincodeError> {
        debug!("invoke {} {} args", stub.function(), stub.args().len());
        match stub.function() {
            "put" => {
                let key = stub.string_arg(0)?;
                let stamp = stub
                    .tx_timestamp()
                    .to_rfc3339_opts(SecondsFormat::Millis, true);
                stub.put_state(&key, &json_value(&stamp)?);
                match stub.transient(ECHO_KEY) {
                    Some(result) => Ok(result.to_vec()),
                    None => json_value("done!"),
                }
            }
            "del" => {
                let key = stub.string_arg(0)?;
                if stub.get_state(&key).is_none() {
                    return Err(ChaincodeError::NotFound(key));
                }
                stub.del_state(&key);
                json_value("done!")
            }
            "get" => {
                let key = stub.string_arg(0)?;
                stub.get_state(&key).ok_or(ChaincodeError::NotFound(key))
            }
            other => Err(ChaincodeError::UnknownOperation(other.to_string())),
        }
    }
}

pub mod chaincode;
pub mod config;
pub mod devnet;
pub mod events;
pub mod kv_store;
pub mod ledger;
pub mod orderer;
pub mod peer;

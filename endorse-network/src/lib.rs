pub mod client;
pub mod common;
pub mod server;

pub use common::{ServerChannel, ServerEvent};

//! Sync protocol and HTTP-surface value types (spec.md §4.4-4.5): request
//! validation, delta computation, gossip header encoding, and the error
//! taxonomy, expressed independently of any HTTP framework.

pub mod error;
pub mod handler;
pub mod headers;
pub mod types;

pub use error::ProtocolError;
pub use handler::{PayloadFetcher, SyncHandler, SyncHandlerConfig};
pub use types::*;

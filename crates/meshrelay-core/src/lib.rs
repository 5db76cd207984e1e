//! meshrelay Core - Foundational types shared by the relay crates
//!
//! - `RelayError` / `ErrorKind` - Tagged error taxonomy and Result alias
//! - `ContentHash` - SHA-256 digests reported for uploaded artifacts
//! - `RequestId` - Per-request identifier used for scratch isolation and logs

mod error;
mod hash;
mod id;

pub use error::{ErrorKind, RelayError, Result};
pub use hash::ContentHash;
pub use id::RequestId;

pub mod codec;
pub mod error;
pub mod facility;
pub mod loss;
pub mod logging;
pub mod monitor;
pub mod request_id;
pub mod router;
pub mod semantics;
pub mod time;

pub use error::{Error, Result};

/// The default facility set a server starts with when no `--facility` flags
/// are given (§4.3's minimal stand-in for the out-of-scope preloading config).
pub const DEFAULT_FACILITIES: &[&str] = &["RoomA", "RoomB", "LT1"];

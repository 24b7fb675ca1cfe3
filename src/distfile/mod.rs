//! Content-addressed distfile handling.
//!
//! - [`verify`] - BLAKE2b checksum verification
//! - [`fetch`] - cache-or-download with verification before persistence

pub mod fetch;
pub mod verify;

pub use fetch::{ensure, ensure_all, FetchOutcome, HttpTransport, Transport, USER_AGENT};
pub use verify::verify;

//! Common Types
//!
//! Shared error handling for the peg client.

pub mod error;

pub use error::{PegError, Result};

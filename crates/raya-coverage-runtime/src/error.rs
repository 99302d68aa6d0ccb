//! Runtime payload errors
//!
//! These never escape the public entry points: `create_payload` absorbs them
//! and leaves the method without coverage.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("Failed to allocate payload of {length} cells")]
    AllocationFailed { length: usize },

    #[error("Payload length {length} exceeds limit of {limit} cells")]
    TooLarge { length: usize, limit: usize },
}

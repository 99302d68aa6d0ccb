//! Module and method identity
//!
//! A payload is addressed by the module version it was compiled into and the
//! metadata token of the method that owns it.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Metadata table tag carried in the high byte of method tokens
pub const METHOD_TABLE_TAG: u32 = 0x06;

/// Mask selecting the row index of a metadata token
pub const METHOD_INDEX_MASK: u32 = 0x00FF_FFFF;

/// Version identifier of one compiled module
///
/// A fresh compilation (or reload) produces a fresh id; the registry drops every
/// payload recorded under the previous one when it observes a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ModuleId(u128);

impl ModuleId {
    pub const fn new(raw: u128) -> Self {
        Self(raw)
    }

    /// Derive a module id from the module's bytes (first 16 bytes of SHA-256)
    pub fn from_content(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut raw = [0u8; 16];
        raw.copy_from_slice(&digest[..16]);
        Self(u128::from_be_bytes(raw))
    }

    pub const fn as_u128(self) -> u128 {
        self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Metadata token of a compiled method
///
/// Layout is `tag << 24 | row`. Only the row (the method index) is used to
/// order payloads in flush output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MethodToken(u32);

impl MethodToken {
    /// Token for the method at `row` of the method table
    pub const fn method(row: u32) -> Self {
        Self((METHOD_TABLE_TAG << 24) | (row & METHOD_INDEX_MASK))
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Row index used as the registry key
    pub const fn method_index(self) -> u32 {
        self.0 & METHOD_INDEX_MASK
    }

    pub const fn table_tag(self) -> u32 {
        self.0 >> 24
    }
}

impl std::fmt::Display for MethodToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

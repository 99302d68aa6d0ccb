//! Raya Coverage Runtime
//!
//! The process-wide store that instrumented code calls into. Every instrumented
//! method owns one [`PayloadSlot`]; on first use the method calls
//! [`create_payload`], which installs a zeroed [`PayloadArray`] into the slot and
//! indexes it in the [`PayloadRegistry`]. Probes then mark cells directly on the
//! array, and [`flush_payload`] reports and clears every registered array.
//!
//! # Contract
//!
//! Instrumented code is compiled against two entry points with a fixed shape:
//!
//! ```text
//! create_payload(module: ModuleId, token: MethodToken, slot: &PayloadSlot, length: usize)
//! flush_payload()
//! ```
//!
//! Changing either shape requires bumping [`CONTRACT_VERSION`].

#![warn(rust_2018_idioms)]

pub mod error;
pub mod global;
pub mod payload;
pub mod registry;
pub mod report;
pub mod token;

pub use error::PayloadError;
pub use global::{create_payload, flush_payload, registry, CONTRACT_VERSION};
pub use payload::{PayloadArray, PayloadSlot, SlotTable};
pub use registry::{PayloadRegistry, RegistryConfig};
pub use report::{FlushReport, FlushedUnit};
pub use token::{MethodToken, ModuleId, METHOD_INDEX_MASK, METHOD_TABLE_TAG};

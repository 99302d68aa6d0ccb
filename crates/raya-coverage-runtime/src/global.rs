//! Process-wide entry points called by instrumented code

use crate::payload::PayloadSlot;
use crate::registry::PayloadRegistry;
use crate::token::{MethodToken, ModuleId};
use once_cell::sync::Lazy;
use std::io;
use tracing::warn;

/// Version of the `create_payload` / `flush_payload` calling contract
pub const CONTRACT_VERSION: u32 = 1;

static REGISTRY: Lazy<PayloadRegistry> = Lazy::new(PayloadRegistry::new);

/// The process-wide registry
pub fn registry() -> &'static PayloadRegistry {
    &REGISTRY
}

/// Lazily create the payload for `token` in the process-wide registry
pub fn create_payload(module: ModuleId, token: MethodToken, slot: &PayloadSlot, length: usize) {
    REGISTRY.create_payload(module, token, slot, length);
}

/// Report and reset every payload in the process-wide registry to stdout
pub fn flush_payload() {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    if let Err(err) = REGISTRY.flush_to(&mut out) {
        warn!(error = %err, "failed to write coverage flush");
    }
}

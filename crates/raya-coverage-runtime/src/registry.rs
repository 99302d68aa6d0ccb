//! Payload registry
//!
//! Maps the method index of every installed payload to its array, for the
//! module version currently observed. Observing a different module id drops the
//! whole table.

use crate::payload::{PayloadArray, PayloadSlot};
use crate::report::{FlushReport, FlushedUnit};
use crate::token::{MethodToken, ModuleId};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::io::{self, Write};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Registry configuration
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Largest payload (in cells) the registry will allocate. Larger requests
    /// are treated like an allocation failure.
    pub max_payload_len: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            max_payload_len: 1 << 24,
        }
    }
}

#[derive(Debug)]
enum RegistryState {
    /// No module observed yet
    Uninitialized,
    Active {
        module: ModuleId,
        table: BTreeMap<u32, Arc<PayloadArray>>,
    },
}

/// Process-wide store of payload arrays
pub struct PayloadRegistry {
    state: RwLock<RegistryState>,
    config: RegistryConfig,
}

impl PayloadRegistry {
    pub fn new() -> Self {
        Self::with_config(RegistryConfig::default())
    }

    pub fn with_config(config: RegistryConfig) -> Self {
        Self {
            state: RwLock::new(RegistryState::Uninitialized),
            config,
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    /// The module id currently observed, if any
    pub fn module(&self) -> Option<ModuleId> {
        match &*self.state.read() {
            RegistryState::Uninitialized => None,
            RegistryState::Active { module, .. } => Some(*module),
        }
    }

    /// Number of registered payloads
    pub fn len(&self) -> usize {
        match &*self.state.read() {
            RegistryState::Uninitialized => 0,
            RegistryState::Active { table, .. } => table.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered array for `token` under the current module
    pub fn get(&self, token: MethodToken) -> Option<Arc<PayloadArray>> {
        match &*self.state.read() {
            RegistryState::Uninitialized => None,
            RegistryState::Active { table, .. } => table.get(&token.method_index()).cloned(),
        }
    }

    /// Lazily create the payload for one method
    ///
    /// Installs a zeroed array of `length` cells into `slot` unless another
    /// caller already did; every caller ends up sharing the installed array.
    /// Never fails: if the array cannot be allocated the slot stays empty and
    /// the method records no coverage.
    pub fn create_payload(
        &self,
        module: ModuleId,
        token: MethodToken,
        slot: &PayloadSlot,
        length: usize,
    ) {
        self.observe_module(module);

        if slot.get().is_some() {
            return;
        }

        let array = match PayloadArray::try_new(length, self.config.max_payload_len) {
            Ok(array) => Arc::new(array),
            Err(err) => {
                warn!(%token, length, error = %err, "coverage payload not allocated");
                return;
            }
        };

        let (canonical, installed) = slot.install(array);
        if installed {
            self.register(module, token, canonical.clone());
        } else {
            trace!(%token, "lost payload install race");
        }
    }

    /// Drain every registered payload, in increasing method index order
    pub fn flush(&self) -> FlushReport {
        let state = self.state.read();
        let units = match &*state {
            RegistryState::Uninitialized => Vec::new(),
            RegistryState::Active { table, .. } => table
                .iter()
                .map(|(index, array)| FlushedUnit {
                    method_index: *index,
                    hits: array.drain(),
                })
                .collect(),
        };
        trace!(units = units.len(), "flushed coverage payloads");
        FlushReport { units }
    }

    /// Drain every payload and write the textual report to `out`
    pub fn flush_to<W: Write>(&self, out: &mut W) -> io::Result<()> {
        let report = self.flush();
        write!(out, "{}", report)?;
        out.flush()
    }

    fn observe_module(&self, module: ModuleId) {
        if self.module() == Some(module) {
            return;
        }

        let mut state = self.state.write();
        let previous = match &*state {
            RegistryState::Active { module: current, .. } if *current == module => return,
            RegistryState::Active { module: current, .. } => Some(*current),
            RegistryState::Uninitialized => None,
        };
        debug!(%module, ?previous, "coverage registry reset for new module");
        *state = RegistryState::Active {
            module,
            table: BTreeMap::new(),
        };
    }

    fn register(&self, module: ModuleId, token: MethodToken, array: Arc<PayloadArray>) {
        let mut state = self.state.write();
        match &mut *state {
            RegistryState::Active {
                module: current,
                table,
            } if *current == module => {
                table.insert(token.method_index(), array);
            }
            // Another module was observed in between; the payload belongs to a
            // stale module and must not show up in its flushes.
            _ => trace!(%token, %module, "dropping payload of stale module"),
        }
    }
}

impl Default for PayloadRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Per-instance host state reachable from every import call.

use wasmgo_types::{BridgeConfig, BridgeError, ObjectRef};

use crate::console::{Console, StdConsole};
use crate::globals::global_object;
use crate::table::ValueTable;

/// Everything one guest instance's imports read and mutate.
///
/// Owned by the engine store, so only the thread currently executing the
/// guest can touch it.
pub struct HostState {
    pub(crate) table: ValueTable,
    pub(crate) console: Box<dyn Console>,
    fault: Option<BridgeError>,
    pub(crate) wake_pending: bool,
}

impl HostState {
    /// Seed the value table with a fresh global object built from `config`.
    pub fn new(config: &BridgeConfig) -> Self {
        Self::with_console(config, Box::new(StdConsole))
    }

    pub fn with_console(config: &BridgeConfig, console: Box<dyn Console>) -> Self {
        Self {
            table: ValueTable::new(global_object(config)),
            console,
            fault: None,
            wake_pending: false,
        }
    }

    pub fn table(&self) -> &ValueTable {
        &self.table
    }

    pub fn global(&self) -> Option<&ObjectRef> {
        self.table.global()
    }

    /// Record the error that is about to trap the guest.
    ///
    /// Only the first fault is kept; later ones are consequences of the
    /// unwind.
    pub fn set_fault(&mut self, err: BridgeError) {
        if self.fault.is_none() {
            self.fault = Some(err);
        }
    }

    pub fn fault(&self) -> Option<&BridgeError> {
        self.fault.as_ref()
    }

    pub fn take_fault(&mut self) -> Option<BridgeError> {
        self.fault.take()
    }
}

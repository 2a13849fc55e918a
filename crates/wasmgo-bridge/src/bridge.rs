//! One guest instance and its run lifecycle.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info};
use wasmgo_types::{BridgeConfig, BridgeError, BridgeResult, ExitCondition, ObjectRef};
use wasmi::{Instance, Store};

use crate::abi::{EXPORT_MEMORY, EXPORT_SCHEDULER, EXPORT_START};
use crate::console::{Console, StdConsole};
use crate::engine::{self, GuestContext};
use crate::host::HostState;
use crate::inspect::ModuleSummary;
use crate::registry::{BridgeHandle, BridgeRegistry, BridgeState};
use crate::table::ValueTable;

const TARGET: &str = "wasmgo::lifecycle";

/// A guest module instantiated against the host imports.
///
/// The bridge is registered under its configured name for as long as it
/// lives; dropping it unregisters it.
pub struct Bridge {
    name: String,
    registry: BridgeRegistry,
    handle: Arc<BridgeHandle>,
    store: Store<GuestContext>,
    instance: Instance,
    summary: ModuleSummary,
}

impl Bridge {
    /// Load a module from disk. See [`Bridge::from_bytes`].
    pub fn from_file(
        registry: &BridgeRegistry,
        config: &BridgeConfig,
        path: impl AsRef<Path>,
    ) -> BridgeResult<Self> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| BridgeError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_bytes(registry, config, &bytes)
    }

    /// Validate, register, and instantiate a guest whose console output goes
    /// to this process's stdout/stderr.
    pub fn from_bytes(
        registry: &BridgeRegistry,
        config: &BridgeConfig,
        bytes: &[u8],
    ) -> BridgeResult<Self> {
        Self::from_bytes_with_console(registry, config, bytes, Box::new(StdConsole))
    }

    pub fn from_bytes_with_console(
        registry: &BridgeRegistry,
        config: &BridgeConfig,
        bytes: &[u8],
        console: Box<dyn Console>,
    ) -> BridgeResult<Self> {
        let summary = ModuleSummary::parse(bytes)?;
        summary.preflight()?;
        debug!(
            target: TARGET,
            bridge = %config.name,
            digest = %summary.digest,
            size = summary.size,
            "module validated"
        );

        // Registered before instantiation: a start function may already
        // call imports, and those resolve the bridge by name.
        let handle = registry.register(&config.name)?;
        let host = HostState::with_console(config, console);
        let context = GuestContext::new(config.name.clone(), registry.clone(), host);
        let (store, instance) = match engine::instantiate(bytes, context) {
            Ok(parts) => parts,
            Err(err) => {
                registry.unregister(&config.name);
                return Err(err);
            }
        };

        let bridge = Self {
            name: config.name.clone(),
            registry: registry.clone(),
            handle,
            store,
            instance,
            summary,
        };
        bridge
            .handle
            .transition(BridgeState::Created, BridgeState::Initialized)?;
        info!(target: TARGET, bridge = %bridge.name, "bridge initialized");
        Ok(bridge)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The thread-safe half of this bridge; hand it to other threads to
    /// terminate or observe the guest.
    pub fn handle(&self) -> &Arc<BridgeHandle> {
        &self.handle
    }

    pub fn state(&self) -> BridgeState {
        self.handle.state()
    }

    pub fn summary(&self) -> &ModuleSummary {
        &self.summary
    }

    pub fn value_table(&self) -> &ValueTable {
        self.store.data().host.table()
    }

    pub fn global(&self) -> Option<&ObjectRef> {
        self.store.data().host.global()
    }

    /// Current contents of the guest's linear memory.
    pub fn memory(&self) -> BridgeResult<&[u8]> {
        let memory = self
            .instance
            .get_memory(&self.store, EXPORT_MEMORY)
            .ok_or_else(|| BridgeError::Engine("guest memory is gone".to_string()))?;
        Ok(memory.data(&self.store))
    }

    /// Invoke the guest entry point, then block until the guest exits or a
    /// termination signal is delivered to this bridge.
    ///
    /// Returning from `_start` does not end the run: the guest may have
    /// parked itself on a timer. Only an exit condition recorded on the
    /// handle does.
    pub fn run(&mut self) -> BridgeResult<ExitCondition> {
        self.handle
            .transition(BridgeState::Initialized, BridgeState::Running)?;
        info!(target: TARGET, bridge = %self.name, "starting guest");

        let outcome = self.call_export(EXPORT_START);
        if let Err(err) = self.settle(outcome) {
            self.handle.set_state(BridgeState::Terminated);
            return Err(err);
        }
        if self.handle.exit_condition().is_none() {
            debug!(target: TARGET, bridge = %self.name, "entry point returned, waiting for exit");
        }

        let exit = self.handle.wait_for_exit();
        self.handle.set_state(BridgeState::Terminated);
        info!(target: TARGET, bridge = %self.name, %exit, "guest finished");
        Ok(exit)
    }

    /// Drive the guest scheduler until no wake-up is pending.
    pub fn schedule(&mut self) -> BridgeResult<()> {
        match self.handle.state() {
            BridgeState::Initialized | BridgeState::Running => {}
            state => {
                return Err(BridgeError::Registry(format!(
                    "cannot schedule bridge `{}` while {state}",
                    self.name
                )))
            }
        }
        let handle = Arc::clone(&self.handle);
        let Some(_guard) = handle.try_enter_scheduler() else {
            return Err(BridgeError::Registry(format!(
                "scheduler for bridge `{}` is already running",
                self.name
            )));
        };
        loop {
            self.store.data_mut().host.wake_pending = false;
            let outcome = self.call_export(EXPORT_SCHEDULER);
            self.settle(outcome)?;
            if !self.store.data().host.wake_pending || handle.exit_condition().is_some() {
                return Ok(());
            }
        }
    }

    fn call_export(&mut self, name: &str) -> Result<(), wasmi::Error> {
        let func = self
            .instance
            .get_typed_func::<(), ()>(&self.store, name)?;
        func.call(&mut self.store, ())
    }

    /// Turn the outcome of an export call into the bridge's view of it.
    ///
    /// A guest exit or a signal-driven unwind is a normal end; a stashed
    /// import fault or any other trap is an error.
    fn settle(&mut self, outcome: Result<(), wasmi::Error>) -> BridgeResult<()> {
        let Err(err) = outcome else {
            return Ok(());
        };
        match self.store.data_mut().host.take_fault() {
            Some(BridgeError::Terminated(signal)) => {
                debug!(target: TARGET, bridge = %self.name, %signal, "guest unwound");
                Ok(())
            }
            Some(fault) => Err(fault),
            None => match err.i32_exit_status() {
                Some(code) => {
                    self.handle.complete(ExitCondition::Exited(code));
                    Ok(())
                }
                // A nested scheduler pass may have exited the guest already.
                None if self.handle.exit_condition().is_some() => Ok(()),
                None => Err(BridgeError::Engine(err.to_string())),
            },
        }
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        self.registry.unregister(&self.name);
    }
}

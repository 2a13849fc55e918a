//! `wasmi` binding: links the host imports into a guest instance.
//!
//! Each import closure resolves its bridge through the registry (the store
//! data carries only the bridge's name as its context), borrows the guest
//! memory for the duration of the call, and hands both to the matching
//! [`HostState`] method. A failing import stores its [`BridgeError`] as the
//! instance's fault and traps the guest, so the error reaches whoever
//! invoked the export that led here.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, trace, warn};
use wasmgo_types::{BridgeError, BridgeResult, ExitCondition};
use wasmi::{Caller, Engine, Extern, Instance, Linker, Memory, Module, Store};

use crate::abi::{
    EXPORT_MEMORY, EXPORT_SCHEDULER, IMPORT_FD_WRITE, IMPORT_PROC_EXIT, IMPORT_SLEEP_TICKS,
    IMPORT_STRING_VAL, IMPORT_TICKS, IMPORT_VALUE_CALL, IMPORT_VALUE_GET, IMPORT_VALUE_INDEX,
    IMPORT_VALUE_LENGTH, IMPORT_VALUE_LOAD_STRING, IMPORT_VALUE_NEW, IMPORT_VALUE_PREPARE_STRING,
    IMPORT_VALUE_SET, IMPORT_VALUE_SET_INDEX, NS_ENV, NS_WASI,
};
use crate::host::HostState;
use crate::imports::ticks;
use crate::memory::GuestMemory;
use crate::registry::{BridgeHandle, BridgeRegistry};

const TARGET: &str = "wasmgo::bridge";

/// Store data for one guest instance.
pub struct GuestContext {
    name: String,
    registry: BridgeRegistry,
    pub(crate) host: HostState,
    memory: Option<Memory>,
}

impl GuestContext {
    pub fn new(name: impl Into<String>, registry: BridgeRegistry, host: HostState) -> Self {
        Self {
            name: name.into(),
            registry,
            host,
            memory: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &HostState {
        &self.host
    }
}

/// Compile `bytes`, link the host imports, and instantiate the guest.
pub(crate) fn instantiate(
    bytes: &[u8],
    context: GuestContext,
) -> BridgeResult<(Store<GuestContext>, Instance)> {
    let engine = Engine::default();
    let module = Module::new(&engine, bytes).map_err(engine_error)?;
    let mut store = Store::new(&engine, context);
    let mut linker = <Linker<GuestContext>>::new(&engine);
    define_imports(&mut linker)?;

    let instance = linker
        .instantiate(&mut store, &module)
        .and_then(|pre| pre.start(&mut store))
        .map_err(|err| match store.data_mut().host.take_fault() {
            Some(fault) => fault,
            None => engine_error(err),
        })?;

    let memory = instance
        .get_memory(&store, EXPORT_MEMORY)
        .ok_or_else(|| BridgeError::Engine(format!("guest does not export `{EXPORT_MEMORY}`")))?;
    store.data_mut().memory = Some(memory);
    Ok((store, instance))
}

fn engine_error(err: impl std::fmt::Display) -> BridgeError {
    BridgeError::Engine(err.to_string())
}

/// Bind every host import into `linker`.
pub fn define_imports(linker: &mut Linker<GuestContext>) -> BridgeResult<()> {
    linker
        .func_wrap(
            NS_WASI,
            IMPORT_FD_WRITE,
            |mut caller: Caller<'_, GuestContext>,
             fd: i32,
             iovs: i32,
             iovs_len: i32,
             nwritten: i32|
             -> Result<i32, wasmi::Error> {
                with_host(&mut caller, |host, mem| {
                    host.fd_write(mem, fd, iovs, iovs_len, nwritten)
                })
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_WASI,
            IMPORT_PROC_EXIT,
            |mut caller: Caller<'_, GuestContext>, code: i32| -> Result<(), wasmi::Error> {
                trace!(target: "wasmgo::imports", code, "proc_exit");
                match resolve_handle(&caller) {
                    Ok(handle) => handle.complete(ExitCondition::Exited(code)),
                    Err(err) => return Err(trap(&mut caller, err)),
                }
                Err(wasmi::Error::i32_exit(code))
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_TICKS,
            |_: Caller<'_, GuestContext>| -> f64 { ticks() },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_SLEEP_TICKS,
            |mut caller: Caller<'_, GuestContext>, ms: f64| -> Result<(), wasmi::Error> {
                sleep_ticks(&mut caller, ms)
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_STRING_VAL,
            |mut caller: Caller<'_, GuestContext>,
             ret: i32,
             ptr: i32,
             len: i32,
             _ctx: i32,
             _parent: i32|
             -> Result<(), wasmi::Error> {
                with_host(&mut caller, |host, mem| host.string_val(mem, ret, ptr, len))
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_VALUE_GET,
            |mut caller: Caller<'_, GuestContext>,
             ret: i32,
             v: i32,
             p: i32,
             plen: i32,
             _ctx: i32,
             _parent: i32|
             -> Result<(), wasmi::Error> {
                with_host(&mut caller, |host, mem| host.value_get(mem, ret, v, p, plen))
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_VALUE_SET,
            |mut caller: Caller<'_, GuestContext>,
             v: i32,
             p: i32,
             plen: i32,
             x: i32,
             _ctx: i32,
             _parent: i32|
             -> Result<(), wasmi::Error> {
                with_host(&mut caller, |host, mem| host.value_set(mem, v, p, plen, x))
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_VALUE_INDEX,
            |mut caller: Caller<'_, GuestContext>,
             ret: i32,
             v: i32,
             i: i32,
             _ctx: i32,
             _parent: i32|
             -> Result<(), wasmi::Error> {
                with_host(&mut caller, |host, mem| host.value_index(mem, ret, v, i))
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_VALUE_SET_INDEX,
            |mut caller: Caller<'_, GuestContext>,
             v: i32,
             i: i32,
             x: i32,
             _ctx: i32,
             _parent: i32|
             -> Result<(), wasmi::Error> {
                with_host(&mut caller, |host, mem| host.value_set_index(mem, v, i, x))
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_VALUE_CALL,
            |mut caller: Caller<'_, GuestContext>,
             ret: i32,
             v: i32,
             m: i32,
             mlen: i32,
             args: i32,
             alen: i32,
             _acap: i32,
             _ctx: i32,
             _parent: i32|
             -> Result<(), wasmi::Error> {
                with_host(&mut caller, |host, mem| {
                    host.value_call(mem, ret, v, m, mlen, args, alen)
                })
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_VALUE_NEW,
            |mut caller: Caller<'_, GuestContext>,
             ret: i32,
             v: i32,
             args: i32,
             alen: i32,
             _acap: i32,
             _ctx: i32,
             _parent: i32|
             -> Result<(), wasmi::Error> {
                with_host(&mut caller, |host, mem| host.value_new(mem, ret, v, args, alen))
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_VALUE_LENGTH,
            |mut caller: Caller<'_, GuestContext>,
             v: i32,
             _ctx: i32,
             _parent: i32|
             -> Result<i32, wasmi::Error> {
                with_host(&mut caller, |host, mem| host.value_length(mem, v))
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_VALUE_PREPARE_STRING,
            |mut caller: Caller<'_, GuestContext>,
             ret: i32,
             v: i32,
             _ctx: i32,
             _parent: i32|
             -> Result<(), wasmi::Error> {
                with_host(&mut caller, |host, mem| host.value_prepare_string(mem, ret, v))
            },
        )
        .map_err(engine_error)?;

    linker
        .func_wrap(
            NS_ENV,
            IMPORT_VALUE_LOAD_STRING,
            |mut caller: Caller<'_, GuestContext>,
             v: i32,
             dest: i32,
             len: i32,
             _cap: i32,
             _ctx: i32,
             _parent: i32|
             -> Result<(), wasmi::Error> {
                with_host(&mut caller, |host, mem| {
                    host.value_load_string(mem, v, dest, len)
                })
            },
        )
        .map_err(engine_error)?;

    Ok(())
}

fn resolve_handle(caller: &Caller<'_, GuestContext>) -> BridgeResult<Arc<BridgeHandle>> {
    let ctx = caller.data();
    ctx.registry.lookup(&ctx.name).ok_or_else(|| {
        BridgeError::Registry(format!("no bridge registered as `{}`", ctx.name))
    })
}

fn guest_memory(caller: &mut Caller<'_, GuestContext>) -> BridgeResult<Memory> {
    if let Some(memory) = caller.data().memory {
        return Ok(memory);
    }
    // Imports reached from a start function run before instantiate() caches it.
    let memory = caller
        .get_export(EXPORT_MEMORY)
        .and_then(Extern::into_memory)
        .ok_or_else(|| BridgeError::Engine(format!("guest does not export `{EXPORT_MEMORY}`")))?;
    caller.data_mut().memory = Some(memory);
    Ok(memory)
}

/// Stash `err` as the instance's fault and build the trap that unwinds the
/// guest.
fn trap(caller: &mut Caller<'_, GuestContext>, err: BridgeError) -> wasmi::Error {
    let message = err.to_string();
    match &err {
        BridgeError::Terminated(signal) => {
            debug!(target: TARGET, bridge = %caller.data().name, %signal, "unwinding terminated guest");
        }
        _ => warn!(
            target: TARGET,
            bridge = %caller.data().name,
            category = %err.category(),
            error = %err,
            "import failed, trapping guest"
        ),
    }
    caller.data_mut().host.set_fault(err);
    wasmi::Error::new(message)
}

fn host_call<R>(
    caller: &mut Caller<'_, GuestContext>,
    f: impl FnOnce(&mut HostState, &mut GuestMemory<'_>) -> BridgeResult<R>,
) -> BridgeResult<R> {
    resolve_handle(caller)?;
    let memory = guest_memory(caller)?;
    let (data, ctx) = memory.data_and_store_mut(&mut *caller);
    f(&mut ctx.host, &mut GuestMemory::new(data))
}

/// Run an import body against this instance's host state and memory.
fn with_host<R>(
    caller: &mut Caller<'_, GuestContext>,
    f: impl FnOnce(&mut HostState, &mut GuestMemory<'_>) -> BridgeResult<R>,
) -> Result<R, wasmi::Error> {
    host_call(caller, f).map_err(|err| trap(caller, err))
}

/// `runtime.sleepTicks(ms)`: sleep, then drive the guest scheduler.
///
/// Only the outermost sleep on a bridge re-enters `go_scheduler`. A sleep
/// that arrives while that re-entry is in flight just marks a pending wake,
/// and the outer loop runs the scheduler again once the current pass
/// returns.
fn sleep_ticks(caller: &mut Caller<'_, GuestContext>, ms: f64) -> Result<(), wasmi::Error> {
    trace!(target: "wasmgo::imports", ms, "runtime.sleepTicks");
    let handle = resolve_handle(caller).map_err(|err| trap(caller, err))?;
    let delay = Duration::try_from_secs_f64(ms.max(0.0) / 1000.0).map_err(|_| {
        trap(
            caller,
            BridgeError::protocol(format_args!("sleep of {ms} ms"), "duration out of range"),
        )
    })?;
    thread::sleep(delay);

    if let Some(signal) = handle.termination() {
        return Err(trap(caller, BridgeError::Terminated(signal)));
    }

    let Some(_guard) = handle.try_enter_scheduler() else {
        caller.data_mut().host.wake_pending = true;
        return Ok(());
    };
    let scheduler = caller
        .get_export(EXPORT_SCHEDULER)
        .and_then(Extern::into_func)
        .ok_or_else(|| {
            BridgeError::Engine(format!("guest does not export `{EXPORT_SCHEDULER}`"))
        })
        .and_then(|func| func.typed::<(), ()>(&*caller).map_err(engine_error))
        .map_err(|err| trap(caller, err))?;

    loop {
        caller.data_mut().host.wake_pending = false;
        scheduler.call(&mut *caller, ())?;
        if !caller.data().host.wake_pending {
            return Ok(());
        }
    }
}

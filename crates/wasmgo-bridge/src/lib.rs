//! wasmgo host bridge: runs a WebAssembly guest compiled against the
//! `syscall/js` value ABI.
//!
//! # Architecture
//!
//! The guest believes it is talking to a JavaScript host. Every host value
//! it sees is an 8-byte NaN-boxed slot in its own linear memory; the bridge
//! keeps the real values in a per-instance [`ValueTable`] and answers the
//! guest's imports against a small modelled object graph.
//!
//! ## Imports
//! - `wasi_unstable.fd_write(fd, iovs, iovs_len, nwritten) → errno`
//! - `wasi_unstable.proc_exit(code)`
//! - `env.runtime.ticks() → ms`, `env.runtime.sleepTicks(ms)`
//! - `env.syscall/js.{stringVal, valueGet, valueSet, valueIndex,
//!   valueSetIndex, valueCall, valueNew, valueLength, valuePrepareString,
//!   valueLoadString}`
//!
//! ## Exports consumed
//! - `_start`: invoked once by [`Bridge::run`]
//! - `go_scheduler`: re-entered after every `runtime.sleepTicks`
//! - `memory`: linear memory
//!
//! ## Lifecycle
//!
//! `Created → Initialized → Running → Terminated`. A run ends only when the
//! guest exits through `proc_exit` or a termination signal reaches the
//! bridge through its [`BridgeRegistry`] (see [`SignalWatcher`]).

pub mod abi;
pub mod bridge;
pub mod codec;
pub mod console;
pub mod engine;
pub mod globals;
pub mod host;
pub mod imports;
pub mod inspect;
pub mod memory;
pub mod registry;
#[cfg(unix)]
pub mod signals;
pub mod table;

pub use bridge::Bridge;
pub use console::{CapturedConsole, Console, StdConsole};
pub use host::HostState;
pub use inspect::{ExportEntry, ImportEntry, ModuleSummary};
pub use memory::GuestMemory;
pub use registry::{BridgeHandle, BridgeRegistry, BridgeState};
#[cfg(unix)]
pub use signals::SignalWatcher;
pub use table::ValueTable;
pub use wasmgo_types::{
    BridgeConfig, BridgeError, BridgeResult, ErrorCategory, ExitCondition, HostValue,
    TerminationSignal,
};

//! Shared types for the wasmgo host.
//!
//! This crate defines the host-side value space the guest addresses through
//! NaN-boxed handles, the object model those values form, the error taxonomy
//! used across the bridge, and the bridge configuration.

mod config;
mod error;
mod exit;
pub mod value;

pub use config::BridgeConfig;
pub use error::{BridgeError, BridgeResult, ErrorCategory};
pub use exit::{ExitCondition, TerminationSignal};
pub use value::{
    BufferRef, HostValue, IdentityKey, NativeFn, ObjectRef, TypedArrayRef,
};

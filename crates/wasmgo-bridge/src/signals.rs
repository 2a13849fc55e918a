//! Turns process termination signals into bridge terminations.

use std::io;
use std::mem::MaybeUninit;
use std::thread::{self, JoinHandle};

use tracing::{debug, info, warn};
use wasmgo_types::{BridgeError, BridgeResult, TerminationSignal};

use crate::registry::BridgeRegistry;

const TARGET: &str = "wasmgo::lifecycle";

/// A background thread that `sigwait`s for SIGHUP, SIGINT, SIGTERM, and
/// SIGQUIT and forwards each one to every bridge in a registry.
///
/// Install it from the main thread before spawning anything else: the
/// signals are blocked in the installing thread, and only threads created
/// afterwards inherit that mask.
#[derive(Debug)]
pub struct SignalWatcher {
    thread: JoinHandle<()>,
}

impl SignalWatcher {
    pub fn install(registry: BridgeRegistry) -> BridgeResult<Self> {
        let set = termination_set()?;
        // SAFETY: `set` is an initialised signal set; a null old-set pointer
        // is allowed.
        let rc = unsafe { libc::pthread_sigmask(libc::SIG_BLOCK, &set, std::ptr::null_mut()) };
        if rc != 0 {
            return Err(BridgeError::Host(format!(
                "pthread_sigmask failed: {}",
                io::Error::from_raw_os_error(rc)
            )));
        }
        let thread = thread::Builder::new()
            .name("wasmgo-signals".to_string())
            .spawn(move || watch(set, registry))
            .map_err(|e| BridgeError::Host(format!("failed to spawn signal watcher: {e}")))?;
        debug!(target: TARGET, "signal watcher installed");
        Ok(Self { thread })
    }

    pub fn is_running(&self) -> bool {
        !self.thread.is_finished()
    }
}

fn watch(set: libc::sigset_t, registry: BridgeRegistry) {
    loop {
        let mut signo: libc::c_int = 0;
        // SAFETY: both pointers refer to live locals.
        let rc = unsafe { libc::sigwait(&set, &mut signo) };
        if rc != 0 {
            warn!(
                target: TARGET,
                error = %io::Error::from_raw_os_error(rc),
                "sigwait failed, signal watcher stopping"
            );
            return;
        }
        match from_signo(signo) {
            Some(signal) => {
                let reached = registry.terminate_all(signal);
                info!(target: TARGET, %signal, bridges = reached, "termination signal received");
            }
            None => debug!(target: TARGET, signo, "ignoring unexpected signal"),
        }
    }
}

fn termination_set() -> BridgeResult<libc::sigset_t> {
    let mut set = MaybeUninit::<libc::sigset_t>::uninit();
    // SAFETY: sigemptyset initialises the set before any other use.
    unsafe {
        if libc::sigemptyset(set.as_mut_ptr()) != 0 {
            return Err(BridgeError::Host(format!(
                "sigemptyset failed: {}",
                io::Error::last_os_error()
            )));
        }
        for signal in TerminationSignal::ALL {
            if libc::sigaddset(set.as_mut_ptr(), signo(signal)) != 0 {
                return Err(BridgeError::Host(format!(
                    "sigaddset({signal}) failed: {}",
                    io::Error::last_os_error()
                )));
            }
        }
        Ok(set.assume_init())
    }
}

fn signo(signal: TerminationSignal) -> libc::c_int {
    match signal {
        TerminationSignal::Hangup => libc::SIGHUP,
        TerminationSignal::Interrupt => libc::SIGINT,
        TerminationSignal::Terminate => libc::SIGTERM,
        TerminationSignal::Quit => libc::SIGQUIT,
    }
}

fn from_signo(signo: libc::c_int) -> Option<TerminationSignal> {
    TerminationSignal::ALL
        .into_iter()
        .find(|signal| self::signo(*signal) == signo)
}

//! Name → bridge lookup shared between the engine binding, the signal
//! watcher, and whoever owns the bridges.
//!
//! The registry only holds the thread-safe half of a bridge (its
//! [`BridgeHandle`]): lifecycle state, the recorded exit condition, and the
//! scheduler guard. Guest values never leave the thread running the guest.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};
use wasmgo_types::{BridgeError, BridgeResult, ExitCondition, TerminationSignal};

const TARGET: &str = "wasmgo::lifecycle";

/// Where a bridge is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Registered; the guest is not instantiated yet.
    Created,
    /// Imports bound, guest instantiated, reserved values seeded.
    Initialized,
    /// The entry point has been invoked.
    Running,
    /// An exit condition was reported.
    Terminated,
}

impl fmt::Display for BridgeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Created => "created",
            Self::Initialized => "initialized",
            Self::Running => "running",
            Self::Terminated => "terminated",
        };
        f.write_str(text)
    }
}

#[derive(Debug)]
struct Lifecycle {
    state: BridgeState,
    exit: Option<ExitCondition>,
}

/// Shared, thread-safe view of one bridge.
#[derive(Debug)]
pub struct BridgeHandle {
    name: String,
    lifecycle: Mutex<Lifecycle>,
    exited: Condvar,
    scheduler_busy: AtomicBool,
}

impl BridgeHandle {
    fn new(name: String) -> Self {
        Self {
            name,
            lifecycle: Mutex::new(Lifecycle {
                state: BridgeState::Created,
                exit: None,
            }),
            exited: Condvar::new(),
            scheduler_busy: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> BridgeState {
        self.lock().state
    }

    /// Move from `from` to `to`, failing if the bridge is elsewhere.
    pub fn transition(&self, from: BridgeState, to: BridgeState) -> BridgeResult<()> {
        let mut life = self.lock();
        if life.state != from {
            return Err(BridgeError::Registry(format!(
                "bridge `{}` is {}, expected {from}",
                self.name, life.state
            )));
        }
        life.state = to;
        debug!(target: TARGET, bridge = %self.name, %from, %to, "state transition");
        Ok(())
    }

    pub(crate) fn set_state(&self, to: BridgeState) {
        self.lock().state = to;
    }

    /// Record a termination signal. The first exit condition recorded wins.
    pub fn terminate(&self, signal: TerminationSignal) {
        if self.record(ExitCondition::Signal(signal)) {
            info!(target: TARGET, bridge = %self.name, %signal, "termination requested");
        }
    }

    /// Record the guest's own exit.
    pub fn complete(&self, exit: ExitCondition) {
        if self.record(exit) {
            info!(target: TARGET, bridge = %self.name, %exit, "guest completed");
        }
    }

    fn record(&self, exit: ExitCondition) -> bool {
        let mut life = self.lock();
        if life.exit.is_some() {
            return false;
        }
        life.exit = Some(exit);
        self.exited.notify_all();
        true
    }

    pub fn exit_condition(&self) -> Option<ExitCondition> {
        self.lock().exit
    }

    /// The signal that ended this bridge, if one did.
    pub fn termination(&self) -> Option<TerminationSignal> {
        match self.lock().exit {
            Some(ExitCondition::Signal(signal)) => Some(signal),
            _ => None,
        }
    }

    /// Block until an exit condition is recorded.
    pub fn wait_for_exit(&self) -> ExitCondition {
        let mut life = self.lock();
        loop {
            if let Some(exit) = life.exit {
                return exit;
            }
            life = self
                .exited
                .wait(life)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Like [`wait_for_exit`](Self::wait_for_exit), giving up after `timeout`.
    pub fn wait_for_exit_timeout(&self, timeout: Duration) -> Option<ExitCondition> {
        let deadline = Instant::now() + timeout;
        let mut life = self.lock();
        loop {
            if let Some(exit) = life.exit {
                return Some(exit);
            }
            let remaining = deadline.checked_duration_since(Instant::now())?;
            life = self
                .exited
                .wait_timeout(life, remaining)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Claim the scheduler for this bridge. `None` when a re-entry is
    /// already in flight.
    pub fn try_enter_scheduler(&self) -> Option<SchedulerGuard<'_>> {
        self.scheduler_busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| SchedulerGuard { handle: self })
    }
}

/// Releases the scheduler claim on drop.
#[derive(Debug)]
pub struct SchedulerGuard<'a> {
    handle: &'a BridgeHandle,
}

impl Drop for SchedulerGuard<'_> {
    fn drop(&mut self) {
        self.handle.scheduler_busy.store(false, Ordering::Release);
    }
}

/// Cloneable registry of live bridges keyed by name.
#[derive(Debug, Clone, Default)]
pub struct BridgeRegistry {
    inner: Arc<RwLock<HashMap<String, Arc<BridgeHandle>>>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a bridge under `name`. Names are unique among live bridges.
    pub fn register(&self, name: &str) -> BridgeResult<Arc<BridgeHandle>> {
        let mut map = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if map.contains_key(name) {
            return Err(BridgeError::Registry(format!(
                "a bridge named `{name}` is already registered"
            )));
        }
        let handle = Arc::new(BridgeHandle::new(name.to_string()));
        map.insert(name.to_string(), Arc::clone(&handle));
        debug!(target: TARGET, bridge = name, "registered");
        Ok(handle)
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<BridgeHandle>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn unregister(&self, name: &str) -> Option<Arc<BridgeHandle>> {
        let removed = self
            .inner
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        if removed.is_some() {
            debug!(target: TARGET, bridge = name, "unregistered");
        }
        removed
    }

    /// Names of all live bridges, sorted.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `signal` to every live bridge; returns how many were reached.
    pub fn terminate_all(&self, signal: TerminationSignal) -> usize {
        let handles: Vec<Arc<BridgeHandle>> = self
            .inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for handle in &handles {
            handle.terminate(signal);
        }
        handles.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn duplicate_names_are_rejected() {
        let registry = BridgeRegistry::new();
        registry.register("main").unwrap();
        let err = registry.register("main").unwrap_err();
        assert!(matches!(err, BridgeError::Registry(_)));
        registry.unregister("main");
        assert!(registry.register("main").is_ok());
    }

    #[test]
    fn lookup_finds_registered_handle() {
        let registry = BridgeRegistry::new();
        let handle = registry.register("a").unwrap();
        registry.register("b").unwrap();
        assert!(Arc::ptr_eq(&registry.lookup("a").unwrap(), &handle));
        assert!(registry.lookup("c").is_none());
        assert_eq!(registry.names(), vec!["a", "b"]);
    }

    #[test]
    fn first_exit_condition_wins() {
        let registry = BridgeRegistry::new();
        let handle = registry.register("main").unwrap();
        handle.complete(ExitCondition::Exited(0));
        handle.terminate(TerminationSignal::Terminate);
        assert_eq!(handle.exit_condition(), Some(ExitCondition::Exited(0)));
        assert_eq!(handle.termination(), None);
    }

    #[test]
    fn transitions_are_checked() {
        let registry = BridgeRegistry::new();
        let handle = registry.register("main").unwrap();
        assert_eq!(handle.state(), BridgeState::Created);
        assert!(handle
            .transition(BridgeState::Initialized, BridgeState::Running)
            .is_err());
        handle
            .transition(BridgeState::Created, BridgeState::Initialized)
            .unwrap();
        assert_eq!(handle.state(), BridgeState::Initialized);
    }

    #[test]
    fn wait_blocks_until_signal() {
        let registry = BridgeRegistry::new();
        let handle = registry.register("main").unwrap();
        assert_eq!(handle.wait_for_exit_timeout(Duration::from_millis(10)), None);

        let remote = registry.clone();
        let started = Instant::now();
        let waker = thread::spawn(move || {
            thread::sleep(Duration::from_millis(30));
            remote.terminate_all(TerminationSignal::Hangup)
        });
        let exit = handle.wait_for_exit();
        assert!(started.elapsed() >= Duration::from_millis(30));
        assert_eq!(exit, ExitCondition::Signal(TerminationSignal::Hangup));
        assert_eq!(waker.join().unwrap(), 1);
    }

    #[test]
    fn scheduler_guard_is_exclusive() {
        let registry = BridgeRegistry::new();
        let handle = registry.register("main").unwrap();
        let guard = handle.try_enter_scheduler().unwrap();
        assert!(handle.try_enter_scheduler().is_none());
        drop(guard);
        assert!(handle.try_enter_scheduler().is_some());
    }
}

//! End-to-end tests: hand-assembled guests run through the wasmi binding.
//!
//! Each guest drives the host through the same import sequence a real
//! `syscall/js` program uses at startup, then leaves through `proc_exit` or
//! waits for a termination delivered from another thread.

mod common;

use std::thread;
use std::time::{Duration, Instant};

use common::{copy_slot, exit_with, f64_at, js_call, memarg, slot_at, u32_at, Guest, GLOBAL_SLOT};
use wasm_encoder::{BlockType, Instruction};
use wasmgo_bridge::abi::RESERVED_IDS;
use wasmgo_bridge::codec::decode;
use wasmgo_bridge::{
    Bridge, BridgeConfig, BridgeError, BridgeRegistry, BridgeState, CapturedConsole,
    ExitCondition, HostValue, TerminationSignal,
};

// ══════════════════════════════════════════════════════════════════════════════
// Helpers
// ══════════════════════════════════════════════════════════════════════════════

fn config(name: &str) -> BridgeConfig {
    BridgeConfig {
        name: name.to_string(),
        user_agent: "wasmgo-test/1.0".to_string(),
        cookie: "session=abc".to_string(),
    }
}

fn load(registry: &BridgeRegistry, name: &str, wasm: &[u8]) -> (Bridge, CapturedConsole) {
    let console = CapturedConsole::new();
    let bridge = Bridge::from_bytes_with_console(
        registry,
        &config(name),
        wasm,
        Box::new(console.clone()),
    )
    .unwrap_or_else(|e| panic!("failed to load guest: {e}"));
    (bridge, console)
}

/// A guest whose entry point and scheduler do nothing.
fn idle_guest() -> Vec<u8> {
    Guest::new().finish()
}

// ══════════════════════════════════════════════════════════════════════════════
// Initialization
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn reserved_slots_are_seeded_before_any_guest_call() {
    let registry = BridgeRegistry::new();
    let (bridge, _) = load(&registry, "seeded", &idle_guest());
    assert_eq!(bridge.state(), BridgeState::Initialized);

    let table = bridge.value_table();
    assert_eq!(table.len(), RESERVED_IDS as usize);
    assert!(matches!(table.get(0).unwrap(), HostValue::Number(n) if n.is_nan()));
    assert_eq!(table.get(1).unwrap(), &HostValue::Number(0.0));
    assert_eq!(table.get(2).unwrap(), &HostValue::Null);
    assert_eq!(table.get(3).unwrap(), &HostValue::Boolean(true));
    assert_eq!(table.get(4).unwrap(), &HostValue::Boolean(false));
    let global = decode(table, GLOBAL_SLOT).unwrap();
    assert!(global.as_object().unwrap().contains("navigator"));
}

#[test]
fn bridge_registers_and_unregisters_by_name() {
    let registry = BridgeRegistry::new();
    let (bridge, _) = load(&registry, "dup", &idle_guest());
    assert_eq!(registry.names(), vec!["dup"]);

    let err = Bridge::from_bytes(&registry, &config("dup"), &idle_guest()).err();
    assert!(matches!(err, Some(BridgeError::Registry(_))));

    drop(bridge);
    assert!(registry.is_empty());
    let (_again, _) = load(&registry, "dup", &idle_guest());
}

#[test]
fn missing_scheduler_export_is_rejected() {
    let registry = BridgeRegistry::new();
    let wasm = Guest::new().finish_without_scheduler();
    let err = Bridge::from_bytes(&registry, &config("noexport"), &wasm).err();
    match err {
        Some(BridgeError::Engine(msg)) => assert!(msg.contains("go_scheduler"), "{msg}"),
        other => panic!("expected engine error, got {other:?}"),
    }
    assert!(registry.is_empty());
}

#[test]
fn unknown_import_is_rejected() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    guest.import_foreign("env", "syscall/js.finalizeRef");
    let err = Bridge::from_bytes(&registry, &config("foreign"), &guest.finish()).err();
    match err {
        Some(BridgeError::Engine(msg)) => assert!(msg.contains("finalizeRef"), "{msg}"),
        other => panic!("expected engine error, got {other:?}"),
    }
    assert!(registry.is_empty());
}

#[test]
fn from_file_reports_missing_path() {
    let registry = BridgeRegistry::new();
    let err = Bridge::from_file(&registry, &config("io"), "/nonexistent/guest.wasm").err();
    assert!(matches!(err, Some(BridgeError::Io { .. })));
}

// ══════════════════════════════════════════════════════════════════════════════
// Exit paths
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn proc_exit_ends_the_run() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    let proc_exit = guest.import("proc_exit");
    guest.start(exit_with(proc_exit, 3));
    let (mut bridge, _) = load(&registry, "exit", &guest.finish());

    assert_eq!(bridge.run().unwrap(), ExitCondition::Exited(3));
    assert_eq!(bridge.state(), BridgeState::Terminated);
    assert!(matches!(bridge.run(), Err(BridgeError::Registry(_))));
}

#[test]
fn run_waits_for_termination_signal() {
    let registry = BridgeRegistry::new();
    let (mut bridge, _) = load(&registry, "waiting", &idle_guest());
    let handle = bridge.handle().clone();

    let started = Instant::now();
    let signaller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(50));
        handle.terminate(TerminationSignal::Interrupt);
    });

    let exit = bridge.run().unwrap();
    assert!(started.elapsed() >= Duration::from_millis(50));
    assert_eq!(exit, ExitCondition::Signal(TerminationSignal::Interrupt));
    assert_eq!(exit.exit_status(), 130);
    signaller.join().unwrap();
}

#[test]
fn registry_signal_unwinds_a_sleeping_guest() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    let sleep = guest.import("runtime.sleepTicks");
    guest
        .start(vec![Instruction::F64Const(2.0), Instruction::Call(sleep)])
        .scheduler(vec![Instruction::F64Const(2.0), Instruction::Call(sleep)]);
    let (mut bridge, _) = load(&registry, "sleeper", &guest.finish());

    let remote = registry.clone();
    let signaller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(30));
        remote.terminate_all(TerminationSignal::Terminate)
    });

    assert_eq!(
        bridge.run().unwrap(),
        ExitCondition::Signal(TerminationSignal::Terminate)
    );
    assert_eq!(signaller.join().unwrap(), 1);
}

#[test]
fn import_fault_surfaces_from_run() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    let value_get = guest.import("syscall/js.valueGet");
    guest.data(0, &GLOBAL_SLOT.to_le_bytes());
    guest.data(200, b"localStorage");
    guest.start(js_call(value_get, &[8, 0, 200, 12]));
    let (mut bridge, _) = load(&registry, "faulty", &guest.finish());

    match bridge.run() {
        Err(BridgeError::ProtocolViolation { detail, .. }) => {
            assert!(detail.contains("localStorage"), "{detail}")
        }
        other => panic!("expected protocol violation, got {other:?}"),
    }
    assert_eq!(bridge.state(), BridgeState::Terminated);
}

#[test]
fn guest_trap_is_an_engine_error() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    guest.start(vec![Instruction::Unreachable]);
    let (mut bridge, _) = load(&registry, "trap", &guest.finish());
    assert!(matches!(bridge.run(), Err(BridgeError::Engine(_))));
}

// ══════════════════════════════════════════════════════════════════════════════
// Scheduler
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn sleep_ticks_delays_scheduler_reentry() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    let ticks = guest.import("runtime.ticks");
    let sleep = guest.import("runtime.sleepTicks");
    let proc_exit = guest.import("proc_exit");
    guest.start(vec![
        Instruction::I32Const(0),
        Instruction::Call(ticks),
        Instruction::F64Store(memarg(0, 3)),
        Instruction::F64Const(5.0),
        Instruction::Call(sleep),
    ]);
    let mut scheduler = vec![
        Instruction::I32Const(8),
        Instruction::Call(ticks),
        Instruction::F64Store(memarg(0, 3)),
    ];
    scheduler.extend(exit_with(proc_exit, 0));
    guest.scheduler(scheduler);
    let (mut bridge, _) = load(&registry, "ticker", &guest.finish());

    let started = Instant::now();
    assert_eq!(bridge.run().unwrap(), ExitCondition::Exited(0));
    assert!(started.elapsed() >= Duration::from_millis(5));

    let mem = bridge.memory().unwrap();
    let before = f64_at(mem, 0);
    let after = f64_at(mem, 8);
    assert!(before > 0.0);
    assert!(after - before >= 5.0, "re-entered after {} ms", after - before);
}

#[test]
fn nested_sleeps_are_serialized() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    let sleep = guest.import("runtime.sleepTicks");
    let proc_exit = guest.import("proc_exit");
    guest.with_counter();
    guest.start(vec![Instruction::F64Const(1.0), Instruction::Call(sleep)]);
    // counter += 1; if counter < 3 { sleep(1) } else { proc_exit(counter) }
    guest.scheduler(vec![
        Instruction::GlobalGet(0),
        Instruction::I32Const(1),
        Instruction::I32Add,
        Instruction::GlobalSet(0),
        Instruction::GlobalGet(0),
        Instruction::I32Const(3),
        Instruction::I32LtS,
        Instruction::If(BlockType::Empty),
        Instruction::F64Const(1.0),
        Instruction::Call(sleep),
        Instruction::Else,
        Instruction::GlobalGet(0),
        Instruction::Call(proc_exit),
        Instruction::End,
    ]);
    let (mut bridge, _) = load(&registry, "nested", &guest.finish());
    assert_eq!(bridge.run().unwrap(), ExitCondition::Exited(3));
}

// ══════════════════════════════════════════════════════════════════════════════
// Value ABI through the engine
// ══════════════════════════════════════════════════════════════════════════════

#[test]
fn user_agent_round_trips_through_prepared_string() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    let value_get = guest.import("syscall/js.valueGet");
    let prepare = guest.import("syscall/js.valuePrepareString");
    let load_string = guest.import("syscall/js.valueLoadString");
    let proc_exit = guest.import("proc_exit");
    guest.data(0, &GLOBAL_SLOT.to_le_bytes());
    guest.data(200, b"navigator");
    guest.data(220, b"userAgent");

    let mut start = js_call(value_get, &[8, 0, 200, 9]);
    start.extend(js_call(value_get, &[16, 8, 220, 9]));
    start.extend(js_call(prepare, &[24, 16]));
    start.extend(js_call(load_string, &[24, 300, 64, 64]));
    start.extend(exit_with(proc_exit, 0));
    guest.start(start);
    let (mut bridge, _) = load(&registry, "agent", &guest.finish());

    assert_eq!(bridge.run().unwrap(), ExitCondition::Exited(0));
    let mem = bridge.memory().unwrap();
    let agent = "wasmgo-test/1.0";
    assert_eq!(u32_at(mem, 32) as usize, agent.len());
    assert_eq!(u32_at(mem, 36), 0);
    assert_eq!(&mem[300..300 + agent.len()], agent.as_bytes());
    assert_eq!(
        decode(bridge.value_table(), slot_at(mem, 16)).unwrap(),
        HostValue::string(agent)
    );
}

#[test]
fn typed_array_construction_and_random_fill() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    let value_get = guest.import("syscall/js.valueGet");
    let value_new = guest.import("syscall/js.valueNew");
    let value_call = guest.import("syscall/js.valueCall");
    let value_length = guest.import("syscall/js.valueLength");
    let proc_exit = guest.import("proc_exit");
    guest.data(0, &GLOBAL_SLOT.to_le_bytes());
    guest.data(64, &8.0f64.to_le_bytes());
    guest.data(200, b"Uint8Array");
    guest.data(220, b"window");
    guest.data(230, b"crypto");
    guest.data(240, b"getRandomValues");

    let mut start = js_call(value_get, &[8, 0, 200, 10]);
    start.extend(js_call(value_new, &[16, 8, 64, 1, 1]));
    start.extend(js_call(value_get, &[32, 0, 220, 6]));
    start.extend(js_call(value_get, &[40, 32, 230, 6]));
    start.extend(copy_slot(16, 72));
    start.extend(js_call(value_call, &[48, 40, 240, 15, 72, 1, 1]));
    start.push(Instruction::I32Const(80));
    start.extend(js_call(value_length, &[48]));
    start.push(Instruction::I32Store(memarg(0, 2)));
    start.extend(exit_with(proc_exit, 0));
    guest.start(start);
    let (mut bridge, _) = load(&registry, "crypto", &guest.finish());

    assert_eq!(bridge.run().unwrap(), ExitCondition::Exited(0));
    let mem = bridge.memory().unwrap();
    assert_eq!(mem[24], 1, "valueNew ok flag");
    assert_eq!(mem[56], 1, "valueCall ok flag");
    assert_eq!(slot_at(mem, 48), slot_at(mem, 16), "same view returned");
    assert_eq!(u32_at(mem, 80), 8);

    let array = decode(bridge.value_table(), slot_at(mem, 16)).unwrap();
    let view = array.as_typed_array().unwrap();
    assert_eq!(view.len(), 8);
    assert_eq!(view.buffer().len(), 8);
}

#[test]
fn value_set_stores_on_global() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    let string_val = guest.import("syscall/js.stringVal");
    let value_set = guest.import("syscall/js.valueSet");
    let proc_exit = guest.import("proc_exit");
    guest.data(0, &GLOBAL_SLOT.to_le_bytes());
    guest.data(200, b"ready");
    guest.data(220, b"status");

    let mut start = js_call(string_val, &[8, 200, 5]);
    start.extend(js_call(value_set, &[0, 220, 6, 8]));
    start.extend(exit_with(proc_exit, 0));
    guest.start(start);
    let (mut bridge, _) = load(&registry, "setter", &guest.finish());

    bridge.run().unwrap();
    assert_eq!(
        bridge.global().unwrap().get("status"),
        Some(HostValue::string("ready"))
    );
}

#[test]
fn fd_write_reaches_console() {
    let registry = BridgeRegistry::new();
    let mut guest = Guest::new();
    let fd_write = guest.import("fd_write");
    let proc_exit = guest.import("proc_exit");
    let text = b"hello from guest\n";
    guest.data(100, text);
    guest.data(16, &100u32.to_le_bytes());
    guest.data(20, &(text.len() as u32).to_le_bytes());
    guest.start(vec![
        Instruction::I32Const(40),
        Instruction::I32Const(1),
        Instruction::I32Const(16),
        Instruction::I32Const(1),
        Instruction::I32Const(32),
        Instruction::Call(fd_write),
        Instruction::I32Store(memarg(0, 2)),
        Instruction::I32Const(44),
        Instruction::I32Const(9),
        Instruction::I32Const(16),
        Instruction::I32Const(1),
        Instruction::I32Const(32),
        Instruction::Call(fd_write),
        Instruction::I32Store(memarg(0, 2)),
        Instruction::I32Const(0),
        Instruction::Call(proc_exit),
    ]);
    let (mut bridge, console) = load(&registry, "console", &guest.finish());

    bridge.run().unwrap();
    assert_eq!(console.stdout(), "hello from guest\n");
    assert_eq!(console.stderr(), "");
    let mem = bridge.memory().unwrap();
    assert_eq!(u32_at(mem, 32) as usize, text.len());
    assert_eq!(u32_at(mem, 40), 0);
    assert_eq!(u32_at(mem, 44), 8, "EBADF for an unknown fd");
}

//! Guest ABI constants: slot encoding, reserved table ids, and the import and
//! export names the guest links against.
//!
//! Every value occupies an 8-byte little-endian slot:
//!
//! ```text
//! all-zero bits            : undefined
//! non-NaN, non-zero double : the number itself
//! NaN with high word 0x7FF8_000t, low word id
//!                          : value table entry `id`, type flag `t`
//! ```
//!
//! The prepared-string staging record extends the slot:
//!
//! ```text
//! addr+0  : 8-byte value slot (staged byte buffer)
//! addr+8  : u32 byte length
//! addr+12 : u32 reserved (0)
//! ```

/// High word of every boxed reference (a quiet-NaN head).
pub const NAN_HEAD: u32 = 0x7FF8_0000;

// ── Type flags (low bits of the high word) ──────────────────────────────────

pub const TYPE_FLAG_OBJECT: u32 = 0;
pub const TYPE_FLAG_STRING: u32 = 1;
pub const TYPE_FLAG_FUNCTION: u32 = 3;

// ── Reserved value table ids ────────────────────────────────────────────────
// (order must match ValueTable::new)

pub const ID_NAN: u32 = 0;
pub const ID_ZERO: u32 = 1;
pub const ID_NULL: u32 = 2;
pub const ID_TRUE: u32 = 3;
pub const ID_FALSE: u32 = 4;
pub const ID_GLOBAL: u32 = 5;

/// Number of ids seeded at construction; dynamic values start here.
pub const RESERVED_IDS: u32 = 6;

// ── Layout ──────────────────────────────────────────────────────────────────

/// Size of one value slot in guest memory.
pub const SLOT_SIZE: u32 = 8;
/// Offset of the 1-byte success flag after a call/new result slot.
pub const OK_FLAG_OFFSET: i32 = 8;
/// Offset of the byte length in a prepared-string record.
pub const STAGED_LEN_OFFSET: i32 = 8;
/// Offset of the reserved word in a prepared-string record.
pub const STAGED_RESERVED_OFFSET: i32 = 12;
/// Size of a WASI `iovec` (`buf: u32, len: u32`).
pub const IOVEC_SIZE: u32 = 8;

// ── WASI ────────────────────────────────────────────────────────────────────

pub const WASI_ESUCCESS: i32 = 0;
pub const WASI_EBADF: i32 = 8;
pub const WASI_EIO: i32 = 29;
pub const FD_STDOUT: i32 = 1;
pub const FD_STDERR: i32 = 2;

// ── Import namespaces and names ─────────────────────────────────────────────

pub const NS_WASI: &str = "wasi_unstable";
pub const NS_ENV: &str = "env";

pub const IMPORT_FD_WRITE: &str = "fd_write";
pub const IMPORT_PROC_EXIT: &str = "proc_exit";
pub const IMPORT_TICKS: &str = "runtime.ticks";
pub const IMPORT_SLEEP_TICKS: &str = "runtime.sleepTicks";
pub const IMPORT_STRING_VAL: &str = "syscall/js.stringVal";
pub const IMPORT_VALUE_GET: &str = "syscall/js.valueGet";
pub const IMPORT_VALUE_SET: &str = "syscall/js.valueSet";
pub const IMPORT_VALUE_INDEX: &str = "syscall/js.valueIndex";
pub const IMPORT_VALUE_SET_INDEX: &str = "syscall/js.valueSetIndex";
pub const IMPORT_VALUE_CALL: &str = "syscall/js.valueCall";
pub const IMPORT_VALUE_NEW: &str = "syscall/js.valueNew";
pub const IMPORT_VALUE_LENGTH: &str = "syscall/js.valueLength";
pub const IMPORT_VALUE_PREPARE_STRING: &str = "syscall/js.valuePrepareString";
pub const IMPORT_VALUE_LOAD_STRING: &str = "syscall/js.valueLoadString";

/// Every `(namespace, name)` pair the host binds into the guest.
pub const HOST_IMPORTS: &[(&str, &str)] = &[
    (NS_WASI, IMPORT_FD_WRITE),
    (NS_WASI, IMPORT_PROC_EXIT),
    (NS_ENV, IMPORT_TICKS),
    (NS_ENV, IMPORT_SLEEP_TICKS),
    (NS_ENV, IMPORT_STRING_VAL),
    (NS_ENV, IMPORT_VALUE_GET),
    (NS_ENV, IMPORT_VALUE_SET),
    (NS_ENV, IMPORT_VALUE_INDEX),
    (NS_ENV, IMPORT_VALUE_SET_INDEX),
    (NS_ENV, IMPORT_VALUE_CALL),
    (NS_ENV, IMPORT_VALUE_NEW),
    (NS_ENV, IMPORT_VALUE_LENGTH),
    (NS_ENV, IMPORT_VALUE_PREPARE_STRING),
    (NS_ENV, IMPORT_VALUE_LOAD_STRING),
];

// ── Exports ─────────────────────────────────────────────────────────────────

pub const EXPORT_START: &str = "_start";
pub const EXPORT_SCHEDULER: &str = "go_scheduler";
pub const EXPORT_MEMORY: &str = "memory";

/// Function exports the host calls into.
pub const REQUIRED_EXPORTS: &[&str] = &[EXPORT_START, EXPORT_SCHEDULER];

/// Build the high word for a boxed reference with the given type flag.
pub const fn boxed_head(type_flag: u32) -> u32 {
    NAN_HEAD | type_flag
}

/// Compose a full boxed slot from a type flag and table id.
pub const fn boxed_slot(type_flag: u32, id: u32) -> u64 {
    ((boxed_head(type_flag) as u64) << 32) | id as u64
}

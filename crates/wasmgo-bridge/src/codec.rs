//! NaN-boxed value slots.
//!
//! Decoding reads a slot as an IEEE-754 double: zero is `undefined`, any
//! other non-NaN double is itself, and a NaN carries a value table id in its
//! low word. Encoding reverses that, interning reference-typed values so the
//! guest sees one stable handle per identity.

use wasmgo_types::{BridgeResult, HostValue};

use crate::abi::{
    boxed_slot, ID_FALSE, ID_NAN, ID_NULL, ID_TRUE, ID_ZERO, SLOT_SIZE, TYPE_FLAG_FUNCTION,
    TYPE_FLAG_OBJECT, TYPE_FLAG_STRING,
};
use crate::memory::GuestMemory;
use crate::table::ValueTable;

/// Decode a raw 8-byte slot.
pub fn decode(table: &ValueTable, slot: u64) -> BridgeResult<HostValue> {
    let f = f64::from_bits(slot);
    if f == 0.0 {
        return Ok(HostValue::Undefined);
    }
    if !f.is_nan() {
        return Ok(HostValue::Number(f));
    }
    table.get(slot as u32).cloned()
}

/// Encode a value into a raw 8-byte slot, interning it if needed.
pub fn encode(table: &mut ValueTable, value: &HostValue) -> u64 {
    match value {
        HostValue::Number(n) if n.is_nan() => boxed_slot(TYPE_FLAG_OBJECT, ID_NAN),
        HostValue::Number(n) if *n == 0.0 => boxed_slot(TYPE_FLAG_OBJECT, ID_ZERO),
        HostValue::Number(n) => n.to_bits(),
        HostValue::Undefined => 0,
        HostValue::Null => boxed_slot(TYPE_FLAG_OBJECT, ID_NULL),
        HostValue::Boolean(true) => boxed_slot(TYPE_FLAG_OBJECT, ID_TRUE),
        HostValue::Boolean(false) => boxed_slot(TYPE_FLAG_OBJECT, ID_FALSE),
        other => {
            let id = table.intern(other.clone());
            boxed_slot(type_flag(other), id)
        }
    }
}

/// Type flag the guest reads from a boxed reference's high word.
pub fn type_flag(value: &HostValue) -> u32 {
    match value {
        HostValue::String(_) => TYPE_FLAG_STRING,
        HostValue::Function(_) => TYPE_FLAG_FUNCTION,
        _ => TYPE_FLAG_OBJECT,
    }
}

/// Decode the slot at `addr`.
pub fn load_value(table: &ValueTable, mem: &GuestMemory<'_>, addr: i32) -> BridgeResult<HostValue> {
    decode(table, mem.get_u64(addr)?)
}

/// Encode `value` into the slot at `addr`.
pub fn store_value(
    table: &mut ValueTable,
    mem: &mut GuestMemory<'_>,
    addr: i32,
    value: &HostValue,
) -> BridgeResult<()> {
    mem.set_u64(addr, encode(table, value))
}

/// Decode `count` consecutive slots starting at `addr`.
pub fn load_slice(
    table: &ValueTable,
    mem: &GuestMemory<'_>,
    addr: i32,
    count: i32,
) -> BridgeResult<Vec<HostValue>> {
    // Bounds-check the whole run up front.
    mem.load_bytes(addr, count.saturating_mul(SLOT_SIZE as i32))?;
    (0..count)
        .map(|i| load_value(table, mem, addr.wrapping_add(i * SLOT_SIZE as i32)))
        .collect()
}

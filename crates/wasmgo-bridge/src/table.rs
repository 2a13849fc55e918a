//! The host-side value space.
//!
//! An append-only list of host values plus an identity cache. Guest handles
//! are indices into the list, so entries are never removed or reindexed for
//! the lifetime of a bridge.

use std::collections::HashMap;

use wasmgo_types::{BridgeError, BridgeResult, HostValue, IdentityKey, ObjectRef};

use crate::abi::ID_GLOBAL;

/// Ordered value storage with identity-based deduplication.
pub struct ValueTable {
    values: Vec<HostValue>,
    refs: HashMap<IdentityKey, u32>,
}

impl ValueTable {
    /// Seed the six reserved slots: NaN, 0, null, true, false, global.
    pub fn new(global: ObjectRef) -> Self {
        let global = HostValue::Object(global);
        let mut refs = HashMap::new();
        if let Some(key) = global.identity() {
            refs.insert(key, ID_GLOBAL);
        }
        Self {
            values: vec![
                HostValue::Number(f64::NAN),
                HostValue::Number(0.0),
                HostValue::Null,
                HostValue::Boolean(true),
                HostValue::Boolean(false),
                global,
            ],
            refs,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The global object at the reserved global slot.
    pub fn global(&self) -> Option<&ObjectRef> {
        self.values
            .get(ID_GLOBAL as usize)
            .and_then(HostValue::as_object)
    }

    pub fn get(&self, id: u32) -> BridgeResult<&HostValue> {
        self.values.get(id as usize).ok_or_else(|| {
            BridgeError::protocol(
                format_args!("value ref {id}"),
                format!("unknown reference (table holds {} values)", self.values.len()),
            )
        })
    }

    /// Index of an identity already present in the table.
    pub fn index_of(&self, value: &HostValue) -> Option<u32> {
        value.identity().and_then(|key| self.refs.get(&key).copied())
    }

    /// Return the index for `value`, appending it if its identity is new.
    ///
    /// Values without an identity are appended every time.
    pub fn intern(&mut self, value: HostValue) -> u32 {
        let key = value.identity();
        if let Some(id) = key.as_ref().and_then(|key| self.refs.get(key)) {
            return *id;
        }
        let id = self.values.len() as u32;
        self.values.push(value);
        if let Some(key) = key {
            self.refs.insert(key, id);
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abi::RESERVED_IDS;

    fn table() -> ValueTable {
        ValueTable::new(ObjectRef::new("global"))
    }

    #[test]
    fn reserved_slots_in_fixed_order() {
        let t = table();
        assert_eq!(t.len(), RESERVED_IDS as usize);
        assert!(matches!(t.get(0).unwrap(), HostValue::Number(n) if n.is_nan()));
        assert!(matches!(t.get(1).unwrap(), HostValue::Number(n) if *n == 0.0));
        assert_eq!(t.get(2).unwrap(), &HostValue::Null);
        assert_eq!(t.get(3).unwrap(), &HostValue::Boolean(true));
        assert_eq!(t.get(4).unwrap(), &HostValue::Boolean(false));
        assert_eq!(t.global().unwrap().name(), "global");
    }

    #[test]
    fn global_object_reuses_reserved_index() {
        let mut t = table();
        let global = t.get(ID_GLOBAL).unwrap().clone();
        assert_eq!(t.intern(global), ID_GLOBAL);
        assert_eq!(t.len(), RESERVED_IDS as usize);
    }

    #[test]
    fn equal_strings_collapse_to_one_slot() {
        let mut t = table();
        let a = t.intern(HostValue::string("cookie"));
        let b = t.intern(HostValue::string(String::from("cookie")));
        assert_eq!(a, b);
        assert_eq!(a, RESERVED_IDS);
        assert_eq!(t.len(), RESERVED_IDS as usize + 1);
    }

    #[test]
    fn distinct_objects_get_distinct_slots() {
        let mut t = table();
        let a = HostValue::Object(ObjectRef::new("same"));
        let b = HostValue::Object(ObjectRef::new("same"));
        let ia = t.intern(a.clone());
        let ib = t.intern(b);
        assert_ne!(ia, ib);
        assert_eq!(t.intern(a.clone()), ia);
        assert_eq!(t.index_of(&a), Some(ia));
    }

    #[test]
    fn unknown_id_is_protocol_violation() {
        let t = table();
        let err = t.get(99).unwrap_err();
        assert!(err.to_string().contains("value ref 99"));
    }
}

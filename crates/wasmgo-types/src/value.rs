//! Host values addressable from the guest.
//!
//! Plain numbers travel inside the 8-byte slot itself. Every other variant
//! lives in the bridge's value table and is referenced by index. Reference
//! variants are cheap to clone: clones share the same underlying allocation,
//! and identity (see [`IdentityKey`]) is the allocation address.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::error::{BridgeError, BridgeResult};

/// Signature shared by native functions and constructors.
pub type NativeCall = dyn Fn(&[HostValue]) -> BridgeResult<HostValue>;

/// A value in the host's guest-addressable value space.
#[derive(Clone)]
pub enum HostValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    String(Rc<str>),
    Object(ObjectRef),
    Function(NativeFn),
    TypedArray(TypedArrayRef),
    ArrayBuffer(BufferRef),
}

impl HostValue {
    pub fn string(text: impl Into<Rc<str>>) -> Self {
        Self::String(text.into())
    }

    /// Short type name used in diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Object(_) => "object",
            Self::Function(_) => "function",
            Self::TypedArray(_) => "typed array",
            Self::ArrayBuffer(_) => "array buffer",
        }
    }

    /// Key under which the value table deduplicates this value.
    ///
    /// `None` for values that never occupy a table slot by identity
    /// (numbers and the singletons).
    pub fn identity(&self) -> Option<IdentityKey> {
        match self {
            Self::Undefined | Self::Null | Self::Boolean(_) | Self::Number(_) => None,
            Self::String(text) => Some(IdentityKey::Text(Rc::clone(text))),
            Self::Object(obj) => Some(IdentityKey::Reference(obj.addr())),
            Self::Function(func) => Some(IdentityKey::Reference(func.addr())),
            Self::TypedArray(arr) => Some(IdentityKey::Reference(arr.addr())),
            Self::ArrayBuffer(buf) => Some(IdentityKey::Reference(buf.addr())),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_typed_array(&self) -> Option<&TypedArrayRef> {
        match self {
            Self::TypedArray(arr) => Some(arr),
            _ => None,
        }
    }
}

/// Protocol-level equality: NaN equals NaN, strings compare by content,
/// everything reference-typed compares by identity.
impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b || (a.is_nan() && b.is_nan()),
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a.ptr_eq(b),
            (Self::Function(a), Self::Function(b)) => a.ptr_eq(b),
            (Self::TypedArray(a), Self::TypedArray(b)) => a.ptr_eq(b),
            (Self::ArrayBuffer(a), Self::ArrayBuffer(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("Undefined"),
            Self::Null => f.write_str("Null"),
            Self::Boolean(b) => write!(f, "Boolean({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::String(text) => write!(f, "String({text:?})"),
            Self::Object(obj) => write!(f, "Object({})", obj.name()),
            Self::Function(func) => write!(f, "Function({})", func.name()),
            Self::TypedArray(arr) => write!(
                f,
                "TypedArray(offset={}, len={})",
                arr.byte_offset(),
                arr.len()
            ),
            Self::ArrayBuffer(buf) => write!(f, "ArrayBuffer(len={})", buf.len()),
        }
    }
}

impl fmt::Display for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(text) => write!(f, "{text:?}"),
            Self::Object(obj) => write!(f, "object {}", obj.name()),
            Self::Function(func) => write!(f, "function {}", func.name()),
            Self::TypedArray(arr) => write!(f, "typed array [{}]", arr.to_js_string()),
            Self::ArrayBuffer(buf) => write!(f, "array buffer ({} bytes)", buf.len()),
        }
    }
}

/// Identity under which a value is deduplicated in the value table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum IdentityKey {
    /// Strings collapse by content.
    Text(Rc<str>),
    /// Everything else collapses by allocation address.
    Reference(usize),
}

// ══════════════════════════════════════════════════════════════════════════════
// Objects
// ══════════════════════════════════════════════════════════════════════════════

/// A shared handle to a host object.
#[derive(Clone)]
pub struct ObjectRef(Rc<JsObject>);

struct JsObject {
    /// Diagnostic only.
    name: String,
    props: RefCell<HashMap<String, HostValue>>,
    constructor: Option<Rc<NativeCall>>,
}

impl ObjectRef {
    /// Create an empty, non-constructible object.
    pub fn new(name: impl Into<String>) -> Self {
        Self::build(name.into(), HashMap::new(), None)
    }

    /// Create an object pre-populated with properties.
    pub fn with_props<K: Into<String>>(
        name: impl Into<String>,
        props: impl IntoIterator<Item = (K, HostValue)>,
    ) -> Self {
        let props = props.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::build(name.into(), props, None)
    }

    /// Create an object the guest can instantiate with `new`.
    pub fn constructible(
        name: impl Into<String>,
        constructor: impl Fn(&[HostValue]) -> BridgeResult<HostValue> + 'static,
    ) -> Self {
        Self::build(name.into(), HashMap::new(), Some(Rc::new(constructor)))
    }

    fn build(
        name: String,
        props: HashMap<String, HostValue>,
        constructor: Option<Rc<NativeCall>>,
    ) -> Self {
        Self(Rc::new(JsObject {
            name,
            props: RefCell::new(props),
            constructor,
        }))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn get(&self, key: &str) -> Option<HostValue> {
        self.0.props.borrow().get(key).cloned()
    }

    /// Property lookup where absence is a protocol violation.
    pub fn lookup(&self, key: &str) -> BridgeResult<HostValue> {
        self.get(key).ok_or_else(|| {
            BridgeError::protocol(
                format_args!("object {}", self.name()),
                format!("missing property {key:?}"),
            )
        })
    }

    pub fn set(&self, key: impl Into<String>, value: HostValue) {
        self.0.props.borrow_mut().insert(key.into(), value);
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.props.borrow().contains_key(key)
    }

    /// Property names in sorted order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.0.props.borrow().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn is_constructible(&self) -> bool {
        self.0.constructor.is_some()
    }

    /// Run the object's constructor capability.
    pub fn construct(&self, args: &[HostValue]) -> BridgeResult<HostValue> {
        match &self.0.constructor {
            Some(ctor) => ctor(args),
            None => Err(BridgeError::protocol(
                format_args!("object {}", self.name()),
                "not a constructor",
            )),
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Native functions
// ══════════════════════════════════════════════════════════════════════════════

/// A host function callable from the guest through `valueCall`.
#[derive(Clone)]
pub struct NativeFn {
    name: Rc<str>,
    call: Rc<NativeCall>,
}

impl NativeFn {
    pub fn new(
        name: impl Into<Rc<str>>,
        call: impl Fn(&[HostValue]) -> BridgeResult<HostValue> + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            call: Rc::new(call),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[HostValue]) -> BridgeResult<HostValue> {
        (self.call)(args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.call, &other.call)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.call) as *const () as usize
    }
}

// ══════════════════════════════════════════════════════════════════════════════
// Buffers and typed arrays
// ══════════════════════════════════════════════════════════════════════════════

/// An owned, resizable byte buffer shared by every view onto it.
#[derive(Clone)]
pub struct BufferRef(Rc<RefCell<Vec<u8>>>);

impl BufferRef {
    /// A zero-filled buffer of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self::from_bytes(vec![0; len])
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Rc::new(RefCell::new(bytes)))
    }

    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn bytes(&self) -> Ref<'_, Vec<u8>> {
        self.0.borrow()
    }

    pub fn bytes_mut(&self) -> RefMut<'_, Vec<u8>> {
        self.0.borrow_mut()
    }

    /// Grow or shrink the buffer, zero-filling new bytes.
    pub fn resize(&self, len: usize) {
        self.0.borrow_mut().resize(len, 0);
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }
}

/// A `(buffer, byteOffset, length)` byte view.
///
/// Views keep their buffer alive; several views may alias one buffer.
#[derive(Clone)]
pub struct TypedArrayRef(Rc<TypedArrayView>);

struct TypedArrayView {
    buffer: BufferRef,
    byte_offset: usize,
    length: usize,
}

impl TypedArrayRef {
    /// A view over a fresh zero-filled buffer of `length` bytes.
    pub fn new(length: usize) -> Self {
        Self(Rc::new(TypedArrayView {
            buffer: BufferRef::new(length),
            byte_offset: 0,
            length,
        }))
    }

    /// A view over part of an existing buffer.
    pub fn view(buffer: BufferRef, byte_offset: usize, length: usize) -> BridgeResult<Self> {
        let end = byte_offset.checked_add(length);
        if end.map_or(true, |end| end > buffer.len()) {
            return Err(BridgeError::protocol(
                format_args!("array buffer ({} bytes)", buffer.len()),
                format!("view {byte_offset}+{length} is out of bounds"),
            ));
        }
        Ok(Self(Rc::new(TypedArrayView {
            buffer,
            byte_offset,
            length,
        })))
    }

    pub fn buffer(&self) -> &BufferRef {
        &self.0.buffer
    }

    pub fn byte_offset(&self) -> usize {
        self.0.byte_offset
    }

    pub fn len(&self) -> usize {
        self.0.length
    }

    pub fn is_empty(&self) -> bool {
        self.0.length == 0
    }

    /// Copy of the bytes covered by this view.
    ///
    /// If the buffer shrank underneath the view, only the bytes still
    /// present are returned.
    pub fn to_vec(&self) -> Vec<u8> {
        let bytes = self.0.buffer.bytes();
        let (start, end) = self.clamped_range(bytes.len());
        bytes[start..end].to_vec()
    }

    /// Run `f` over the mutable bytes covered by this view.
    pub fn with_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> R {
        let mut bytes = self.0.buffer.bytes_mut();
        let (start, end) = self.clamped_range(bytes.len());
        f(&mut bytes[start..end])
    }

    pub fn get(&self, index: usize) -> Option<u8> {
        if index >= self.len() {
            return None;
        }
        self.0.buffer.bytes().get(self.byte_offset() + index).copied()
    }

    /// Store a byte; returns `false` when `index` is outside the view.
    pub fn set(&self, index: usize, byte: u8) -> bool {
        if index >= self.len() {
            return false;
        }
        match self.0.buffer.bytes_mut().get_mut(self.byte_offset() + index) {
            Some(slot) => {
                *slot = byte;
                true
            }
            None => false,
        }
    }

    /// Comma-separated decimal rendering, as `Uint8Array.prototype.toString`.
    pub fn to_js_string(&self) -> String {
        self.to_vec()
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    fn addr(&self) -> usize {
        Rc::as_ptr(&self.0) as usize
    }

    fn clamped_range(&self, buffer_len: usize) -> (usize, usize) {
        let start = self.byte_offset().min(buffer_len);
        let end = (self.byte_offset() + self.len()).min(buffer_len);
        (start, end)
    }
}

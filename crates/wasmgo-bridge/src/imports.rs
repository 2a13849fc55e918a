//! Import bodies for the `syscall/js` value ABI and the WASI console calls.
//!
//! Every function here takes the integer arguments the guest passed, in
//! order, with the trailing context words already stripped. None of them
//! knows about the execution engine: the engine binding builds a
//! [`GuestMemory`] for the call and hands the [`HostState`] over.

use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{trace, warn};
use wasmgo_types::{BridgeError, BridgeResult, BufferRef, HostValue};

use crate::abi::{
    FD_STDERR, FD_STDOUT, IOVEC_SIZE, OK_FLAG_OFFSET, STAGED_LEN_OFFSET, STAGED_RESERVED_OFFSET,
    WASI_EBADF, WASI_EIO, WASI_ESUCCESS,
};
use crate::codec::{load_slice, load_value, store_value};
use crate::host::HostState;
use crate::memory::GuestMemory;

const TARGET: &str = "wasmgo::imports";

impl HostState {
    /// `syscall/js.stringVal(ret, ptr, len)`
    pub fn string_val(
        &mut self,
        mem: &mut GuestMemory<'_>,
        ret: i32,
        ptr: i32,
        len: i32,
    ) -> BridgeResult<()> {
        trace!(target: TARGET, ret, ptr, len, "stringVal");
        let text = HostValue::string(mem.load_string(ptr, len)?.as_ref());
        store_value(&mut self.table, mem, ret, &text)
    }

    /// `syscall/js.valueGet(ret, v, p, plen)`
    pub fn value_get(
        &mut self,
        mem: &mut GuestMemory<'_>,
        ret: i32,
        v: i32,
        p: i32,
        plen: i32,
    ) -> BridgeResult<()> {
        trace!(target: TARGET, ret, v, p, plen, "valueGet");
        let receiver = load_value(&self.table, mem, v)?;
        let name = mem.load_string(p, plen)?.into_owned();
        let HostValue::Object(obj) = &receiver else {
            return Err(BridgeError::protocol(
                &receiver,
                format!("cannot read property {name:?} of a {}", receiver.kind_name()),
            ));
        };
        let result = obj.lookup(&name)?;
        trace!(target: TARGET, property = %name, value = ?result, "valueGet resolved");
        store_value(&mut self.table, mem, ret, &result)
    }

    /// `syscall/js.valueSet(v, p, plen, x)`
    pub fn value_set(
        &mut self,
        mem: &mut GuestMemory<'_>,
        v: i32,
        p: i32,
        plen: i32,
        x: i32,
    ) -> BridgeResult<()> {
        trace!(target: TARGET, v, p, plen, x, "valueSet");
        let receiver = load_value(&self.table, mem, v)?;
        let name = mem.load_string(p, plen)?.into_owned();
        let value = load_value(&self.table, mem, x)?;
        match &receiver {
            HostValue::Object(obj) => {
                obj.set(name, value);
                Ok(())
            }
            other => Err(BridgeError::protocol(
                other,
                format!("cannot set property {name:?} on a {}", other.kind_name()),
            )),
        }
    }

    /// `syscall/js.valueIndex(ret, v, i)`
    pub fn value_index(
        &mut self,
        mem: &mut GuestMemory<'_>,
        ret: i32,
        v: i32,
        i: i32,
    ) -> BridgeResult<()> {
        trace!(target: TARGET, ret, v, i, "valueIndex");
        let receiver = load_value(&self.table, mem, v)?;
        let result = match &receiver {
            HostValue::TypedArray(view) => usize::try_from(i)
                .ok()
                .and_then(|i| view.get(i))
                .map_or(HostValue::Undefined, |b| HostValue::Number(f64::from(b))),
            HostValue::Object(obj) => obj.get(&i.to_string()).unwrap_or(HostValue::Undefined),
            HostValue::String(_) => {
                return Err(BridgeError::Unsupported(
                    "valueIndex on a string".to_string(),
                ))
            }
            other => {
                return Err(BridgeError::protocol(
                    other,
                    format!("cannot index a {}", other.kind_name()),
                ))
            }
        };
        store_value(&mut self.table, mem, ret, &result)
    }

    /// `syscall/js.valueSetIndex(v, i, x)`
    pub fn value_set_index(
        &mut self,
        mem: &mut GuestMemory<'_>,
        v: i32,
        i: i32,
        x: i32,
    ) -> BridgeResult<()> {
        trace!(target: TARGET, v, i, x, "valueSetIndex");
        let receiver = load_value(&self.table, mem, v)?;
        let value = load_value(&self.table, mem, x)?;
        match &receiver {
            HostValue::TypedArray(view) => {
                let HostValue::Number(n) = value else {
                    return Err(BridgeError::protocol(
                        &value,
                        "typed array elements must be numbers",
                    ));
                };
                // Writes outside the view are dropped, as in JS.
                if let Ok(i) = usize::try_from(i) {
                    view.set(i, to_uint8(n));
                }
                Ok(())
            }
            HostValue::Object(obj) => {
                obj.set(i.to_string(), value);
                Ok(())
            }
            other => Err(BridgeError::protocol(
                other,
                format!("cannot assign index {i} on a {}", other.kind_name()),
            )),
        }
    }

    /// `syscall/js.valueCall(ret, v, m, mlen, args, alen, acap)`
    ///
    /// Writes the result slot, then a 1-byte ok flag at `ret + 8`.
    #[allow(clippy::too_many_arguments)]
    pub fn value_call(
        &mut self,
        mem: &mut GuestMemory<'_>,
        ret: i32,
        v: i32,
        m: i32,
        mlen: i32,
        args: i32,
        alen: i32,
    ) -> BridgeResult<()> {
        trace!(target: TARGET, ret, v, m, mlen, args, alen, "valueCall");
        let receiver = load_value(&self.table, mem, v)?;
        let method = mem.load_string(m, mlen)?.into_owned();
        let args = load_slice(&self.table, mem, args, alen)?;
        let result = match &receiver {
            HostValue::Object(obj) => match obj.lookup(&method)? {
                HostValue::Function(func) => func.call(&args)?,
                other => {
                    return Err(BridgeError::protocol(
                        format_args!("object {}", obj.name()),
                        format!("property {method:?} is a {}, not a function", other.kind_name()),
                    ))
                }
            },
            HostValue::TypedArray(view) if method == "toString" => {
                HostValue::string(view.to_js_string())
            }
            HostValue::TypedArray(_) => {
                return Err(BridgeError::Unsupported(format!(
                    "typed array method {method:?}"
                )))
            }
            other => {
                return Err(BridgeError::protocol(
                    other,
                    format!("cannot call method {method:?} on a {}", other.kind_name()),
                ))
            }
        };
        trace!(target: TARGET, method = %method, value = ?result, "valueCall returned");
        store_value(&mut self.table, mem, ret, &result)?;
        mem.set_u8(ret.wrapping_add(OK_FLAG_OFFSET), 1)
    }

    /// `syscall/js.valueNew(ret, v, args, alen, acap)`
    pub fn value_new(
        &mut self,
        mem: &mut GuestMemory<'_>,
        ret: i32,
        v: i32,
        args: i32,
        alen: i32,
    ) -> BridgeResult<()> {
        trace!(target: TARGET, ret, v, args, alen, "valueNew");
        let receiver = load_value(&self.table, mem, v)?;
        let args = load_slice(&self.table, mem, args, alen)?;
        let HostValue::Object(class) = &receiver else {
            return Err(BridgeError::protocol(
                &receiver,
                format!("a {} is not a constructor", receiver.kind_name()),
            ));
        };
        let result = class.construct(&args)?;
        trace!(target: TARGET, class = class.name(), value = ?result, "valueNew constructed");
        store_value(&mut self.table, mem, ret, &result)?;
        mem.set_u8(ret.wrapping_add(OK_FLAG_OFFSET), 1)
    }

    /// `syscall/js.valueLength(v) -> len`
    pub fn value_length(&mut self, mem: &mut GuestMemory<'_>, v: i32) -> BridgeResult<i32> {
        trace!(target: TARGET, v, "valueLength");
        let receiver = load_value(&self.table, mem, v)?;
        let len = match &receiver {
            HostValue::TypedArray(view) => view.len(),
            HostValue::String(text) => text.len(),
            HostValue::ArrayBuffer(buffer) => buffer.len(),
            HostValue::Object(obj) => match obj.get("length") {
                Some(HostValue::Number(n)) if n >= 0.0 && n.fract() == 0.0 => n as usize,
                _ => {
                    return Err(BridgeError::protocol(
                        &receiver,
                        "object has no numeric length",
                    ))
                }
            },
            other => {
                return Err(BridgeError::protocol(
                    other,
                    format!("a {} has no length", other.kind_name()),
                ))
            }
        };
        i32::try_from(len)
            .map_err(|_| BridgeError::protocol(&receiver, format!("length {len} overflows i32")))
    }

    /// `syscall/js.valuePrepareString(ret, v)`
    ///
    /// Stages the string's UTF-8 bytes in a fresh array buffer and writes
    /// the staging record at `ret`.
    pub fn value_prepare_string(
        &mut self,
        mem: &mut GuestMemory<'_>,
        ret: i32,
        v: i32,
    ) -> BridgeResult<()> {
        trace!(target: TARGET, ret, v, "valuePrepareString");
        let value = load_value(&self.table, mem, v)?;
        let HostValue::String(text) = &value else {
            return Err(BridgeError::protocol(
                &value,
                format!("cannot prepare a {} as a string", value.kind_name()),
            ));
        };
        let len = u32::try_from(text.len())
            .map_err(|_| BridgeError::protocol(&value, "string too long to stage"))?;
        let staged = HostValue::ArrayBuffer(BufferRef::from_bytes(text.as_bytes().to_vec()));
        store_value(&mut self.table, mem, ret, &staged)?;
        mem.set_u32(ret.wrapping_add(STAGED_LEN_OFFSET), len)?;
        mem.set_u32(ret.wrapping_add(STAGED_RESERVED_OFFSET), 0)
    }

    /// `syscall/js.valueLoadString(v, dest, len, cap)`
    ///
    /// Copies at most `len` staged bytes to `dest`.
    pub fn value_load_string(
        &mut self,
        mem: &mut GuestMemory<'_>,
        v: i32,
        dest: i32,
        len: i32,
    ) -> BridgeResult<()> {
        trace!(target: TARGET, v, dest, len, "valueLoadString");
        let staged = load_value(&self.table, mem, v)?;
        let HostValue::ArrayBuffer(buffer) = &staged else {
            return Err(BridgeError::protocol(
                &staged,
                "valueLoadString expects a prepared string",
            ));
        };
        let bytes = buffer.bytes();
        mem.store_bytes(dest, len, &bytes)?;
        Ok(())
    }

    /// `wasi_unstable.fd_write(fd, iovs, iovs_len, nwritten) -> errno`
    ///
    /// Only stdout and stderr are writable.
    pub fn fd_write(
        &mut self,
        mem: &mut GuestMemory<'_>,
        fd: i32,
        iovs: i32,
        iovs_len: i32,
        nwritten: i32,
    ) -> BridgeResult<i32> {
        trace!(target: TARGET, fd, iovs, iovs_len, nwritten, "fd_write");
        if fd != FD_STDOUT && fd != FD_STDERR {
            return Ok(WASI_EBADF);
        }
        // The count is unsigned on the wire; the whole iovec table must be
        // addressable before any entry is read.
        let count = iovs_len as u32;
        let table_len = count
            .checked_mul(IOVEC_SIZE)
            .and_then(|n| i32::try_from(n).ok())
            .ok_or_else(|| BridgeError::protocol(format_args!("iovs_len {count}"), "iovec table overflows"))?;
        mem.load_bytes(iovs, table_len)?;

        let mut out = Vec::new();
        for i in 0..count {
            let iov = iovs.wrapping_add((i * IOVEC_SIZE) as i32);
            let buf = mem.get_u32(iov)?;
            let len = mem.get_u32(iov.wrapping_add(4))?;
            let len = i32::try_from(len)
                .map_err(|_| BridgeError::protocol(format_args!("iovec {i}"), "length overflows"))?;
            out.extend_from_slice(mem.load_bytes(buf as i32, len)?);
        }
        let written = u32::try_from(out.len())
            .map_err(|_| BridgeError::protocol(format_args!("fd {fd}"), "write too large"))?;
        if let Err(err) = self.console.write(fd, &out) {
            warn!(target: TARGET, fd, error = %err, "console write failed");
            return Ok(WASI_EIO);
        }
        mem.set_u32(nwritten, written)?;
        Ok(WASI_ESUCCESS)
    }
}

/// `runtime.ticks() -> ms`: wall-clock milliseconds since the Unix epoch.
///
/// A clock set before the epoch reports 0.
pub fn ticks() -> f64 {
    millis_since_epoch(SystemTime::now())
}

fn millis_since_epoch(now: SystemTime) -> f64 {
    match now.duration_since(UNIX_EPOCH) {
        Ok(elapsed) => elapsed.as_millis() as f64,
        Err(err) => {
            warn!(target: TARGET, behind = ?err.duration(), "system clock is before the Unix epoch");
            0.0
        }
    }
}

/// JS `ToUint8`: truncate, then wrap modulo 256.
fn to_uint8(n: f64) -> u8 {
    if !n.is_finite() {
        return 0;
    }
    n.trunc().rem_euclid(256.0) as u8
}

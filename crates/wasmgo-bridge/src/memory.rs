//! Typed little-endian access to the guest's linear memory.
//!
//! A [`GuestMemory`] borrows the engine's memory for the duration of one
//! import call. Anything read through it (including the text returned by
//! [`GuestMemory::load_string`]) is a view that dies with that borrow: the
//! guest may grow or relocate its memory on the next entry, so callers copy
//! whatever they need to keep.

use std::borrow::Cow;
use std::ops::Range;

use wasmgo_types::{BridgeError, BridgeResult};

/// Bounds-checked accessor over a guest memory byte slice.
pub struct GuestMemory<'a> {
    data: &'a mut [u8],
}

impl<'a> GuestMemory<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Guest pointers are unsigned 32-bit offsets passed as `i32`.
    fn range(&self, addr: i32, len: usize) -> BridgeResult<Range<usize>> {
        let start = addr as u32 as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(start..end),
            _ => Err(BridgeError::protocol(
                format_args!("guest address {start:#x}"),
                format!(
                    "access of {len} bytes exceeds linear memory of {} bytes",
                    self.data.len()
                ),
            )),
        }
    }

    fn read<const N: usize>(&self, addr: i32) -> BridgeResult<[u8; N]> {
        let range = self.range(addr, N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(&self.data[range]);
        Ok(out)
    }

    fn write(&mut self, addr: i32, bytes: &[u8]) -> BridgeResult<()> {
        let range = self.range(addr, bytes.len())?;
        self.data[range].copy_from_slice(bytes);
        Ok(())
    }

    pub fn get_u8(&self, addr: i32) -> BridgeResult<u8> {
        Ok(self.read::<1>(addr)?[0])
    }

    pub fn set_u8(&mut self, addr: i32, v: u8) -> BridgeResult<()> {
        self.write(addr, &[v])
    }

    pub fn get_i32(&self, addr: i32) -> BridgeResult<i32> {
        self.read(addr).map(i32::from_le_bytes)
    }

    pub fn set_i32(&mut self, addr: i32, v: i32) -> BridgeResult<()> {
        self.write(addr, &v.to_le_bytes())
    }

    pub fn get_u32(&self, addr: i32) -> BridgeResult<u32> {
        self.read(addr).map(u32::from_le_bytes)
    }

    pub fn set_u32(&mut self, addr: i32, v: u32) -> BridgeResult<()> {
        self.write(addr, &v.to_le_bytes())
    }

    pub fn get_i64(&self, addr: i32) -> BridgeResult<i64> {
        self.read(addr).map(i64::from_le_bytes)
    }

    pub fn set_i64(&mut self, addr: i32, v: i64) -> BridgeResult<()> {
        self.write(addr, &v.to_le_bytes())
    }

    pub fn get_u64(&self, addr: i32) -> BridgeResult<u64> {
        self.read(addr).map(u64::from_le_bytes)
    }

    pub fn set_u64(&mut self, addr: i32, v: u64) -> BridgeResult<()> {
        self.write(addr, &v.to_le_bytes())
    }

    pub fn get_f64(&self, addr: i32) -> BridgeResult<f64> {
        self.get_u64(addr).map(f64::from_bits)
    }

    pub fn set_f64(&mut self, addr: i32, v: f64) -> BridgeResult<()> {
        self.set_u64(addr, v.to_bits())
    }

    /// Borrow `len` bytes at `addr`.
    pub fn load_bytes(&self, addr: i32, len: i32) -> BridgeResult<&[u8]> {
        let len = checked_len(len)?;
        let range = self.range(addr, len)?;
        Ok(&self.data[range])
    }

    /// Text at `addr..addr+len`, decoded as UTF-8 (lossily).
    ///
    /// Borrowed when the bytes are valid UTF-8.
    pub fn load_string(&self, addr: i32, len: i32) -> BridgeResult<Cow<'_, str>> {
        self.load_bytes(addr, len).map(String::from_utf8_lossy)
    }

    /// Copy at most `max_len` bytes of `data` to `addr`; returns the count.
    pub fn store_bytes(&mut self, addr: i32, max_len: i32, data: &[u8]) -> BridgeResult<usize> {
        let count = checked_len(max_len)?.min(data.len());
        self.write(addr, &data[..count])?;
        Ok(count)
    }
}

fn checked_len(len: i32) -> BridgeResult<usize> {
    usize::try_from(len)
        .map_err(|_| BridgeError::protocol(format_args!("length {len}"), "negative length"))
}

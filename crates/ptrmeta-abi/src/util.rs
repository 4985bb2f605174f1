//! Shared internal utilities for ABI adapters.

use std::ffi::{c_int, c_void};

use ptrmeta_membrane::Metadata;

#[inline]
pub(crate) fn addr(ptr: *const c_void) -> usize {
    ptr as usize
}

#[inline]
pub(crate) fn as_ptr(addr: usize) -> *mut c_void {
    addr as *mut c_void
}

/// Shadow-stack argument number or vector lane as an index. Negative numbers
/// map to an index nothing can hold, so the runtime reports them.
#[inline]
pub(crate) fn slot_index(arg_no: c_int) -> usize {
    usize::try_from(arg_no).unwrap_or(usize::MAX)
}

#[inline]
pub(crate) fn metadata(
    base: *const c_void,
    bound: *const c_void,
    key: u64,
    lock: *const c_void,
) -> Metadata {
    Metadata::new(addr(base), addr(bound), key, addr(lock))
}

/// Write `value` through `out` unless `out` is null.
///
/// # Safety
///
/// A non-null `out` must be valid for a write of `T`.
#[inline]
pub(crate) unsafe fn write_out<T>(out: *mut T, value: T) {
    if !out.is_null() {
        // SAFETY: caller guarantees `out` is writable when non-null.
        unsafe { out.write(value) };
    }
}

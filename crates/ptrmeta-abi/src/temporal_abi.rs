//! ABI layer for key/lock allocation.
//!
//! In spatial-only builds these entry points keep their signatures but issue
//! `(0, NULL)` and never fail.

use std::ffi::c_void;

use crate::state::{read_runtime, with_runtime};
use crate::util::{addr, as_ptr, write_out};

/// Issue a key and lock for the heap object at `ptr`.
///
/// # Safety
///
/// `key_out` and `lock_out` must each be null or valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_memory_allocation(
    ptr: *const c_void,
    key_out: *mut u64,
    lock_out: *mut *mut c_void,
) {
    let (key, lock) = with_runtime(|rt| rt.allocate(addr(ptr)));
    // SAFETY: forwarded caller contract.
    unsafe {
        write_out(key_out, key);
        write_out(lock_out, as_ptr(lock));
    }
}

/// Revoke the heap object at `ptr`.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_memory_deallocation(ptr: *const c_void, key: u64, lock: *const c_void) {
    with_runtime(|rt| rt.deallocate(addr(ptr), key, addr(lock)));
}

/// Issue a key and lock for the stack objects of the calling function.
///
/// # Safety
///
/// `key_out` and `lock_out` must each be null or valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_stack_memory_allocation(
    key_out: *mut u64,
    lock_out: *mut *mut c_void,
) {
    let (key, lock) = with_runtime(|rt| rt.stack_allocate());
    // SAFETY: forwarded caller contract.
    unsafe {
        write_out(key_out, key);
        write_out(lock_out, as_ptr(lock));
    }
}

/// Revoke the stack key issued on entry to the returning function.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_stack_memory_deallocation(key: u64) {
    with_runtime(|rt| rt.stack_deallocate(key));
}

/// Lock cell permanently holding key 1, for globals and wide metadata.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_get_global_lock() -> *mut c_void {
    as_ptr(read_runtime(|rt| rt.global_lock()))
}

//! ABI layer for allocation and block-copy wrappers.
//!
//! Instrumented programs call these prefixed wrappers instead of the libc
//! functions they wrap; the system allocator itself is never interposed.
//! Each wrapper is called like any instrumented function: the caller has
//! pushed a shadow-stack frame whose slot 0 receives the result's metadata
//! and whose slots 1.. hold the pointer arguments.

use std::ffi::{c_int, c_void};

use ptrmeta_membrane::Metadata;

use crate::state::with_runtime;
use crate::util::addr;

/// Register a fresh block and publish its metadata in the return slot.
fn publish_allocation(ptr: *mut c_void, size: usize) {
    with_runtime(|rt| {
        if ptr.is_null() {
            return rt.store_null_return();
        }
        let meta = rt.allocate_object(addr(ptr), size)?;
        rt.store_return(&meta)
    });
}

// ---------------------------------------------------------------------------
// malloc / calloc
// ---------------------------------------------------------------------------

/// `malloc` with metadata: slot 0 receives `(ptr, ptr + size, key, lock)`.
///
/// # Safety
///
/// Same contract as `malloc`; a shadow-stack frame with a return slot must be active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_malloc(size: usize) -> *mut c_void {
    // SAFETY: plain libc allocation.
    let ptr = unsafe { libc::malloc(size) };
    publish_allocation(ptr, size);
    ptr
}

/// `calloc` with metadata.
///
/// # Safety
///
/// Same contract as `calloc`; a shadow-stack frame with a return slot must be active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_calloc(nmemb: usize, size: usize) -> *mut c_void {
    // SAFETY: plain libc allocation; calloc checks the multiplication itself.
    let ptr = unsafe { libc::calloc(nmemb, size) };
    publish_allocation(ptr, nmemb.saturating_mul(size));
    ptr
}

// ---------------------------------------------------------------------------
// free
// ---------------------------------------------------------------------------

/// `free` with temporal revocation. Key and lock come from argument slot 1.
///
/// A block whose revocation fails (double free, foreign pointer) is not
/// passed to libc.
///
/// # Safety
///
/// Same contract as `free`; a shadow-stack frame with slot 1 must be active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_free(ptr: *mut c_void) {
    if ptr.is_null() {
        return;
    }
    let released = with_runtime(|rt| {
        let meta = rt.load_slot(1)?;
        rt.deallocate(addr(ptr), meta.key, meta.lock)?;
        Ok(true)
    });
    if released {
        // SAFETY: `ptr` was a live allocation according to the runtime.
        unsafe { libc::free(ptr) };
    }
}

// ---------------------------------------------------------------------------
// realloc
// ---------------------------------------------------------------------------

/// `realloc` that keeps the block's key and lock. On relocation the trie
/// entries and the free-map record move with the data.
///
/// A failed resize leaves the old block registered. A zero-size resize that
/// releases the block (glibc returns null) revokes it like `free`.
///
/// # Safety
///
/// Same contract as `realloc`; a shadow-stack frame with slots 0 and 1 must be active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_realloc(ptr: *mut c_void, size: usize) -> *mut c_void {
    if ptr.is_null() {
        // SAFETY: forwarded caller contract.
        return unsafe { __ptrmeta_malloc(size) };
    }
    let old = with_runtime(|rt| rt.load_slot(1));
    // SAFETY: forwarded caller contract.
    let new = unsafe { libc::realloc(ptr, size) };
    with_runtime(|rt| {
        if new.is_null() {
            rt.store_null_return()?;
            if size == 0 {
                rt.deallocate(addr(ptr), old.key, old.lock)?;
            }
            return Ok(());
        }
        let (from, to) = (addr(ptr), addr(new));
        if from != to {
            let old_len = old.bound.saturating_sub(old.base);
            let len = if old_len == 0 { size } else { old_len.min(size) };
            rt.preallocate(to)?;
            rt.copy_metadata(to, from, len)?;
            rt.relocate(from, to, old.key)?;
        }
        let bound = to.saturating_add(size);
        rt.store_return(&Metadata::new(to, bound, old.key, old.lock))
    });
    new
}

// ---------------------------------------------------------------------------
// memcpy / memmove / memset
// ---------------------------------------------------------------------------

/// `memcpy` that also copies trie metadata and returns `dest`'s metadata.
///
/// # Safety
///
/// Same contract as `memcpy`; a shadow-stack frame with slots 0 and 1 must be active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_memcpy(
    dest: *mut c_void,
    src: *const c_void,
    n: usize,
) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    let ret = unsafe { libc::memcpy(dest, src, n) };
    with_runtime(|rt| {
        rt.copy_metadata(addr(dest), addr(src), n)?;
        rt.propagate_slot(1, 0)
    });
    ret
}

/// `memmove` that also moves trie metadata and returns `dest`'s metadata.
///
/// # Safety
///
/// Same contract as `memmove`; a shadow-stack frame with slots 0 and 1 must be active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_memmove(
    dest: *mut c_void,
    src: *const c_void,
    n: usize,
) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    let ret = unsafe { libc::memmove(dest, src, n) };
    with_runtime(|rt| {
        rt.copy_metadata(addr(dest), addr(src), n)?;
        rt.propagate_slot(1, 0)
    });
    ret
}

/// `memset` that returns `dest`'s metadata.
///
/// # Safety
///
/// Same contract as `memset`; a shadow-stack frame with slots 0 and 1 must be active.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_memset(dest: *mut c_void, c: c_int, n: usize) -> *mut c_void {
    // SAFETY: forwarded caller contract.
    let ret = unsafe { libc::memset(dest, c, n) };
    with_runtime(|rt| rt.propagate_slot(1, 0));
    ret
}

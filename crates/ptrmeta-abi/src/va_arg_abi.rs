//! ABI layer for variadic functions.
//!
//! `va_start` opens a proxy over the variadic slots of the current frame and
//! attaches it to the `va_list` object; every pointer-typed `va_arg` pulls
//! the next entry. A `va_list` handed to another function travels as a
//! proxy in that function's argument slot. Proxies are returned as opaque
//! non-null pointers; null means no proxy.

use std::ffi::{c_int, c_void};

use crate::state::{read_runtime, with_runtime};
use crate::util::{addr, as_ptr, slot_index, write_out};

// ---------------------------------------------------------------------------
// proxy lifetime
// ---------------------------------------------------------------------------

/// Proxy positioned at slot `arg_no`, the first variadic pointer slot.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_allocate_va_arg_proxy(arg_no: c_int) -> *mut c_void {
    as_ptr(with_runtime(|rt| rt.allocate_va_arg_proxy(slot_index(arg_no))))
}

/// `va_copy`: a second proxy at the same position.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_copy_va_arg_proxy(proxy: *const c_void) -> *mut c_void {
    as_ptr(with_runtime(|rt| rt.copy_va_arg_proxy(addr(proxy))))
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_free_va_arg_proxy(proxy: *const c_void) {
    with_runtime(|rt| rt.free_va_arg_proxy(addr(proxy)));
}

/// Metadata of the next variadic pointer; advances the proxy.
///
/// # Safety
///
/// Every non-null output pointer must be valid for a write.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn __ptrmeta_next_va_arg_metadata(
    proxy: *const c_void,
    base_out: *mut *mut c_void,
    bound_out: *mut *mut c_void,
    key_out: *mut u64,
    lock_out: *mut *mut c_void,
) {
    let meta = with_runtime(|rt| rt.next_va_arg_metadata(addr(proxy)));
    // SAFETY: forwarded caller contract.
    unsafe {
        write_out(base_out, as_ptr(meta.base));
        write_out(bound_out, as_ptr(meta.bound));
        write_out(key_out, meta.key);
        write_out(lock_out, as_ptr(meta.lock));
    }
}

// ---------------------------------------------------------------------------
// proxies in shadow-stack slots
// ---------------------------------------------------------------------------

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_store_proxy_shadow_stack(proxy: *const c_void, arg_no: c_int) {
    with_runtime(|rt| rt.store_proxy_slot(slot_index(arg_no), addr(proxy)));
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_load_proxy_shadow_stack(arg_no: c_int) -> *mut c_void {
    as_ptr(with_runtime(|rt| rt.load_proxy_slot(slot_index(arg_no))))
}

// ---------------------------------------------------------------------------
// proxies in the trie
// ---------------------------------------------------------------------------

/// Attach `proxy` to the `va_list` object at `addr_of_va_list`.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_proxy_metadata_store(addr_of_va_list: *const c_void, proxy: *const c_void) {
    with_runtime(|rt| rt.proxy_metadata_store(addr(addr_of_va_list), addr(proxy)));
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_proxy_metadata_load(addr_of_va_list: *const c_void) -> *mut c_void {
    as_ptr(read_runtime(|rt| rt.proxy_metadata_load(addr(addr_of_va_list))))
}

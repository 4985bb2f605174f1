//! ABI layer for the shadow stack.
//!
//! The caller pushes a frame with one slot for the return value plus one per
//! pointer argument, fills the argument slots, calls, reads slot 0 and pops.
//! The callee reads its argument slots on entry and writes slot 0 before
//! returning. Argument numbers are C `int`s.

use std::ffi::{c_int, c_void};

use ptrmeta_membrane::Metadata;

use crate::state::with_runtime;
use crate::util::{addr, as_ptr, metadata, slot_index};

// ---------------------------------------------------------------------------
// frames
// ---------------------------------------------------------------------------

/// Push a frame with `num_slots` metadata slots.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_allocate_shadow_stack_space(num_slots: c_int) {
    let slots = usize::try_from(num_slots).unwrap_or(0);
    with_runtime(|rt| rt.allocate_frame(slots));
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_deallocate_shadow_stack_space() {
    with_runtime(|rt| rt.deallocate_frame());
}

// ---------------------------------------------------------------------------
// per-field loads
// ---------------------------------------------------------------------------

fn load(arg_no: c_int) -> Metadata {
    with_runtime(|rt| rt.load_slot(slot_index(arg_no)))
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_load_base_shadow_stack(arg_no: c_int) -> *mut c_void {
    as_ptr(load(arg_no).base)
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_load_bound_shadow_stack(arg_no: c_int) -> *mut c_void {
    as_ptr(load(arg_no).bound)
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_load_key_shadow_stack(arg_no: c_int) -> u64 {
    load(arg_no).key
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_load_lock_shadow_stack(arg_no: c_int) -> *mut c_void {
    as_ptr(load(arg_no).lock)
}

// ---------------------------------------------------------------------------
// per-field stores
// ---------------------------------------------------------------------------

fn update(arg_no: c_int, edit: impl FnOnce(&mut Metadata)) {
    let slot = slot_index(arg_no);
    with_runtime(|rt| {
        let mut meta = rt.load_slot(slot)?;
        edit(&mut meta);
        rt.store_slot(slot, &meta)
    });
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_store_base_shadow_stack(base: *const c_void, arg_no: c_int) {
    update(arg_no, |m| m.base = addr(base));
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_store_bound_shadow_stack(bound: *const c_void, arg_no: c_int) {
    update(arg_no, |m| m.bound = addr(bound));
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_store_key_shadow_stack(key: u64, arg_no: c_int) {
    update(arg_no, |m| m.key = key);
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_store_lock_shadow_stack(lock: *const c_void, arg_no: c_int) {
    update(arg_no, |m| m.lock = addr(lock));
}

/// Store all fields of slot `arg_no` at once.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_store_metadata_shadow_stack(
    base: *const c_void,
    bound: *const c_void,
    key: u64,
    lock: *const c_void,
    arg_no: c_int,
) {
    let meta = metadata(base, bound, key, lock);
    with_runtime(|rt| rt.store_slot(slot_index(arg_no), &meta));
}

// ---------------------------------------------------------------------------
// return slot
// ---------------------------------------------------------------------------

/// Copy slot `from_arg` to slot `to_arg` of the current frame.
#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_propagate_metadata_shadow_stack_from(from_arg: c_int, to_arg: c_int) {
    with_runtime(|rt| rt.propagate_slot(slot_index(from_arg), slot_index(to_arg)));
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_store_null_return_metadata() {
    with_runtime(|rt| rt.store_null_return());
}

#[unsafe(no_mangle)]
pub extern "C" fn __ptrmeta_store_return_metadata(
    base: *const c_void,
    bound: *const c_void,
    key: u64,
    lock: *const c_void,
) {
    let meta = metadata(base, bound, key, lock);
    with_runtime(|rt| rt.store_return(&meta));
}

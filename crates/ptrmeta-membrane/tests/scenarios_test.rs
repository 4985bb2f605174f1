use ptrmeta_membrane::free_map::FreeMap;
use ptrmeta_membrane::{
    Metadata, Runtime, RuntimeConfig, Spatial, SpatialTemporal, StackLockPolicy, Violation,
};

fn runtime() -> Runtime<SpatialTemporal> {
    Runtime::new(RuntimeConfig::compact()).expect("runtime")
}

#[test]
fn one_past_the_end_is_rejected() {
    let mut rt = runtime();
    let x = 0x5000_0000_usize;
    let y = 0x6000_0040_usize;
    let meta = rt.allocate_object(x, 8).expect("allocate A");
    rt.metadata_store(y, &meta).expect("store pointer metadata at Y");

    rt.check_dereference_via(y, x + 7, 1).expect("X+7 is the last byte");
    assert_eq!(
        rt.check_dereference_via(y, x + 8, 1),
        Err(Violation::OutOfBounds {
            ptr: x + 8,
            base: x,
            bound: x + 8,
            width: 1
        })
    );
}

#[test]
fn spatial_only_mode_same_scenario() {
    let mut rt = Runtime::<Spatial>::new(RuntimeConfig::compact()).expect("runtime");
    let x = 0x5000_0000_usize;
    rt.metadata_store(0x40, &Metadata::bounds(x, x + 8))
        .expect("store");
    rt.check_dereference_via(0x40, x + 7, 1).expect("in bounds");
    assert!(rt.check_dereference_via(0x40, x + 8, 1).is_err());
}

#[test]
fn stale_pointer_fails_after_lock_reuse() {
    let mut rt = runtime();
    let x = 0x7000_0000_usize;
    let first = rt.allocate_object(x, 32).expect("allocate K1");
    rt.deallocate(x, first.key, first.lock).expect("free K1");
    assert_eq!(rt.temporal().and_then(|t| t.tracked_allocations()), Some(0));

    let second = rt.allocate_object(x, 32).expect("allocate K2");
    assert_eq!(second.lock, first.lock, "lock cell is reused");
    assert_ne!(second.key, first.key);

    rt.check_dereference(x, 8, &second).expect("fresh pointer");
    assert!(matches!(
        rt.check_dereference(x, 8, &first),
        Err(Violation::KeyMismatch { observed, .. }) if observed == second.key
    ));
}

#[test]
fn two_pointer_arguments_and_a_pointer_result() {
    let mut rt = runtime();
    let a = rt.allocate_object(0x1000, 16).expect("a");
    let b = rt.allocate_object(0x2000, 64).expect("b");

    // Caller: frame with the return slot plus two argument slots.
    let sp = rt.shadow_stack().stack_pointer();
    rt.allocate_frame(3).expect("push");
    rt.store_slot(1, &a).expect("arg 1");
    rt.store_slot(2, &b).expect("arg 2");

    // Callee.
    assert_eq!(rt.load_slot(1), Ok(a));
    assert_eq!(rt.load_slot(2), Ok(b));
    rt.store_return(&b).expect("return b");

    // Caller after return.
    assert_eq!(rt.load_slot(0), Ok(b));
    rt.deallocate_frame().expect("pop");
    assert_eq!(rt.shadow_stack().stack_pointer(), sp);
}

#[test]
fn nested_call_does_not_clobber_caller_slots() {
    let mut rt = runtime();
    let outer = Metadata::new(0x1000, 0x1010, 2, rt.global_lock());
    let inner = Metadata::new(0x3000, 0x3008, 3, rt.global_lock());

    rt.allocate_frame(2).expect("outer");
    rt.store_slot(1, &outer).expect("store");
    rt.allocate_frame(2).expect("inner");
    rt.store_slot(1, &inner).expect("store");
    rt.store_return(&inner).expect("return");
    rt.deallocate_frame().expect("pop inner");
    assert_eq!(rt.load_slot(1), Ok(outer));
    rt.deallocate_frame().expect("pop outer");
    assert_eq!(rt.deallocate_frame(), Err(Violation::ShadowStackUnderflow));
}

#[test]
fn frame_push_pop_is_balanced_up_to_capacity() {
    let mut rt = runtime();
    let words = rt.config().shadow_stack_words;
    let max_slots = (words - 4) / 4;
    for n in [0, 1, 7, max_slots] {
        let sp = rt.shadow_stack().stack_pointer();
        rt.allocate_frame(n).expect("push");
        rt.deallocate_frame().expect("pop");
        assert_eq!(rt.shadow_stack().stack_pointer(), sp);
    }
    assert!(rt.allocate_frame(max_slots + 1).is_err());
}

#[test]
fn free_map_insert_remove_remove() {
    let mut map = FreeMap::new(1024).expect("map");
    map.insert(42, 0xABC0).expect("insert");
    map.remove(42, 0xABC0).expect("remove");
    assert_eq!(
        map.remove(42, 0xABC0),
        Err(Violation::InvalidFree {
            ptr: 0xABC0,
            key: 42
        })
    );
}

#[test]
fn realloc_keeps_identity_and_metadata() {
    let mut rt = runtime();
    let old = 0x10_0000_usize;
    let new = 0x90_0000_usize;
    let meta = rt.allocate_object(old, 16).expect("allocate");
    let pointee = Metadata::new(0x4444_0000, 0x4444_0010, 7, rt.global_lock());
    rt.metadata_store(old + 8, &pointee).expect("pointer inside the block");

    rt.copy_metadata(new, old, 16).expect("copy");
    rt.relocate(old, new, meta.key).expect("relocate");

    assert_eq!(rt.metadata_load(new + 8), pointee);
    assert!(rt.deallocate(old, meta.key, meta.lock).is_err());
    rt.deallocate(new, meta.key, meta.lock).expect("free at new address");
}

#[test]
fn shared_stack_lock_is_never_invalidated() {
    let mut rt = Runtime::<SpatialTemporal>::new(RuntimeConfig {
        stack_lock_policy: StackLockPolicy::Shared,
        ..RuntimeConfig::compact()
    })
    .expect("runtime");
    let (key, lock) = rt.stack_allocate().expect("stack");
    assert_eq!(lock, rt.global_lock());
    rt.stack_deallocate(key).expect("noop");
    rt.check_temporal(key, lock).expect("coarse: still valid");
}

#[test]
fn per_call_stack_lock_is_invalidated_on_return() {
    let mut rt = runtime();
    let (key, lock) = rt.stack_allocate().expect("stack");
    rt.check_temporal(key, lock).expect("live during the call");
    rt.stack_deallocate(key).expect("return");
    assert!(matches!(
        rt.check_temporal(key, lock),
        Err(Violation::KeyMismatch { .. })
    ));
}

#[test]
fn null_is_never_a_tracked_allocation() {
    let mut rt = runtime();
    assert_eq!(rt.allocate(0), Err(Violation::UntrackableAddress { addr: 0 }));
    assert_eq!(rt.temporal().and_then(|t| t.tracked_allocations()), Some(0));

    let real = rt.allocate_object(0x7800_0000, 8).expect("allocate");
    assert!(rt.deallocate(0, real.key, real.lock).is_err());
    rt.deallocate(0x7800_0000, real.key, real.lock).expect("free");
}

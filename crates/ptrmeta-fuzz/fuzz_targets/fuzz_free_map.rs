#![no_main]
use std::collections::HashMap;

use libfuzzer_sys::fuzz_target;
use ptrmeta_membrane::free_map::FreeMap;

fuzz_target!(|data: &[u8]| {
    let Ok(mut map) = FreeMap::new(32) else {
        return;
    };
    // addr -> key of the live allocation there.
    let mut live: HashMap<usize, u64> = HashMap::new();
    let mut next_key = 2_u64;

    // Each 2-byte chunk is (op, addr); a small address domain forces collisions.
    for chunk in data.chunks_exact(2) {
        let addr = usize::from(chunk[1] % 48) * 8 + 0x1000;
        match (chunk[0] % 3, live.get(&addr).copied()) {
            (0, None) => {
                let key = next_key;
                next_key += 1;
                if map.insert(key, addr).is_ok() {
                    live.insert(addr, key);
                } else {
                    assert_eq!(map.len(), map.capacity());
                }
            }
            (1, Some(key)) => {
                assert!(map.remove(key, addr).is_ok());
                live.remove(&addr);
                assert!(map.remove(key, addr).is_err(), "double free must be caught");
            }
            (1, None) => assert!(map.remove(next_key, addr).is_err()),
            (_, Some(key)) => assert!(map.contains(key, addr)),
            _ => {}
        }
        assert_eq!(map.len(), live.len());
    }
});

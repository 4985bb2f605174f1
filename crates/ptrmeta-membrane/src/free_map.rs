//! Open-addressed set of live allocations.
//!
//! Records `(key, addr)` on allocation so that deallocation can verify the
//! address is live, catching double frees and frees of untracked pointers.
//! Probing is linear from `key % capacity`. Removal leaves a tombstone so
//! that probe chains passing through the slot stay intact. The capacity is
//! fixed; filling every slot is reported as exhaustion.

use crate::layout::Key;
use crate::mapping::MappedTable;
use crate::violation::{Resource, Violation};

const EMPTY: usize = 0;
const TOMBSTONE: usize = usize::MAX;

pub struct FreeMap {
    slots: MappedTable<usize>,
    live: usize,
}

impl FreeMap {
    pub fn new(capacity: usize) -> Result<Self, Violation> {
        let slots = MappedTable::new(capacity).map_err(|err| {
            log::error!("free map reservation of {capacity} slots failed: {err}");
            Violation::Exhausted(Resource::FreeMap)
        })?;
        Ok(Self { slots, live: 0 })
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Live records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.live
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    fn probe(&self, key: Key) -> impl Iterator<Item = usize> + use<> {
        let cap = self.slots.len();
        let start = (key % cap as u64) as usize;
        (0..cap).map(move |i| (start + i) % cap)
    }

    /// Record a live allocation at `addr`. The two marker values cannot be
    /// recorded.
    pub fn insert(&mut self, key: Key, addr: usize) -> Result<(), Violation> {
        if addr == EMPTY || addr == TOMBSTONE {
            return Err(Violation::UntrackableAddress { addr });
        }
        for pos in self.probe(key) {
            let tag = self.slots[pos];
            if tag == EMPTY || tag == TOMBSTONE {
                self.slots[pos] = addr;
                self.live += 1;
                return Ok(());
            }
        }
        Err(Violation::Exhausted(Resource::FreeMap))
    }

    /// Remove the record for `addr`. Missing records are invalid frees.
    pub fn remove(&mut self, key: Key, addr: usize) -> Result<(), Violation> {
        if addr == EMPTY || addr == TOMBSTONE {
            return Err(Violation::InvalidFree { ptr: addr, key });
        }
        for pos in self.probe(key) {
            match self.slots[pos] {
                tag if tag == addr => {
                    self.slots[pos] = TOMBSTONE;
                    self.live -= 1;
                    return Ok(());
                }
                EMPTY => break,
                _ => {}
            }
        }
        Err(Violation::InvalidFree { ptr: addr, key })
    }

    /// Whether `addr` is recorded under `key`.
    #[must_use]
    pub fn contains(&self, key: Key, addr: usize) -> bool {
        if addr == EMPTY || addr == TOMBSTONE {
            return false;
        }
        for pos in self.probe(key) {
            match self.slots[pos] {
                tag if tag == addr => return true,
                EMPTY => return false,
                _ => {}
            }
        }
        false
    }
}

impl std::fmt::Debug for FreeMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeMap")
            .field("capacity", &self.slots.len())
            .field("live", &self.live)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_then_remove() {
        let mut map = FreeMap::new(64).expect("map");
        map.insert(5, 0x1000).expect("insert");
        assert!(map.contains(5, 0x1000));
        assert_eq!(map.len(), 1);
        map.remove(5, 0x1000).expect("remove");
        assert!(map.is_empty());
    }

    #[test]
    fn double_remove_is_invalid_free() {
        let mut map = FreeMap::new(64).expect("map");
        map.insert(5, 0x1000).expect("insert");
        map.remove(5, 0x1000).expect("remove");
        assert_eq!(
            map.remove(5, 0x1000),
            Err(Violation::InvalidFree {
                ptr: 0x1000,
                key: 5
            })
        );
    }

    #[test]
    fn untracked_address_is_invalid_free() {
        let mut map = FreeMap::new(64).expect("map");
        map.insert(5, 0x1000).expect("insert");
        assert!(matches!(
            map.remove(5, 0x2000),
            Err(Violation::InvalidFree { ptr: 0x2000, .. })
        ));
    }

    #[test]
    fn marker_addresses_are_never_recorded() {
        let mut map = FreeMap::new(16).expect("map");
        assert_eq!(map.insert(4, 0), Err(Violation::UntrackableAddress { addr: 0 }));
        assert_eq!(
            map.insert(4, usize::MAX),
            Err(Violation::UntrackableAddress { addr: usize::MAX })
        );
        assert!(map.is_empty());
        assert!(!map.contains(4, 0));
        assert_eq!(map.remove(4, 0), Err(Violation::InvalidFree { ptr: 0, key: 4 }));
    }

    #[test]
    fn colliding_keys_probe_past_tombstones() {
        let mut map = FreeMap::new(8).expect("map");
        // Keys 1, 9 and 17 all start at slot 1.
        map.insert(1, 0xA0).expect("insert");
        map.insert(9, 0xB0).expect("insert");
        map.insert(17, 0xC0).expect("insert");
        map.remove(9, 0xB0).expect("remove");
        // 0xC0 lies behind the tombstone and must still be found.
        assert!(map.contains(17, 0xC0));
        map.remove(17, 0xC0).expect("remove through tombstone");
        // The tombstone is reused by the next colliding insert.
        map.insert(25, 0xD0).expect("insert");
        assert!(map.contains(25, 0xD0));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn probe_wraps_around() {
        let mut map = FreeMap::new(4).expect("map");
        map.insert(3, 0x10).expect("insert");
        map.insert(3, 0x20).expect("insert");
        assert!(map.contains(3, 0x20));
        map.remove(3, 0x20).expect("remove");
    }

    #[test]
    fn full_map_is_exhausted() {
        let mut map = FreeMap::new(4).expect("map");
        for i in 0..4 {
            map.insert(i, 0x100 + i as usize * 0x10).expect("insert");
        }
        assert_eq!(
            map.insert(9, 0x900),
            Err(Violation::Exhausted(Resource::FreeMap))
        );
        // Every slot occupied and none matches.
        assert!(matches!(
            map.remove(0, 0x999),
            Err(Violation::InvalidFree { .. })
        ));
    }
}

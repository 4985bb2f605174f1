//! Key/lock allocation for temporal safety.
//!
//! Every tracked object gets a fresh key from a strictly increasing counter
//! and a lock: the address of a cell that holds the key for as long as the
//! object lives. Deallocation zeroes the cell, so any pointer that captured
//! the old key fails `*lock == key` from then on, even after the cell has
//! been handed to a new object with a newer key.
//!
//! Heap cells come from a fixed arena with an index-linked free list. Stack
//! cells are either a LIFO arena released on function return or, under the
//! shared policy, the global lock.

use log::debug;

use crate::config::StackLockPolicy;
use crate::free_map::FreeMap;
use crate::layout::{FIRST_KEY, GLOBAL_KEY, Key, Lock};
use crate::mapping::MappedTable;
use crate::violation::{Resource, Violation};

const NIL: u32 = u32::MAX;

/// Fixed arena of heap lock cells with O(1) reuse.
struct LockArena {
    cells: MappedTable<u64>,
    links: MappedTable<u32>,
    free_head: u32,
    bump: usize,
}

impl LockArena {
    fn new(capacity: usize) -> Result<Self, Violation> {
        let exhausted = |err: std::io::Error| {
            log::error!("lock arena reservation of {capacity} cells failed: {err}");
            Violation::Exhausted(Resource::LockArena)
        };
        Ok(Self {
            cells: MappedTable::new(capacity).map_err(exhausted)?,
            links: MappedTable::new(capacity).map_err(exhausted)?,
            free_head: NIL,
            bump: 0,
        })
    }

    fn acquire(&mut self) -> Result<usize, Violation> {
        if self.free_head != NIL {
            let idx = self.free_head as usize;
            self.free_head = self.links[idx];
            return Ok(idx);
        }
        if self.bump == self.cells.len() {
            return Err(Violation::Exhausted(Resource::LockArena));
        }
        self.bump += 1;
        Ok(self.bump - 1)
    }

    fn release(&mut self, idx: usize) {
        self.cells[idx] = 0;
        self.links[idx] = self.free_head;
        // Arena capacity is validated to fit u32 links.
        self.free_head = idx as u32;
    }
}

/// LIFO arena of per-call stack lock cells.
struct LockStack {
    cells: MappedTable<u64>,
    top: usize,
}

enum StackLocks {
    PerCall(LockStack),
    Shared,
}

/// Issues and revokes (key, lock) pairs.
pub struct TemporalAllocator {
    next_key: Key,
    global: MappedTable<u64>,
    heap: LockArena,
    stack: StackLocks,
    free_map: Option<FreeMap>,
}

impl TemporalAllocator {
    /// `free_map_entries` of `None` disables free-map validation.
    pub fn new(
        lock_entries: usize,
        stack_policy: StackLockPolicy,
        stack_lock_entries: usize,
        free_map_entries: Option<usize>,
    ) -> Result<Self, Violation> {
        let mut global = MappedTable::new(1).map_err(|err| {
            log::error!("global lock reservation failed: {err}");
            Violation::Exhausted(Resource::LockArena)
        })?;
        global[0] = GLOBAL_KEY;

        let stack = match stack_policy {
            StackLockPolicy::PerCall => StackLocks::PerCall(LockStack {
                cells: MappedTable::new(stack_lock_entries).map_err(|err| {
                    log::error!("stack lock reservation failed: {err}");
                    Violation::Exhausted(Resource::StackLockArena)
                })?,
                top: 0,
            }),
            StackLockPolicy::Shared => StackLocks::Shared,
        };
        let free_map = free_map_entries.map(FreeMap::new).transpose()?;

        debug!(
            "temporal allocator: {lock_entries} heap locks, {stack_policy:?} stack locks, free map {}",
            if free_map.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            next_key: FIRST_KEY,
            global,
            heap: LockArena::new(lock_entries)?,
            stack,
            free_map,
        })
    }

    /// Address of the cell permanently holding [`GLOBAL_KEY`].
    #[must_use]
    pub fn global_lock(&self) -> Lock {
        self.global.base_addr()
    }

    #[must_use]
    pub fn stack_policy(&self) -> StackLockPolicy {
        match self.stack {
            StackLocks::PerCall(_) => StackLockPolicy::PerCall,
            StackLocks::Shared => StackLockPolicy::Shared,
        }
    }

    /// Live heap allocations recorded in the free map, if enabled.
    #[must_use]
    pub fn tracked_allocations(&self) -> Option<usize> {
        self.free_map.as_ref().map(FreeMap::len)
    }

    fn fresh_key(&mut self) -> Key {
        let key = self.next_key;
        self.next_key += 1;
        key
    }

    /// Issue a key and lock for a heap object at `ptr`.
    pub fn allocate(&mut self, ptr: usize) -> Result<(Key, Lock), Violation> {
        if ptr == 0 {
            return Err(Violation::UntrackableAddress { addr: ptr });
        }
        let idx = self.heap.acquire()?;
        let key = self.fresh_key();
        if let Some(map) = self.free_map.as_mut() {
            if let Err(err) = map.insert(key, ptr) {
                self.heap.release(idx);
                return Err(err);
            }
        }
        self.heap.cells[idx] = key;
        Ok((key, self.heap.cells.addr_of(idx)))
    }

    /// Revoke the heap object at `ptr` identified by `(key, lock)`.
    pub fn deallocate(&mut self, ptr: usize, key: Key, lock: Lock) -> Result<(), Violation> {
        let idx = self
            .heap
            .cells
            .index_of(lock)
            .ok_or(Violation::UnknownLock { key, lock })?;
        if self.heap.cells[idx] != key {
            return Err(Violation::InvalidFree { ptr, key });
        }
        if let Some(map) = self.free_map.as_mut() {
            map.remove(key, ptr)?;
        }
        self.heap.release(idx);
        Ok(())
    }

    /// Move the free-map record of a live allocation to a new address.
    pub fn relocate(&mut self, old: usize, new: usize, key: Key) -> Result<(), Violation> {
        if let Some(map) = self.free_map.as_mut() {
            map.remove(key, old)?;
            if let Err(err) = map.insert(key, new) {
                // The slot just vacated at `old` is still free.
                map.insert(key, old)?;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Issue a key and lock for the stack objects of one call.
    pub fn stack_allocate(&mut self) -> Result<(Key, Lock), Violation> {
        let global = self.global_lock();
        let StackLocks::PerCall(stack) = &mut self.stack else {
            return Ok((GLOBAL_KEY, global));
        };
        if stack.top == stack.cells.len() {
            return Err(Violation::Exhausted(Resource::StackLockArena));
        }
        let idx = stack.top;
        stack.top += 1;
        let key = self.next_key;
        self.next_key += 1;
        stack.cells[idx] = key;
        Ok((key, stack.cells.addr_of(idx)))
    }

    /// Revoke the most recent stack key. Must match [`stack_allocate`](Self::stack_allocate) order.
    pub fn stack_deallocate(&mut self, key: Key) -> Result<(), Violation> {
        let StackLocks::PerCall(stack) = &mut self.stack else {
            return Ok(());
        };
        let Some(top) = stack.top.checked_sub(1) else {
            return Err(Violation::StackLockOrder { key, observed: 0 });
        };
        let observed = stack.cells[top];
        if observed != key {
            return Err(Violation::StackLockOrder { key, observed });
        }
        stack.cells[top] = 0;
        stack.top = top;
        Ok(())
    }

    /// Current content of the lock cell at `lock`.
    pub fn observe(&self, key: Key, lock: Lock) -> Result<u64, Violation> {
        if lock == self.global.base_addr() {
            return Ok(self.global[0]);
        }
        if let Some(idx) = self.heap.cells.index_of(lock) {
            return Ok(self.heap.cells[idx]);
        }
        if let StackLocks::PerCall(stack) = &self.stack {
            if let Some(idx) = stack.cells.index_of(lock) {
                return Ok(stack.cells[idx]);
            }
        }
        Err(Violation::UnknownLock { key, lock })
    }

    /// Temporal check: the object captured as `(key, lock)` is still alive.
    pub fn check(&self, key: Key, lock: Lock) -> Result<(), Violation> {
        let observed = self.observe(key, lock)?;
        if observed != key {
            return Err(Violation::KeyMismatch {
                key,
                lock,
                observed,
            });
        }
        Ok(())
    }
}

impl std::fmt::Debug for TemporalAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemporalAllocator")
            .field("next_key", &self.next_key)
            .field("global_lock", &format_args!("{:#x}", self.global_lock()))
            .field("stack_policy", &self.stack_policy())
            .field("free_map", &self.free_map)
            .finish_non_exhaustive()
    }
}

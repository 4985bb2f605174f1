//! Shadow stack for passing metadata across calls.
//!
//! A word array holding nested, self-describing frames:
//!
//! ```text
//! [prev_size, cur_size, slot 0, slot 1, ..., slot n-1]
//!  ^ ptr
//! ```
//!
//! `prev_size` is the slot-area size (in words) of the frame below, which is
//! enough to pop back to it. Slot 0 carries the return value's metadata,
//! slots 1.. carry pointer arguments in declaration order. The root frame
//! at word 0 has no slots.

use std::marker::PhantomData;

use log::trace;

use crate::layout::MetadataLayout;
use crate::mapping::MappedTable;
use crate::violation::{Resource, Violation};

/// Word range `[next, end)` of consecutive slots in one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotSpan {
    pub next: usize,
    pub end: usize,
}

pub struct ShadowStack<M: MetadataLayout> {
    words: MappedTable<usize>,
    ptr: usize,
    depth: usize,
    _layout: PhantomData<M>,
}

impl<M: MetadataLayout> ShadowStack<M> {
    pub fn new(capacity_words: usize) -> Result<Self, Violation> {
        let words = MappedTable::new(capacity_words.max(2)).map_err(|err| {
            log::error!("shadow stack reservation of {capacity_words} words failed: {err}");
            Violation::Exhausted(Resource::ShadowStack)
        })?;
        Ok(Self {
            words,
            ptr: 0,
            depth: 0,
            _layout: PhantomData,
        })
    }

    /// Word index of the current frame header.
    #[must_use]
    pub fn stack_pointer(&self) -> usize {
        self.ptr
    }

    /// Frames above the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Slots in the current frame.
    #[must_use]
    pub fn frame_slots(&self) -> usize {
        self.words[self.ptr + 1] / M::FIELDS
    }

    /// Push a frame with `slots` metadata slots.
    pub fn allocate_frame(&mut self, slots: usize) -> Result<(), Violation> {
        let current = self.words[self.ptr + 1];
        let size = slots
            .checked_mul(M::FIELDS)
            .ok_or(Violation::Exhausted(Resource::ShadowStack))?;
        let next = self.ptr + current + 2;
        let end = size
            .checked_add(next + 2)
            .ok_or(Violation::Exhausted(Resource::ShadowStack))?;
        if end > self.words.len() {
            return Err(Violation::Exhausted(Resource::ShadowStack));
        }
        self.words[next] = current;
        self.words[next + 1] = size;
        self.ptr = next;
        self.depth += 1;
        trace!("shadow stack push: {slots} slots at word {next}");
        Ok(())
    }

    /// Pop the current frame.
    pub fn deallocate_frame(&mut self) -> Result<(), Violation> {
        if self.depth == 0 {
            return Err(Violation::ShadowStackUnderflow);
        }
        let previous = self.words[self.ptr];
        self.ptr -= previous + 2;
        self.depth -= 1;
        trace!("shadow stack pop: back to word {}", self.ptr);
        Ok(())
    }

    fn slot_offset(&self, slot: usize) -> Result<usize, Violation> {
        let size = self.words[self.ptr + 1];
        let slots = size / M::FIELDS;
        if slot >= slots {
            return Err(Violation::SlotOutsideFrame { slot, slots });
        }
        Ok(self.ptr + 2 + slot * M::FIELDS)
    }

    pub fn load_slot(&self, slot: usize) -> Result<M, Violation> {
        let off = self.slot_offset(slot)?;
        Ok(bytemuck::cast_slice::<usize, M>(&self.words[off..off + M::FIELDS])[0])
    }

    pub fn store_slot(&mut self, slot: usize, entry: M) -> Result<(), Violation> {
        let off = self.slot_offset(slot)?;
        bytemuck::cast_slice_mut::<usize, M>(&mut self.words[off..off + M::FIELDS])[0] = entry;
        Ok(())
    }

    /// Copy slot `from` to slot `to` within the current frame.
    pub fn propagate_slot(&mut self, from: usize, to: usize) -> Result<(), Violation> {
        let entry = self.load_slot(from)?;
        self.store_slot(to, entry)
    }

    /// Zero the return slot.
    pub fn store_null_return(&mut self) -> Result<(), Violation> {
        self.store_slot(0, M::default())
    }

    /// Slots `slot..` of the current frame. `slot` may equal the slot count:
    /// a variadic call need not pass any pointer.
    pub fn slot_span(&self, slot: usize) -> Result<SlotSpan, Violation> {
        let size = self.words[self.ptr + 1];
        let slots = size / M::FIELDS;
        if slot > slots {
            return Err(Violation::SlotOutsideFrame { slot, slots });
        }
        Ok(SlotSpan {
            next: self.ptr + 2 + slot * M::FIELDS,
            end: self.ptr + 2 + size,
        })
    }

    /// First entry of `span`. `None` once the span is used up or its frame
    /// has been popped.
    pub fn read_span(&self, span: SlotSpan) -> Option<M> {
        let live_end = self.ptr + 2 + self.words[self.ptr + 1];
        let entry_end = span.next.checked_add(M::FIELDS)?;
        if span.next < 2 || entry_end > span.end || span.end > live_end {
            return None;
        }
        Some(bytemuck::cast_slice::<usize, M>(&self.words[span.next..entry_end])[0])
    }
}

impl<M: MetadataLayout> std::fmt::Debug for ShadowStack<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShadowStack")
            .field("capacity", &self.words.len())
            .field("ptr", &self.ptr)
            .field("depth", &self.depth)
            .finish()
    }
}

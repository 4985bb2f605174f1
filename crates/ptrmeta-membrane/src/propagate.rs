//! Metadata propagation for block copies.
//!
//! The trie is keyed by absolute address, so copying bytes that contain
//! pointers leaves the destination's entries stale. `copy_metadata` moves the
//! entries along with the data.

use log::trace;

use crate::config::PRIMARY_SHIFT;
use crate::layout::MetadataLayout;
use crate::trie::MetadataTrie;
use crate::violation::Violation;

impl<M: MetadataLayout> MetadataTrie<M> {
    /// Copy the entries for `len` bytes at `src` to the entries for `dest`.
    ///
    /// Unaligned sources cannot hold pointers and are ignored. Destination
    /// words whose source segment was never installed are reset to zero, so
    /// afterwards `load(dest + i) == load(src + i)` for every copied word.
    /// Overlapping ranges behave like `memmove`.
    ///
    /// Returns the number of entries copied.
    pub fn copy_metadata(
        &mut self,
        dest: usize,
        src: usize,
        len: usize,
    ) -> Result<usize, Violation> {
        let words = len / 8;
        if src % 8 != 0 || words == 0 {
            return Ok(0);
        }
        let span = (words - 1) * 8;
        let src_last = src
            .checked_add(span)
            .ok_or(Violation::UntrackableAddress { addr: src })?;
        let dest_last = dest
            .checked_add(span)
            .ok_or(Violation::UntrackableAddress { addr: dest })?;

        trace!("copy_metadata dest={dest:#x} src={src:#x} words={words}");

        let src_seg = src >> PRIMARY_SHIFT;
        let dest_seg = dest >> PRIMARY_SHIFT;
        if src_seg == src_last >> PRIMARY_SHIFT && dest_seg == dest_last >> PRIMARY_SHIFT {
            self.copy_within_segments(dest, src, words)?;
        } else if dest > src {
            for i in (0..words).rev() {
                self.copy_word(dest + i * 8, src + i * 8)?;
            }
        } else {
            for i in 0..words {
                self.copy_word(dest + i * 8, src + i * 8)?;
            }
        }
        Ok(words)
    }

    /// Both ranges each lie inside a single segment.
    fn copy_within_segments(
        &mut self,
        dest: usize,
        src: usize,
        words: usize,
    ) -> Result<(), Violation> {
        let (src_seg, src_idx) = Self::split(src);
        let (dest_seg, dest_idx) = Self::split(dest);
        let src_range = src_idx..src_idx + words;

        let Some(from) = self.table_of(src_seg) else {
            if let Some(to) = self.table_of(dest_seg) {
                self.tables[to][dest_idx..dest_idx + words].fill(M::default());
            }
            return Ok(());
        };
        let to = self
            .install_segment(dest_seg)
            .map_err(|_| Violation::UntrackableAddress { addr: dest })?;

        if from == to {
            self.tables[to].copy_within(src_range, dest_idx);
        } else {
            let (src_table, dest_table) = pair_mut(&mut self.tables, from, to);
            dest_table[dest_idx..dest_idx + words].copy_from_slice(&src_table[src_range]);
        }
        Ok(())
    }

    fn copy_word(&mut self, dest: usize, src: usize) -> Result<(), Violation> {
        let entry = self.load(src);
        if entry == M::default() && !self.is_installed(dest) {
            return Ok(());
        }
        self.store(dest, entry)
    }
}

/// Two distinct elements of a slice, the first shared and the second mutable.
fn pair_mut<T>(items: &mut [T], shared: usize, exclusive: usize) -> (&T, &mut T) {
    debug_assert_ne!(shared, exclusive);
    if shared < exclusive {
        let (lo, hi) = items.split_at_mut(exclusive);
        (&lo[shared], &mut hi[0])
    } else {
        let (lo, hi) = items.split_at_mut(shared);
        (&hi[0], &mut lo[exclusive])
    }
}

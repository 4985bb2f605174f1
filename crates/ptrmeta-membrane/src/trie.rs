//! Two-level metadata trie.
//!
//! Maps the address where a pointer value is stored to that pointer's
//! metadata, at 8-byte granularity. The primary table is indexed by
//! `addr >> PRIMARY_SHIFT`; each non-empty primary slot refers to a
//! secondary table holding one entry per 8-byte word of its segment.
//!
//! Secondary tables are installed on demand and never removed. Primary slots
//! hold a 1-based index into the installed-table list so that an empty slot
//! is simply zero.

use log::{debug, error};

use crate::config::{PRIMARY_SHIFT, SECONDARY_ENTRIES, SECONDARY_MASK, TriePolicy};
use crate::layout::MetadataLayout;
use crate::mapping::MappedTable;
use crate::violation::{Resource, Violation};

/// Bytes covered by one primary slot.
pub const SEGMENT_BYTES: usize = 1 << PRIMARY_SHIFT;

pub struct MetadataTrie<M: MetadataLayout> {
    pub(crate) primary: MappedTable<u32>,
    pub(crate) tables: Vec<MappedTable<M>>,
    policy: TriePolicy,
}

impl<M: MetadataLayout> MetadataTrie<M> {
    pub fn new(primary_entries: usize, policy: TriePolicy) -> Result<Self, Violation> {
        let primary = MappedTable::new(primary_entries).map_err(|err| {
            error!("primary table reservation of {primary_entries} slots failed: {err}");
            Violation::Exhausted(Resource::PrimaryTable)
        })?;
        debug!(
            "metadata trie: {primary_entries} primary slots, {} mode, {policy:?} install",
            M::NAME
        );
        Ok(Self {
            primary,
            tables: Vec::new(),
            policy,
        })
    }

    /// Split an address into (primary, secondary) indices.
    #[inline]
    #[must_use]
    pub const fn split(addr: usize) -> (usize, usize) {
        (addr >> PRIMARY_SHIFT, (addr >> 3) & SECONDARY_MASK)
    }

    #[must_use]
    pub fn policy(&self) -> TriePolicy {
        self.policy
    }

    /// Number of secondary tables installed so far.
    #[must_use]
    pub fn installed_tables(&self) -> usize {
        self.tables.len()
    }

    /// Whether the segment containing `addr` has a secondary table.
    #[must_use]
    pub fn is_installed(&self, addr: usize) -> bool {
        self.table_of(addr >> PRIMARY_SHIFT).is_some()
    }

    #[inline]
    pub(crate) fn table_of(&self, segment: usize) -> Option<usize> {
        match self.primary.get(segment) {
            Some(&slot) if slot != 0 => Some(slot as usize - 1),
            _ => None,
        }
    }

    /// Installed table for `segment`, installing one if needed.
    pub(crate) fn install_segment(&mut self, segment: usize) -> Result<usize, Violation> {
        if let Some(table) = self.table_of(segment) {
            return Ok(table);
        }
        if segment >= self.primary.len() {
            return Err(Violation::UntrackableAddress {
                addr: segment << PRIMARY_SHIFT,
            });
        }
        let slot = u32::try_from(self.tables.len() + 1)
            .map_err(|_| Violation::Exhausted(Resource::SecondaryTable))?;
        let table = MappedTable::new(SECONDARY_ENTRIES).map_err(|err| {
            error!("secondary table reservation failed: {err}");
            Violation::Exhausted(Resource::SecondaryTable)
        })?;
        self.tables.push(table);
        self.primary[segment] = slot;
        debug!(
            "installed secondary table #{slot} for segment {:#x}",
            segment << PRIMARY_SHIFT
        );
        Ok(slot as usize - 1)
    }

    /// Write the entry for the pointer stored at `addr`.
    pub fn store(&mut self, addr: usize, entry: M) -> Result<(), Violation> {
        let (segment, idx) = Self::split(addr);
        let table = self
            .install_segment(segment)
            .map_err(|err| match err {
                Violation::UntrackableAddress { .. } => Violation::UntrackableAddress { addr },
                other => other,
            })?;
        self.tables[table][idx] = entry;
        Ok(())
    }

    /// Read the entry for the pointer stored at `addr`. Untouched and
    /// untrackable addresses read as zero.
    #[must_use]
    pub fn load(&self, addr: usize) -> M {
        let (segment, idx) = Self::split(addr);
        self.table_of(segment)
            .map_or_else(M::default, |table| self.tables[table][idx])
    }

    /// Eager policy: install the segment of `addr` and both neighbours.
    pub fn preallocate(&mut self, addr: usize) -> Result<(), Violation> {
        if self.policy == TriePolicy::Lazy {
            return Ok(());
        }
        let segment = addr >> PRIMARY_SHIFT;
        if segment >= self.primary.len() {
            return Err(Violation::UntrackableAddress { addr });
        }
        self.install_segment(segment)?;
        if let Some(below) = segment.checked_sub(1) {
            self.install_segment(below)?;
        }
        if segment + 1 < self.primary.len() {
            self.install_segment(segment + 1)?;
        }
        Ok(())
    }

    /// Eager policy: install every segment `[start, start + len)` touches.
    pub fn preallocate_range(&mut self, start: usize, len: usize) -> Result<(), Violation> {
        if self.policy == TriePolicy::Lazy || len == 0 {
            return Ok(());
        }
        let first = start >> PRIMARY_SHIFT;
        let last = start.saturating_add(len - 1) >> PRIMARY_SHIFT;
        if last >= self.primary.len() {
            return Err(Violation::UntrackableAddress {
                addr: last << PRIMARY_SHIFT,
            });
        }
        for segment in first..=last {
            self.install_segment(segment)?;
        }
        Ok(())
    }
}

impl<M: MetadataLayout> std::fmt::Debug for MetadataTrie<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetadataTrie")
            .field("mode", &M::NAME)
            .field("primary_entries", &self.primary.len())
            .field("installed_tables", &self.tables.len())
            .field("policy", &self.policy)
            .finish()
    }
}

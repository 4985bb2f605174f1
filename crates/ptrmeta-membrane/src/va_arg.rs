//! Proxies over the variadic pointer arguments of a call.
//!
//! `va_start` in an instrumented variadic function opens a proxy over the
//! trailing slots of its shadow-stack frame. Every pointer-typed `va_arg`
//! reads the slot under the proxy and advances it; `va_copy` duplicates a
//! proxy and `va_end` closes it.
//!
//! A proxy is an opaque non-zero handle, small enough to be parked in the
//! first word of a trie entry (the metadata of a `va_list` object) or of a
//! shadow-stack slot (a `va_list` passed as an argument). Closed handles
//! are recycled LIFO.

use crate::shadow_stack::SlotSpan;
use crate::violation::{Resource, Violation};

#[derive(Debug)]
pub struct VaArgProxies {
    spans: Vec<Option<SlotSpan>>,
    free: Vec<usize>,
    capacity: usize,
}

impl VaArgProxies {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            spans: Vec::new(),
            free: Vec::new(),
            capacity,
        }
    }

    /// Open proxies.
    #[must_use]
    pub fn live(&self) -> usize {
        self.spans.len() - self.free.len()
    }

    pub fn open(&mut self, span: SlotSpan) -> Result<usize, Violation> {
        let idx = match self.free.pop() {
            Some(idx) => idx,
            None if self.spans.len() < self.capacity => {
                self.spans.push(None);
                self.spans.len() - 1
            }
            None => return Err(Violation::Exhausted(Resource::VaArgProxies)),
        };
        self.spans[idx] = Some(span);
        Ok(idx + 1)
    }

    /// Remaining span of `proxy`.
    pub fn span(&self, proxy: usize) -> Result<SlotSpan, Violation> {
        proxy
            .checked_sub(1)
            .and_then(|idx| self.spans.get(idx).copied().flatten())
            .ok_or(Violation::UnknownVaArgProxy { proxy })
    }

    /// Move `proxy` past `words` words.
    pub fn advance(&mut self, proxy: usize, words: usize) -> Result<(), Violation> {
        let mut span = self.span(proxy)?;
        span.next += words;
        self.spans[proxy - 1] = Some(span);
        Ok(())
    }

    /// A second proxy at the same position as `proxy`.
    pub fn duplicate(&mut self, proxy: usize) -> Result<usize, Violation> {
        let span = self.span(proxy)?;
        self.open(span)
    }

    pub fn close(&mut self, proxy: usize) -> Result<(), Violation> {
        self.span(proxy)?;
        self.spans[proxy - 1] = None;
        self.free.push(proxy - 1);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(next: usize) -> SlotSpan {
        SlotSpan { next, end: 32 }
    }

    #[test]
    fn handles_are_never_zero() {
        let mut proxies = VaArgProxies::new(4);
        let first = proxies.open(span(4)).expect("open");
        assert_eq!(first, 1);
        assert_eq!(
            proxies.span(0),
            Err(Violation::UnknownVaArgProxy { proxy: 0 })
        );
    }

    #[test]
    fn copies_advance_independently() {
        let mut proxies = VaArgProxies::new(4);
        let a = proxies.open(span(4)).expect("open");
        proxies.advance(a, 4).expect("advance");
        let b = proxies.duplicate(a).expect("copy");
        proxies.advance(a, 4).expect("advance");
        assert_eq!(proxies.span(a).map(|s| s.next), Ok(12));
        assert_eq!(proxies.span(b).map(|s| s.next), Ok(8));
        assert_eq!(proxies.live(), 2);
    }

    #[test]
    fn closed_handles_are_rejected_then_recycled() {
        let mut proxies = VaArgProxies::new(4);
        let a = proxies.open(span(4)).expect("open");
        proxies.close(a).expect("close");
        assert_eq!(
            proxies.close(a),
            Err(Violation::UnknownVaArgProxy { proxy: a })
        );
        assert_eq!(
            proxies.advance(a, 2),
            Err(Violation::UnknownVaArgProxy { proxy: a })
        );
        assert_eq!(proxies.open(span(6)), Ok(a));
        assert_eq!(proxies.live(), 1);
    }

    #[test]
    fn capacity_is_enforced() {
        let mut proxies = VaArgProxies::new(2);
        proxies.open(span(2)).expect("open");
        let b = proxies.open(span(2)).expect("open");
        assert_eq!(
            proxies.duplicate(b),
            Err(Violation::Exhausted(Resource::VaArgProxies))
        );
        proxies.close(b).expect("close");
        proxies.duplicate(1).expect("room again");
    }
}

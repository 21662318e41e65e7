//! PES event buses
//!
//! Each module owns disjoint bits. `EXECUTE` asserts action bits (all on the
//! same cycle), `WAIT` blocks until every requested resume bit is asserted.

use bitflags::bitflags;

bitflags! {
    /// Action bus: bits asserted by `EXECUTE`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PesActionEvent: u32 {
        /// Galvanic matrix consumes its next KBD entry
        const KBD_MATRIX_SEND = 1 << 0;
        /// Gtech module consumes its next KBD entry
        const KBD_GTECH_SEND = 1 << 1;
    }
}

bitflags! {
    /// Resume bus: bits awaited by `WAIT`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PesResumeEvent: u32 {
        const KBD_MATRIX_READY = 1 << 0;
        const KBD_GTECH_READY = 1 << 1;
        const PES_CPU_DONE = 1 << 2;
    }
}

/// Fold several events into one mask
pub fn combine<F, I>(events: I) -> F
where
    F: bitflags::Flags + Copy,
    I: IntoIterator<Item = F>,
{
    events.into_iter().fold(F::empty(), |acc, e| acc.union(e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine() {
        let all: PesActionEvent = combine([
            PesActionEvent::KBD_MATRIX_SEND,
            PesActionEvent::KBD_GTECH_SEND,
        ]);
        assert_eq!(all.bits(), 0b11);
        let none: PesResumeEvent = combine([]);
        assert!(none.is_empty());
    }
}

//! Fixed-capacity slot arena
//!
//! Occupancy bitmap over `N` slots; a slot's index is its stable id.

/// Bitmap of up to 32 slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlotArena<const N: usize> {
    used: u32,
}

impl<const N: usize> SlotArena<N> {
    const CAPACITY_OK: () = assert!(N <= 32);

    /// Empty arena
    pub const fn new() -> Self {
        let _ = Self::CAPACITY_OK;
        Self { used: 0 }
    }

    /// Claim the lowest free slot
    pub fn alloc(&mut self) -> Option<usize> {
        let slot = (!self.used).trailing_zeros() as usize;
        if slot >= N {
            return None;
        }
        self.used |= 1 << slot;
        Some(slot)
    }

    /// Claim a given slot; false if out of range or taken
    pub fn claim(&mut self, slot: usize) -> bool {
        if slot >= N || self.is_used(slot) {
            return false;
        }
        self.used |= 1 << slot;
        true
    }

    /// Free a slot; false if it was not in use
    pub fn release(&mut self, slot: usize) -> bool {
        if !self.is_used(slot) {
            return false;
        }
        self.used &= !(1 << slot);
        true
    }

    /// Check if a slot is taken
    #[inline]
    pub fn is_used(&self, slot: usize) -> bool {
        slot < N && self.used & (1 << slot) != 0
    }

    /// Used slots in ascending order
    pub fn iter(&self) -> impl Iterator<Item = usize> + '_ {
        (0..N).filter(move |&s| self.is_used(s))
    }

    /// Used slot count
    pub fn count(&self) -> usize {
        self.used.count_ones() as usize
    }

    /// All slots taken
    pub fn is_full(&self) -> bool {
        self.count() == N
    }

    /// Raw occupancy bits
    pub fn bits(&self) -> u32 {
        self.used
    }
}

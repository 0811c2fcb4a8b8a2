//! Old-address bookkeeping.
//!
//! [`AddressIndex`] maps each old address to the position of the block that
//! declared it (the latest one wins). [`AddressAllocator`] mints addresses
//! for synthesized blocks from a range real producers never hand out.

use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::header::PointerWidth;

#[derive(Debug, Clone, Default)]
pub struct AddressIndex {
    map: HashMap<u64, usize>,
}

impl AddressIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Point `address` at block `position`, returning the previous owner.
    pub fn insert(&mut self, address: u64, position: usize) -> Option<usize> {
        self.map.insert(address, position)
    }

    pub fn get(&self, address: u64) -> Option<usize> {
        self.map.get(&address).copied()
    }

    pub fn contains(&self, address: u64) -> bool {
        self.map.contains_key(&address)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u64, usize)> + '_ {
        self.map.iter().map(|(&a, &p)| (a, p))
    }

    /// Account for a block inserted at `position`: every entry at or after
    /// it moves down by one.
    pub(crate) fn shift_from(&mut self, position: usize) {
        for p in self.map.values_mut() {
            if *p >= position {
                *p += 1;
            }
        }
    }
}

// ── Synthetic addresses ──────────────────────────────────────────────────────

/// Upper canonical half on 64-bit hosts; user-space heaps never live here.
const SYNTHETIC_BASE_WIDE:   u64 = 0xFFFF_8000_0000_0000;
/// Top 64 KiB of a 32-bit address space.
const SYNTHETIC_BASE_NARROW: u64 = 0xFFFF_0000;
const SYNTHETIC_STEP:        u64 = 8;

/// Monotonic per-document address counter.
#[derive(Debug, Clone)]
pub struct AddressAllocator {
    next:  u64,
    limit: u64,
}

impl AddressAllocator {
    pub fn new(width: PointerWidth) -> Self {
        match width {
            PointerWidth::Four  => Self { next: SYNTHETIC_BASE_NARROW, limit: u64::from(u32::MAX) },
            PointerWidth::Eight => Self { next: SYNTHETIC_BASE_WIDE, limit: u64::MAX },
        }
    }

    /// Next address not already present in `taken`.
    pub fn allocate(&mut self, taken: &AddressIndex) -> Result<u64> {
        loop {
            let address = self.next;
            if address > self.limit - SYNTHETIC_STEP + 1 {
                return Err(Error::AddressSpaceExhausted);
            }
            self.next = address.saturating_add(SYNTHETIC_STEP);
            if !taken.contains(address) {
                return Ok(address);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocator_is_monotonic_and_skips_taken() {
        let mut taken = AddressIndex::new();
        taken.insert(SYNTHETIC_BASE_WIDE + SYNTHETIC_STEP, 0);

        let mut alloc = AddressAllocator::new(PointerWidth::Eight);
        let a = alloc.allocate(&taken).unwrap();
        let b = alloc.allocate(&taken).unwrap();
        assert_eq!(a, SYNTHETIC_BASE_WIDE);
        assert_eq!(b, SYNTHETIC_BASE_WIDE + 2 * SYNTHETIC_STEP);
        assert!(b > a);
    }

    #[test]
    fn narrow_allocator_stays_in_u32() {
        let taken = AddressIndex::new();
        let mut alloc = AddressAllocator::new(PointerWidth::Four);
        let mut last = 0;
        while let Ok(a) = alloc.allocate(&taken) {
            assert!(a <= u64::from(u32::MAX));
            last = a;
        }
        assert_eq!(last, u64::from(u32::MAX) - SYNTHETIC_STEP + 1);
        assert!(matches!(alloc.allocate(&taken), Err(Error::AddressSpaceExhausted)));
    }

    #[test]
    fn shift_moves_later_positions() {
        let mut index = AddressIndex::new();
        index.insert(0x10, 0);
        index.insert(0x20, 1);
        index.insert(0x30, 2);
        index.shift_from(1);
        assert_eq!(index.get(0x10), Some(0));
        assert_eq!(index.get(0x20), Some(2));
        assert_eq!(index.get(0x30), Some(3));
    }
}

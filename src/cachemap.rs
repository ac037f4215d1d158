// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! Slot directory: maps host block keys to cache slot indices with
//! clock-style MRU eviction. The cache engine itself never looks inside;
//! upstream drives it through `insert`/`using`/`free` and invalidates its
//! own metadata for whatever key `insert` evicts.

/// Directory of `size` slots with a clock hand over MRU bits.
#[derive(Debug)]
pub struct CacheMap {
    slots: Vec<SlotState>,
    hand: usize,
}

#[derive(Debug, Default, Clone, Copy)]
struct SlotState {
    key: u64,
    mru: bool,
    used: bool,
}

impl CacheMap {
    /// An empty directory of `size` slots.
    pub fn new(size: usize) -> Self {
        Self {
            slots: vec![SlotState::default(); size],
            hand: 0,
        }
    }

    /// Number of slots in the directory.
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Places `key` in a slot with the MRU bit clear and returns its
    /// index, together with the key evicted to make room (if any).
    ///
    /// The hand clears the MRU bit of each used slot it passes and stops
    /// at the first used slot whose MRU bit is already clear, or at an
    /// unused slot. It then advances past the placement, so consecutive
    /// inserts spread across the directory.
    pub fn insert(&mut self, key: u64) -> (usize, Option<u64>) {
        loop {
            if self.hand >= self.slots.len() {
                self.hand = 0;
            }
            let slot = &mut self.slots[self.hand];
            if !slot.used {
                *slot = SlotState {
                    key,
                    mru: false,
                    used: true,
                };
                let index = self.hand;
                self.hand += 1;
                return (index, None);
            }
            if slot.mru {
                slot.mru = false;
                self.hand += 1;
            } else {
                let evicted = slot.key;
                slot.key = key;
                slot.mru = false;
                let index = self.hand;
                self.hand += 1;
                return (index, Some(evicted));
            }
        }
    }

    /// Marks the slot recently used.
    pub fn using(&mut self, index: usize) {
        self.slots[index].mru = true;
    }

    /// Releases the slot: clears both the used and MRU bits.
    pub fn free(&mut self, index: usize) {
        self.slots[index].mru = false;
        self.slots[index].used = false;
    }

    #[cfg(test)]
    fn slot(&self, index: usize) -> (u64, bool, bool) {
        let s = self.slots[index];
        (s.key, s.mru, s.used)
    }
}

// Copyright (C) 2023, Ava Labs, Inc. All rights reserved.
// See the file LICENSE.md for licensing terms.

//! In-RAM cache of recently read blocks, keyed by log offset.
//!
//! This is a read-miss cache: only the read path populates it, and the
//! put path invalidates before overwriting a block.

use std::collections::HashMap;

use metrics::counter;
use parking_lot::Mutex;

/// Bounded block cache with clock (second-chance) replacement.
///
/// Each entry carries a reference bit set on access; eviction rotates a
/// hand that clears the bits and reclaims the first slot found
/// unreferenced. Safe for concurrent callers.
#[derive(Debug)]
pub struct ClockCache {
    inner: Mutex<ClockInner>,
    block_size: usize,
}

#[derive(Debug)]
struct ClockInner {
    map: HashMap<u64, usize>,
    slots: Vec<Slot>,
    free: Vec<usize>,
    hand: usize,
    capacity: usize,
}

#[derive(Debug)]
struct Slot {
    key: u64,
    data: Box<[u8]>,
    referenced: bool,
}

impl ClockCache {
    /// A cache of `entries` blocks, each `block_size` bytes.
    pub fn new(entries: usize, block_size: u64) -> Self {
        debug_assert!(entries > 0);
        Self {
            inner: Mutex::new(ClockInner {
                map: HashMap::with_capacity(entries),
                slots: Vec::with_capacity(entries),
                free: Vec::new(),
                hand: 0,
                capacity: entries,
            }),
            block_size: block_size as usize,
        }
    }

    /// Copies the cached block for `key` into `buf` if present.
    pub fn get(&self, key: u64, buf: &mut [u8]) -> bool {
        let mut inner = self.inner.lock();
        let hit = match inner.map.get(&key).copied() {
            Some(idx) => {
                inner.slots[idx].referenced = true;
                buf.copy_from_slice(&inner.slots[idx].data);
                true
            }
            None => false,
        };
        counter!("heartwood.cache.block", "type" => if hit { "hit" } else { "miss" }).increment(1);
        hit
    }

    /// Inserts or refreshes the block for `key`.
    pub fn set(&self, key: u64, data: &[u8]) {
        debug_assert_eq!(data.len(), self.block_size);
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.map.get(&key).copied() {
            inner.slots[idx].data.copy_from_slice(data);
            inner.slots[idx].referenced = true;
            return;
        }
        let idx = if let Some(idx) = inner.free.pop() {
            inner.slots[idx].key = key;
            inner.slots[idx].data.copy_from_slice(data);
            inner.slots[idx].referenced = false;
            idx
        } else if inner.slots.len() < inner.capacity {
            inner.slots.push(Slot {
                key,
                data: data.into(),
                referenced: false,
            });
            inner.slots.len() - 1
        } else {
            // second chance: clear bits until an unreferenced victim turns up
            let len = inner.slots.len();
            loop {
                let h = inner.hand;
                inner.hand = (h + 1) % len;
                if inner.slots[h].referenced {
                    inner.slots[h].referenced = false;
                } else {
                    let old = inner.slots[h].key;
                    inner.map.remove(&old);
                    inner.slots[h].key = key;
                    inner.slots[h].data.copy_from_slice(data);
                    break h;
                }
            }
        };
        inner.map.insert(key, idx);
    }

    /// Drops the entry for `key`, if any.
    pub fn invalidate(&self, key: u64) {
        let mut inner = self.inner.lock();
        if let Some(idx) = inner.map.remove(&key) {
            inner.slots[idx].referenced = false;
            inner.free.push(idx);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BS: usize = 64;

    fn block(byte: u8) -> Vec<u8> {
        vec![byte; BS]
    }

    fn get(c: &ClockCache, key: u64) -> Option<Vec<u8>> {
        let mut out = vec![0; BS];
        c.get(key, &mut out).then_some(out)
    }

    #[test]
    fn miss_then_hit() {
        let c = ClockCache::new(4, BS as u64);
        assert_eq!(get(&c, 0), None);
        c.set(0, &block(0x11));
        assert_eq!(get(&c, 0), Some(block(0x11)));
    }

    #[test]
    fn set_refreshes_in_place() {
        let c = ClockCache::new(4, BS as u64);
        c.set(0, &block(1));
        c.set(0, &block(2));
        assert_eq!(get(&c, 0), Some(block(2)));
    }

    #[test]
    fn invalidate_removes() {
        let c = ClockCache::new(4, BS as u64);
        c.set(64, &block(1));
        c.invalidate(64);
        assert_eq!(get(&c, 64), None);
        // freed slot is reused before anything is evicted
        c.set(128, &block(2));
        assert_eq!(get(&c, 128), Some(block(2)));
    }

    #[test]
    fn second_chance_spares_referenced_entries() {
        let c = ClockCache::new(2, BS as u64);
        c.set(0, &block(10));
        c.set(1, &block(11));
        // reference key 0; the hand must pass it over and evict key 1
        assert!(get(&c, 0).is_some());
        c.set(2, &block(12));
        assert_eq!(get(&c, 0), Some(block(10)));
        assert_eq!(get(&c, 1), None);
        assert_eq!(get(&c, 2), Some(block(12)));
    }

    #[test]
    fn full_rotation_evicts_when_all_referenced() {
        let c = ClockCache::new(2, BS as u64);
        c.set(0, &block(1));
        c.set(1, &block(2));
        assert!(get(&c, 0).is_some());
        assert!(get(&c, 1).is_some());
        // first pass clears both bits, second pass reclaims a slot
        c.set(2, &block(3));
        let resident = [0, 1, 2].iter().filter(|k| get(&c, **k).is_some()).count();
        assert_eq!(resident, 2);
        assert!(get(&c, 2).is_some());
    }
}

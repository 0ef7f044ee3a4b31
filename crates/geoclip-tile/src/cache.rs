//! Fixed-capacity tile cache with strict LRU eviction.
//!
//! Tiles live in a slot table indexed through a hash map keyed by the packed
//! tile key. Recency is an ordered map from a monotonically increasing stamp
//! to the packed key, so the first entry is always the least recently used
//! tile. The number of occupied slots, the index size and the LRU size are
//! equal whenever no operation is in progress.

use std::collections::BTreeMap;

use geoclip_core::Attribute;
use hashbrown::{HashMap, HashSet};
use tracing::trace;

use crate::error::CacheError;
use crate::key::{PackedTileKey, TileKey};

/// One cache-resident tile.
#[derive(Debug, Clone)]
pub struct ResidentTile {
    key: TileKey,
    data: Vec<u8>,
    last_used_frame: u64,
    stamp: u64,
}

impl ResidentTile {
    #[inline]
    pub const fn key(&self) -> TileKey {
        self.key
    }

    /// Texel bytes, `tile_size² × bytes_per_texel` long.
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Frame counter at the last touch.
    #[inline]
    pub const fn last_used_frame(&self) -> u64 {
        self.last_used_frame
    }

    /// Recency stamp; larger is more recent.
    #[inline]
    pub const fn stamp(&self) -> u64 {
        self.stamp
    }
}

/// Counters accumulated since construction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub synthesized: u64,
    pub evictions: u64,
    /// Inserts made above capacity because every resident tile was required.
    pub over_budget_inserts: u64,
}

/// Tile cache for one attribute.
pub struct TileCache {
    attribute: Attribute,
    tile_bytes: usize,
    capacity: usize,
    slots: Vec<Option<ResidentTile>>,
    free_slots: Vec<usize>,
    index: HashMap<PackedTileKey, usize>,
    lru: BTreeMap<u64, PackedTileKey>,
    next_stamp: u64,
    frame: u64,
    stats: CacheStats,
}

impl TileCache {
    /// Create an empty cache holding at most `capacity` tiles of
    /// `tile_bytes` each.
    pub fn new(attribute: Attribute, tile_bytes: usize, capacity: usize) -> Self {
        Self {
            attribute,
            tile_bytes,
            capacity,
            slots: Vec::with_capacity(capacity),
            free_slots: Vec::new(),
            index: HashMap::with_capacity(capacity),
            lru: BTreeMap::new(),
            next_stamp: 0,
            frame: 0,
            stats: CacheStats::default(),
        }
    }

    #[inline]
    pub const fn attribute(&self) -> Attribute {
        self.attribute
    }

    #[inline]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of resident tiles.
    #[inline]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    #[inline]
    pub const fn stats(&self) -> CacheStats {
        self.stats
    }

    /// Frame counter stamped on touched tiles.
    pub fn set_frame(&mut self, frame: u64) {
        self.frame = frame;
    }

    #[inline]
    pub fn contains(&self, key: TileKey) -> bool {
        self.index.contains_key(&key.pack())
    }

    /// Look up a resident tile without changing its recency.
    pub fn get(&self, key: TileKey) -> Option<&ResidentTile> {
        let slot = *self.index.get(&key.pack())?;
        self.slots.get(slot)?.as_ref()
    }

    /// Resident keys from most to least recently used.
    pub fn lru_keys(&self) -> impl Iterator<Item = TileKey> + '_ {
        self.lru.values().rev().filter_map(|packed| packed.unpack())
    }

    /// Return the tile for `key`, synthesizing it on a miss.
    ///
    /// A hit moves the tile to the most recently used position. A miss evicts
    /// the least recently used tile when the cache is at capacity, then fills
    /// a fresh buffer through `synthesize`.
    pub fn ensure_resident<F>(&mut self, key: TileKey, synthesize: F) -> Result<&ResidentTile, CacheError>
    where
        F: FnOnce(TileKey, &mut [u8]),
    {
        let slot = match self.index.get(&key.pack()) {
            Some(&slot) => {
                self.touch(slot);
                self.stats.hits += 1;
                slot
            }
            None => self.insert(key, None, synthesize)?,
        };
        self.slots[slot]
            .as_ref()
            .ok_or(CacheError::SlotMismatch { key, slot })
    }

    /// Make every key in `keys` resident.
    ///
    /// Capacity is reserved first: for each missing key one tile outside the
    /// requested set is evicted from the LRU tail, so filling the batch never
    /// evicts a tile the batch itself needs. When every resident tile is
    /// requested the cache grows past its capacity; a later
    /// [`enforce_budget`](Self::enforce_budget) trims it back.
    ///
    /// Returns the number of tiles synthesized.
    #[cfg_attr(feature = "profiling-tracy", tracing::instrument(level = "trace", skip_all))]
    pub fn ensure_set_resident<F>(&mut self, keys: &[TileKey], mut synthesize: F) -> Result<usize, CacheError>
    where
        F: FnMut(TileKey, &mut [u8]),
    {
        let required: HashSet<PackedTileKey> = keys.iter().map(|key| key.pack()).collect();
        let missing = required
            .iter()
            .filter(|packed| !self.index.contains_key(*packed))
            .count();

        let free = self.capacity.saturating_sub(self.len());
        let to_evict = missing.saturating_sub(free);
        if to_evict > 0 {
            let victims: Vec<PackedTileKey> = self
                .lru
                .values()
                .filter(|packed| !required.contains(*packed))
                .take(to_evict)
                .copied()
                .collect();
            for victim in victims {
                self.evict_packed(victim);
            }
        }

        let mut synthesized = 0;
        for &key in keys {
            if let Some(&slot) = self.index.get(&key.pack()) {
                self.touch(slot);
                self.stats.hits += 1;
            } else {
                self.insert(key, Some(&required), &mut synthesize)?;
                synthesized += 1;
            }
        }
        Ok(synthesized)
    }

    /// Evict least recently used tiles outside `required` until the cache is
    /// within capacity. Required tiles at the tail are skipped, not touched.
    ///
    /// Returns the number of tiles evicted.
    pub fn enforce_budget(&mut self, required: &HashSet<PackedTileKey>) -> usize {
        let excess = self.len().saturating_sub(self.capacity);
        if excess == 0 {
            return 0;
        }
        let victims: Vec<PackedTileKey> = self
            .lru
            .values()
            .filter(|packed| !required.contains(*packed))
            .take(excess)
            .copied()
            .collect();
        let evicted = victims.len();
        for victim in victims {
            self.evict_packed(victim);
        }
        if evicted > 0 {
            trace!(attribute = %self.attribute, evicted, resident = self.len(), "Enforced tile budget");
        }
        evicted
    }

    /// Remove a tile. Returns `false` when it was not resident.
    pub fn evict(&mut self, key: TileKey) -> bool {
        self.evict_packed(key.pack())
    }

    /// Drop every resident tile.
    pub fn clear(&mut self) {
        self.slots.clear();
        self.free_slots.clear();
        self.index.clear();
        self.lru.clear();
    }

    /// Slot table, index and LRU order agree.
    pub fn is_consistent(&self) -> bool {
        let occupied = self.slots.iter().filter(|slot| slot.is_some()).count();
        occupied == self.index.len()
            && occupied == self.lru.len()
            && self.index.iter().all(|(packed, &slot)| {
                self.slots[slot]
                    .as_ref()
                    .is_some_and(|tile| tile.key.pack() == *packed && self.lru.get(&tile.stamp) == Some(packed))
            })
    }

    fn touch(&mut self, slot: usize) {
        let stamp = self.next_stamp;
        self.next_stamp += 1;
        if let Some(tile) = self.slots[slot].as_mut() {
            self.lru.remove(&tile.stamp);
            tile.stamp = stamp;
            tile.last_used_frame = self.frame;
            self.lru.insert(stamp, tile.key.pack());
        }
    }

    fn insert<F>(&mut self, key: TileKey, protected: Option<&HashSet<PackedTileKey>>, synthesize: F) -> Result<usize, CacheError>
    where
        F: FnOnce(TileKey, &mut [u8]),
    {
        let slot = self.allocate_slot(protected)?;

        let mut data = vec![0; self.tile_bytes];
        synthesize(key, &mut data);

        let stamp = self.next_stamp;
        self.next_stamp += 1;
        let packed = key.pack();
        self.slots[slot] = Some(ResidentTile {
            key,
            data,
            last_used_frame: self.frame,
            stamp,
        });
        self.index.insert(packed, slot);
        self.lru.insert(stamp, packed);
        self.stats.synthesized += 1;
        Ok(slot)
    }

    fn allocate_slot(&mut self, protected: Option<&HashSet<PackedTileKey>>) -> Result<usize, CacheError> {
        if self.len() >= self.capacity {
            if self.lru.is_empty() {
                return Err(CacheError::OutOfSlots {
                    attribute: self.attribute,
                    capacity: self.capacity,
                });
            }
            let victim = self
                .lru
                .values()
                .find(|packed| protected.map_or(true, |set| !set.contains(*packed)))
                .copied();
            match victim {
                Some(victim) => {
                    self.evict_packed(victim);
                }
                None => self.stats.over_budget_inserts += 1,
            }
        }

        Ok(self.free_slots.pop().unwrap_or_else(|| {
            self.slots.push(None);
            self.slots.len() - 1
        }))
    }

    fn evict_packed(&mut self, packed: PackedTileKey) -> bool {
        let Some(slot) = self.index.remove(&packed) else {
            return false;
        };
        if let Some(tile) = self.slots[slot].take() {
            self.lru.remove(&tile.stamp);
        }
        self.free_slots.push(slot);
        self.stats.evictions += 1;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(x: u32, y: u32) -> TileKey {
        TileKey::new(Attribute::Height, 0, x, y)
    }

    fn fill(key: TileKey, out: &mut [u8]) {
        out.fill(key.tile_y as u8);
    }

    fn resident(cache: &TileCache) -> Vec<TileKey> {
        let mut keys: Vec<_> = cache.lru_keys().collect();
        keys.sort();
        keys
    }

    #[test]
    fn capacity_four_evicts_oldest() {
        let mut cache = TileCache::new(Attribute::Height, 16, 4);
        for y in 0..5 {
            cache.ensure_resident(key(0, y), fill).unwrap();
        }
        assert_eq!(cache.len(), 4);
        assert!(!cache.contains(key(0, 0)));
        assert_eq!(resident(&cache), vec![key(0, 1), key(0, 2), key(0, 3), key(0, 4)]);
        assert!(cache.is_consistent());
    }

    #[test]
    fn survivors_are_most_recently_touched() {
        let mut cache = TileCache::new(Attribute::Height, 16, 3);
        for y in 0..3 {
            cache.ensure_resident(key(0, y), fill).unwrap();
        }
        // Re-touch the oldest so (0, 1) becomes the tail.
        cache.ensure_resident(key(0, 0), fill).unwrap();
        cache.ensure_resident(key(0, 5), fill).unwrap();

        assert_eq!(
            cache.lru_keys().collect::<Vec<_>>(),
            vec![key(0, 5), key(0, 0), key(0, 2)]
        );
        assert_eq!(cache.stats().hits, 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn hit_does_not_resynthesize() {
        let mut cache = TileCache::new(Attribute::Height, 4, 2);
        cache.ensure_resident(key(0, 7), fill).unwrap();
        let tile = cache
            .ensure_resident(key(0, 7), |_, _| panic!("hit must not synthesize"))
            .unwrap();
        assert_eq!(tile.data(), &[7, 7, 7, 7]);
    }

    #[test]
    fn set_resident_never_evicts_requested_keys() {
        let mut cache = TileCache::new(Attribute::Height, 4, 4);
        for y in 0..4 {
            cache.ensure_resident(key(0, y), fill).unwrap();
        }
        // (0, 0) is the LRU tail but is part of the batch.
        let batch = [key(0, 0), key(1, 0), key(1, 1)];
        let synthesized = cache.ensure_set_resident(&batch, fill).unwrap();
        assert_eq!(synthesized, 2);
        assert_eq!(cache.len(), 4);
        for k in batch {
            assert!(cache.contains(k));
        }
        assert!(!cache.contains(key(0, 1)));
        assert!(!cache.contains(key(0, 2)));
        assert!(cache.is_consistent());
    }

    #[test]
    fn oversized_batch_grows_then_budget_trims() {
        let mut cache = TileCache::new(Attribute::Height, 4, 2);
        cache.ensure_resident(key(9, 9), fill).unwrap();

        let batch: Vec<_> = (0..4).map(|y| key(0, y)).collect();
        cache.ensure_set_resident(&batch, fill).unwrap();
        assert_eq!(cache.len(), 4);
        assert!(batch.iter().all(|&k| cache.contains(k)));
        assert!(!cache.contains(key(9, 9)));
        assert_eq!(cache.stats().over_budget_inserts, 2);

        // Everything is still required: nothing can go.
        let required: HashSet<_> = batch.iter().map(|k| k.pack()).collect();
        assert_eq!(cache.enforce_budget(&required), 0);
        assert_eq!(cache.len(), 4);

        // Keep only the two newest.
        let required: HashSet<_> = batch[2..].iter().map(|k| k.pack()).collect();
        assert_eq!(cache.enforce_budget(&required), 2);
        assert_eq!(resident(&cache), vec![key(0, 2), key(0, 3)]);
        assert!(cache.is_consistent());
    }

    #[test]
    fn budget_skips_required_tail() {
        let mut cache = TileCache::new(Attribute::Height, 4, 4);
        let batch: Vec<_> = (0..6).map(|y| key(0, y)).collect();
        cache.ensure_set_resident(&batch, fill).unwrap();
        assert_eq!(cache.len(), 6);

        // The tail (0, 0) is required; (0, 1) and (0, 2) are not.
        let required: HashSet<_> = [key(0, 0), key(0, 3), key(0, 4), key(0, 5)]
            .iter()
            .map(|k| k.pack())
            .collect();
        assert_eq!(cache.enforce_budget(&required), 2);
        assert_eq!(resident(&cache), vec![key(0, 0), key(0, 3), key(0, 4), key(0, 5)]);
        // Skipped tiles keep their recency.
        assert_eq!(cache.lru_keys().last(), Some(key(0, 0)));
    }

    #[test]
    fn zero_capacity_reports_out_of_slots() {
        let mut cache = TileCache::new(Attribute::Normal, 4, 0);
        let err = cache.ensure_resident(key(0, 0), fill).unwrap_err();
        assert_eq!(
            err,
            CacheError::OutOfSlots {
                attribute: Attribute::Normal,
                capacity: 0
            }
        );
        assert!(cache.ensure_set_resident(&[key(0, 0)], fill).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn clear_and_reuse_slots() {
        let mut cache = TileCache::new(Attribute::Height, 4, 2);
        cache.ensure_resident(key(0, 0), fill).unwrap();
        cache.ensure_resident(key(0, 1), fill).unwrap();
        assert!(cache.evict(key(0, 0)));
        assert!(!cache.evict(key(0, 0)));
        cache.ensure_resident(key(0, 2), fill).unwrap();
        assert!(cache.is_consistent());

        cache.clear();
        assert!(cache.is_empty());
        assert_eq!(cache.lru_keys().count(), 0);
        cache.ensure_resident(key(0, 3), fill).unwrap();
        assert!(cache.is_consistent());
    }

    #[test]
    fn frame_is_recorded_on_touch() {
        let mut cache = TileCache::new(Attribute::Height, 4, 2);
        cache.set_frame(3);
        cache.ensure_resident(key(0, 0), fill).unwrap();
        cache.set_frame(9);
        let tile = cache.ensure_resident(key(0, 0), fill).unwrap();
        assert_eq!(tile.last_used_frame(), 9);
        assert_eq!(cache.get(key(0, 0)).map(ResidentTile::last_used_frame), Some(9));
    }
}

// ========================================================================================
//
//                 The partial-hash cache: seed halves of the pseudo-hash
//
// ========================================================================================
//
// For a fixed key length, the seed half of the pseudo-hash depends only on the seed. The
// cache stores that half per key length for the seeds of the current batch so that a
// filter hashing dozens of keys folds the seed characters once per length, not once per
// key.
//
// There are two tables:
//   1. The initial table, laid out once per search from the lengths the filter declared
//      (`CacheLayout`) and filled by the batch builder before the filter runs. Its entries
//      are never overwritten during a batch.
//   2. The dynamic table, owned by a worker thread and reset at the start of every batch,
//      which fills on demand for any other key length. Entries carry one presence bit per
//      lane so that scalar contexts and the wide context share the same storage.

use crate::kernel::{LANE_COUNT, LaneBackend, LaneF64, LaneMask};
use crate::seed::SeedLanes;
use thiserror::Error;

/// The longest key that may be hashed or cached.
pub const MAX_KEY_LENGTH: usize = 48;

const NO_SLOT: u8 = u8::MAX;
const ALL_LANES: u8 = u8::MAX;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("key length {length} exceeds the maximum cacheable length of {MAX_KEY_LENGTH}")]
    TooLong { length: usize },
}

/// Checks that a key may be hashed.
pub fn validate_key_length(length: usize) -> Result<(), KeyError> {
    if length > MAX_KEY_LENGTH {
        return Err(KeyError::TooLong { length });
    }
    Ok(())
}

// ========================================================================================
//                                  Shared layout
// ========================================================================================

/// The set of key lengths whose partial hashes are precomputed for every batch, plus the
/// reverse lookup from key length to table slot. Built once per search and shared
/// read-only by every worker.
///
/// Length 0 is always present: its partial hash is the hash of the bare seed, which every
/// draw mixes into its pseudo-seed.
#[derive(Debug, Clone)]
pub struct CacheLayout {
    lengths: Vec<usize>,
    slot_of: [u8; MAX_KEY_LENGTH + 1],
}

impl CacheLayout {
    pub fn new(declared: impl IntoIterator<Item = usize>) -> Result<Self, KeyError> {
        let mut lengths = vec![0];
        for length in declared {
            validate_key_length(length)?;
            lengths.push(length);
        }
        lengths.sort_unstable();
        lengths.dedup();

        let mut slot_of = [NO_SLOT; MAX_KEY_LENGTH + 1];
        for (slot, &length) in lengths.iter().enumerate() {
            slot_of[length] = slot as u8;
        }
        Ok(Self { lengths, slot_of })
    }

    /// The declared key lengths, ascending, starting with 0.
    #[inline]
    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    #[inline]
    pub fn slot_count(&self) -> usize {
        self.lengths.len()
    }

    #[inline]
    pub fn slot(&self, key_length: usize) -> Option<usize> {
        match self.slot_of.get(key_length) {
            Some(&slot) if slot != NO_SLOT => Some(slot as usize),
            _ => None,
        }
    }

    /// The slot holding the seed hash.
    #[inline]
    pub fn seed_hash_slot(&self) -> usize {
        0
    }
}

// ========================================================================================
//                              Per-thread dynamic table
// ========================================================================================

/// On-demand partial hashes for key lengths outside the layout. Owned by one worker and
/// reset before each batch.
pub struct DynamicHashTable {
    values: [LaneF64; MAX_KEY_LENGTH + 1],
    present: [u8; MAX_KEY_LENGTH + 1],
}

impl Default for DynamicHashTable {
    fn default() -> Self {
        Self {
            values: [LaneF64::splat(0.0); MAX_KEY_LENGTH + 1],
            present: [0; MAX_KEY_LENGTH + 1],
        }
    }
}

impl DynamicHashTable {
    pub fn reset(&mut self) {
        self.present = [0; MAX_KEY_LENGTH + 1];
    }
}

// ========================================================================================
//                                 Per-batch view
// ========================================================================================

/// The cache as seen by one batch: the shared layout, the batch's initial table, its
/// seeds, and the worker's dynamic table.
pub struct PartialHashCache<'a> {
    layout: &'a CacheLayout,
    seeds: &'a SeedLanes,
    initial: &'a [LaneF64],
    dynamic: &'a mut DynamicHashTable,
}

impl<'a> PartialHashCache<'a> {
    pub fn new(
        layout: &'a CacheLayout,
        seeds: &'a SeedLanes,
        initial: &'a [LaneF64],
        dynamic: &'a mut DynamicHashTable,
    ) -> Self {
        debug_assert_eq!(initial.len(), layout.slot_count());
        Self {
            layout,
            seeds,
            initial,
            dynamic,
        }
    }

    /// A shorter-lived view over the same storage, for handing to a scalar context.
    #[inline]
    pub fn reborrow(&mut self) -> PartialHashCache<'_> {
        PartialHashCache {
            layout: self.layout,
            seeds: self.seeds,
            initial: self.initial,
            dynamic: &mut *self.dynamic,
        }
    }

    #[inline]
    pub fn seeds(&self) -> &SeedLanes {
        self.seeds
    }

    #[inline]
    pub fn valid_lanes(&self) -> LaneMask {
        self.seeds.valid()
    }

    /// The partial hash of the empty key, i.e. the hash of each lane's bare seed.
    #[inline]
    pub fn seed_hash(&self) -> LaneF64 {
        self.initial[self.layout.seed_hash_slot()]
    }

    /// Whether every lane has a value for `key_length`.
    #[inline]
    pub fn has(&self, key_length: usize) -> bool {
        self.layout.slot(key_length).is_some() || self.dynamic.present[key_length] == ALL_LANES
    }

    #[inline]
    pub fn has_lane(&self, key_length: usize, lane: usize) -> bool {
        self.layout.slot(key_length).is_some()
            || self.dynamic.present[key_length] & (1 << lane) != 0
    }

    #[inline]
    pub fn get(&self, key_length: usize) -> Option<LaneF64> {
        match self.layout.slot(key_length) {
            Some(slot) => Some(self.initial[slot]),
            None if self.dynamic.present[key_length] == ALL_LANES => {
                Some(self.dynamic.values[key_length])
            }
            None => None,
        }
    }

    #[inline]
    pub fn get_lane(&self, key_length: usize, lane: usize) -> Option<f64> {
        match self.layout.slot(key_length) {
            Some(slot) => Some(self.initial[slot][lane]),
            None if self.dynamic.present[key_length] & (1 << lane) != 0 => {
                Some(self.dynamic.values[key_length][lane])
            }
            None => None,
        }
    }

    /// Stores all lanes for a key length that is not cached yet.
    #[inline]
    pub fn put(&mut self, key_length: usize, value: LaneF64) {
        debug_assert!(
            !self.has(key_length),
            "partial hash for key length {key_length} is already cached"
        );
        self.dynamic.values[key_length] = value;
        self.dynamic.present[key_length] = ALL_LANES;
    }

    /// Stores one lane for a key length that lane does not have yet.
    #[inline]
    pub fn put_lane(&mut self, key_length: usize, lane: usize, value: f64) {
        debug_assert!(
            !self.has_lane(key_length, lane),
            "partial hash for key length {key_length} is already cached in lane {lane}"
        );
        self.dynamic.values[key_length][lane] = value;
        self.dynamic.present[key_length] |= 1 << lane;
    }

    /// The cached partial hash for every lane, computing and storing it on first use.
    #[inline]
    pub fn partial_hash<B: LaneBackend>(&mut self, key_length: usize) -> LaneF64 {
        debug_assert!(key_length <= MAX_KEY_LENGTH);
        if let Some(value) = self.get(key_length) {
            return value;
        }
        let value = self.seeds.partial_hash::<B>(key_length);
        // Scalar contexts may already have filled individual lanes with identical values.
        self.dynamic.values[key_length] = value;
        self.dynamic.present[key_length] = ALL_LANES;
        value
    }

    /// The cached partial hash for one lane, computing and storing it on first use.
    #[inline]
    pub fn partial_hash_lane(&mut self, key_length: usize, lane: usize) -> f64 {
        debug_assert!(key_length <= MAX_KEY_LENGTH);
        if let Some(value) = self.get_lane(key_length, lane) {
            return value;
        }
        let value = self.seeds.seed(lane).partial_hash(key_length);
        self.put_lane(key_length, lane, value);
        value
    }
}

const _: () = assert!(LANE_COUNT <= 8, "presence bits are stored in a u8");

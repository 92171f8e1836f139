// ========================================================================================
//
//                  Batch execution: seeds in, matching seeds out
//
// ========================================================================================
//
// This module turns a batch index into seeds, loads them into a frame with their
// partial-hash table, and runs the filter over each frame. It knows nothing about threads
// or scheduling; a worker calls `WorkerScratch::run_batch` once per claimed index.
//
// Sequential batches enumerate the seed space directly. A seed of length `L` is split
// into `L - F` slow positions (the trailing ones), fixed per batch and decoded from the
// batch index, and `F` fast positions enumerated inside the batch. The pseudo-hash folds
// a seed from its last character to its first, so the slow positions are folded exactly
// once per batch. The fast positions are then expanded one at a time, each level folding
// onto the level above it in a scratch buffer indexed by position. Position 0 is the
// lane position: its alphabet is spread over the lanes of consecutive frames.

use crate::cache::{CacheLayout, DynamicHashTable, PartialHashCache};
use crate::context::WideSearchContext;
use crate::filter::SeedFilter;
use crate::hash;
use crate::kernel::{LANE_COUNT, LaneBackend, LaneF64, LaneMask, lanes};
use crate::provider::SeedProvider;
use crate::seed::{ALPHABET_SIZE, MAX_SEED_LENGTH, SEED_ALPHABET, Seed, SeedError, SeedLanes};
use bumpalo::Bump;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("seed {index} could not be read: {source}")]
    Seed {
        index: u64,
        #[source]
        source: SeedError,
    },
}

/// How the seeds of the search are divided into batches.
#[derive(Clone)]
pub enum BatchPlan {
    Sequential(SequentialPlan),
    Provider(Arc<dyn SeedProvider>),
}

impl BatchPlan {
    /// The number of batches in the whole search.
    pub fn max_batch(&self) -> u64 {
        match self {
            BatchPlan::Sequential(plan) => plan.max_batch(),
            BatchPlan::Provider(provider) => provider.seed_count().div_ceil(LANE_COUNT as u64),
        }
    }

    /// The number of seeds a full batch covers.
    pub fn seeds_per_batch(&self) -> u64 {
        match self {
            BatchPlan::Sequential(plan) => plan.seeds_per_batch(),
            BatchPlan::Provider(_) => LANE_COUNT as u64,
        }
    }

    /// The number of seeds batch `index` actually covers; the final provider batch may
    /// be short.
    pub fn batch_seed_count(&self, index: u64) -> u64 {
        match self {
            BatchPlan::Sequential(plan) => plan.seeds_per_batch(),
            BatchPlan::Provider(provider) => provider
                .seed_count()
                .saturating_sub(index * LANE_COUNT as u64)
                .min(LANE_COUNT as u64),
        }
    }
}

// ========================================================================================
//                                 Sequential arithmetic
// ========================================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequentialPlan {
    seed_length: usize,
    fast_digits: usize,
    max_batch: u64,
    seeds_per_batch: u64,
}

impl SequentialPlan {
    /// `fast_digits` must be in `1..=seed_length` and `seed_length` in
    /// `1..=MAX_SEED_LENGTH`; settings validation guarantees both.
    pub fn new(seed_length: usize, fast_digits: usize) -> Self {
        debug_assert!((1..=MAX_SEED_LENGTH).contains(&seed_length));
        debug_assert!((1..=seed_length).contains(&fast_digits));
        let base = ALPHABET_SIZE as u64;
        Self {
            seed_length,
            fast_digits,
            max_batch: base.pow((seed_length - fast_digits) as u32),
            seeds_per_batch: base.pow(fast_digits as u32),
        }
    }

    #[inline]
    pub fn seed_length(&self) -> usize {
        self.seed_length
    }

    #[inline]
    pub fn fast_digits(&self) -> usize {
        self.fast_digits
    }

    #[inline]
    pub fn max_batch(&self) -> u64 {
        self.max_batch
    }

    #[inline]
    pub fn seeds_per_batch(&self) -> u64 {
        self.seeds_per_batch
    }

    /// Writes the slow characters of `batch_index` into `chars`. The last position is
    /// the least significant digit.
    fn decode_slow_digits(&self, batch_index: u64, chars: &mut [u8; MAX_SEED_LENGTH]) {
        debug_assert!(batch_index < self.max_batch);
        let base = ALPHABET_SIZE as u64;
        let mut remaining = batch_index;
        for position in (self.fast_digits..self.seed_length).rev() {
            chars[position] = SEED_ALPHABET[(remaining % base) as usize];
            remaining /= base;
        }
    }
}

// ========================================================================================
//                                      Frames
// ========================================================================================

/// The seeds of one wide evaluation and the initial partial-hash table for them.
pub struct SearchFrame {
    seeds: SeedLanes,
    initial: Vec<LaneF64>,
    dynamic: DynamicHashTable,
}

impl SearchFrame {
    pub fn new(layout: &CacheLayout) -> Self {
        let placeholder = Seed::from_alphabet_chars([SEED_ALPHABET[0]; MAX_SEED_LENGTH], 1);
        Self {
            seeds: SeedLanes::from_parts([placeholder; LANE_COUNT], LaneMask::splat(false)),
            initial: vec![LaneF64::splat(0.0); layout.slot_count()],
            dynamic: DynamicHashTable::default(),
        }
    }

    #[inline]
    pub fn seeds(&self) -> &SeedLanes {
        &self.seeds
    }

    /// Loads up to `LANE_COUNT` seeds of one length and computes their initial table.
    /// Returns false, leaving the frame untouched, if the seeds cannot share a frame.
    pub fn load_seeds<B: LaneBackend>(&mut self, layout: &CacheLayout, seeds: &[Seed]) -> bool {
        let Some(lanes) = SeedLanes::new(seeds) else {
            return false;
        };
        for (slot, &length) in layout.lengths().iter().enumerate() {
            self.initial[slot] = lanes.partial_hash::<B>(length);
        }
        self.seeds = lanes;
        true
    }

    /// Evaluates `filter` over the loaded seeds and returns the passing valid lanes.
    pub fn evaluate<F: SeedFilter, B: LaneBackend>(
        &mut self,
        layout: &CacheLayout,
        bump: &Bump,
        filter: &F,
    ) -> LaneMask {
        self.dynamic.reset();
        let cache = PartialHashCache::new(layout, &self.seeds, &self.initial, &mut self.dynamic);
        let mut ctx = WideSearchContext::<B>::new(cache, bump);
        filter.filter(&mut ctx) & self.seeds.valid()
    }
}

// ========================================================================================
//                                  Per-worker scratch
// ========================================================================================

/// Everything a worker thread allocates once and reuses for every batch it runs.
pub struct WorkerScratch {
    frame: SearchFrame,
    bump: Bump,
    chars: [u8; MAX_SEED_LENGTH],
    /// `prefix[position * slots + slot]`: the partial hash for the key length of `slot`
    /// after folding every seed position at or after `position`.
    prefix: Vec<f64>,
    slots: usize,
}

impl WorkerScratch {
    pub fn new(layout: &CacheLayout) -> Self {
        let slots = layout.slot_count();
        Self {
            frame: SearchFrame::new(layout),
            bump: Bump::new(),
            chars: [0; MAX_SEED_LENGTH],
            prefix: vec![1.0; (MAX_SEED_LENGTH + 1) * slots],
            slots,
        }
    }

    /// Runs batch `batch_index` of `plan`, calling `on_match` for every passing seed.
    pub fn run_batch<F, B, M>(
        &mut self,
        plan: &BatchPlan,
        layout: &CacheLayout,
        filter: &F,
        batch_index: u64,
        on_match: &mut M,
    ) -> Result<(), BatchError>
    where
        F: SeedFilter,
        B: LaneBackend,
        M: FnMut(&Seed),
    {
        match plan {
            BatchPlan::Sequential(plan) => {
                self.run_sequential::<F, B, M>(plan, layout, filter, batch_index, on_match);
                Ok(())
            }
            BatchPlan::Provider(provider) => self.run_provider::<F, B, M>(
                provider.as_ref(),
                layout,
                filter,
                batch_index,
                on_match,
            ),
        }
    }

    // --- Sequential ---

    fn run_sequential<F, B, M>(
        &mut self,
        plan: &SequentialPlan,
        layout: &CacheLayout,
        filter: &F,
        batch_index: u64,
        on_match: &mut M,
    ) where
        F: SeedFilter,
        B: LaneBackend,
        M: FnMut(&Seed),
    {
        let length = plan.seed_length();
        self.chars = [0; MAX_SEED_LENGTH];
        plan.decode_slow_digits(batch_index, &mut self.chars);

        let top = length * self.slots;
        self.prefix[top..top + self.slots].fill(1.0);
        for position in (plan.fast_digits()..length).rev() {
            self.fold_prefix(layout, position);
        }
        self.expand::<F, B, M>(layout, filter, length, plan.fast_digits() - 1, on_match);
    }

    /// Folds the character at `position` onto the prefix of `position + 1`.
    #[inline]
    fn fold_prefix(&mut self, layout: &CacheLayout, position: usize) {
        let code = self.chars[position];
        let (below, above) = self.prefix.split_at_mut((position + 1) * self.slots);
        let target = &mut below[position * self.slots..];
        for (slot, &key_length) in layout.lengths().iter().enumerate() {
            target[slot] = hash::fold_char(above[slot], code, key_length + position + 1);
        }
    }

    fn expand<F, B, M>(
        &mut self,
        layout: &CacheLayout,
        filter: &F,
        length: usize,
        position: usize,
        on_match: &mut M,
    ) where
        F: SeedFilter,
        B: LaneBackend,
        M: FnMut(&Seed),
    {
        if position == 0 {
            self.evaluate_lane_position::<F, B, M>(layout, filter, length, on_match);
            return;
        }
        for &code in SEED_ALPHABET {
            self.chars[position] = code;
            self.fold_prefix(layout, position);
            self.expand::<F, B, M>(layout, filter, length, position - 1, on_match);
        }
    }

    /// Spreads the alphabet over the lanes at position 0 and evaluates each frame.
    fn evaluate_lane_position<F, B, M>(
        &mut self,
        layout: &CacheLayout,
        filter: &F,
        length: usize,
        on_match: &mut M,
    ) where
        F: SeedFilter,
        B: LaneBackend,
        M: FnMut(&Seed),
    {
        let above = &self.prefix[self.slots..2 * self.slots];
        for group in SEED_ALPHABET.chunks(LANE_COUNT) {
            let mut chars = self.chars;
            chars[0] = group[0];
            let mut seeds = [Seed::from_alphabet_chars(chars, length); LANE_COUNT];
            let mut valid = LaneMask::splat(false);
            for (lane, &code) in group.iter().enumerate() {
                chars[0] = code;
                seeds[lane] = Seed::from_alphabet_chars(chars, length);
                valid.set(lane, true);
            }
            let codes = LaneF64::from_array(seeds.map(|seed| seed.as_bytes()[0] as f64));

            for (slot, &key_length) in layout.lengths().iter().enumerate() {
                self.frame.initial[slot] =
                    B::fold_hash(LaneF64::splat(above[slot]), codes, (key_length + 1) as f64);
            }
            self.frame.seeds = SeedLanes::from_parts(seeds, valid);

            let matched = self.frame.evaluate::<F, B>(layout, &self.bump, filter);
            for lane in lanes(matched) {
                on_match(self.frame.seeds.seed(lane));
            }
            self.bump.reset();
        }
    }

    // --- Provider ---

    fn run_provider<F, B, M>(
        &mut self,
        provider: &dyn SeedProvider,
        layout: &CacheLayout,
        filter: &F,
        batch_index: u64,
        on_match: &mut M,
    ) -> Result<(), BatchError>
    where
        F: SeedFilter,
        B: LaneBackend,
        M: FnMut(&Seed),
    {
        let start = batch_index * LANE_COUNT as u64;
        let end = (start + LANE_COUNT as u64).min(provider.seed_count());
        let mut seeds = Vec::with_capacity(LANE_COUNT);
        for index in start..end {
            let seed = provider
                .seed_at(index)
                .map_err(|source| BatchError::Seed { index, source })?;
            seeds.push(seed);
        }

        // `load_seeds` refuses seeds of mixed lengths, so those share one frame per length.
        if self.frame.load_seeds::<B>(layout, &seeds) {
            self.evaluate_frame::<F, B, M>(layout, filter, on_match);
        } else {
            seeds.sort_by_key(Seed::len);
            for group in seeds.chunk_by(|a, b| a.len() == b.len()) {
                if self.frame.load_seeds::<B>(layout, group) {
                    self.evaluate_frame::<F, B, M>(layout, filter, on_match);
                }
            }
        }
        Ok(())
    }

    fn evaluate_frame<F, B, M>(&mut self, layout: &CacheLayout, filter: &F, on_match: &mut M)
    where
        F: SeedFilter,
        B: LaneBackend,
        M: FnMut(&Seed),
    {
        let matched = self.frame.evaluate::<F, B>(layout, &self.bump, filter);
        for lane in lanes(matched) {
            on_match(self.frame.seeds.seed(lane));
        }
        self.bump.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SearchContext;
    use crate::filter::FilterCreationContext;
    use crate::kernel::{PortableLanes, SimdLanes};
    use crate::provider::SeedList;
    use std::collections::HashSet;
    use std::simd::cmp::{SimdPartialEq, SimdPartialOrd};
    use std::simd::num::SimdFloat;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct AcceptAll;

    impl SeedFilter for AcceptAll {
        fn filter<B: LaneBackend>(&self, ctx: &mut WideSearchContext<'_, B>) -> LaneMask {
            ctx.valid_lanes()
        }
    }

    /// Passes the lanes whose precomputed hashes agree with a from-scratch computation.
    struct CacheAgreement;

    impl SeedFilter for CacheAgreement {
        fn filter<B: LaneBackend>(&self, ctx: &mut WideSearchContext<'_, B>) -> LaneMask {
            let mut agree = LaneMask::splat(true);
            for key in ["", "boss", "Joker1"] {
                let cached = ctx.pseudo_hash(key, true);
                let direct = ctx.pseudo_hash(key, false);
                agree &= cached.to_bits().simd_eq(direct.to_bits());
            }
            agree
        }
    }

    /// Passes seeds whose first `boss` draw is below one half.
    struct LowBossDraw;

    impl SeedFilter for LowBossDraw {
        fn filter<B: LaneBackend>(&self, ctx: &mut WideSearchContext<'_, B>) -> LaneMask {
            let mut stream = ctx.create_prng_stream("boss");
            let draw = ctx.next_random(&mut stream);
            draw.simd_lt(LaneF64::splat(0.5))
        }
    }

    fn layout_for(keys: &[&str]) -> CacheLayout {
        let mut ctx = FilterCreationContext::new();
        for key in keys {
            ctx.cache_pseudo_hash(key).unwrap();
        }
        ctx.into_layout().unwrap()
    }

    #[test]
    fn sequential_plan_splits_the_seed_space() {
        let plan = SequentialPlan::new(8, 3);
        assert_eq!(plan.max_batch(), 35u64.pow(5));
        assert_eq!(plan.seeds_per_batch(), 35u64.pow(3));

        let plan = SequentialPlan::new(4, 4);
        assert_eq!(plan.max_batch(), 1);
    }

    #[test]
    fn sequential_batches_cover_every_seed_once() {
        let plan = BatchPlan::Sequential(SequentialPlan::new(3, 2));
        let layout = layout_for(&[]);
        let mut scratch = WorkerScratch::new(&layout);
        let mut seen = HashSet::new();
        for batch in 0..plan.max_batch() {
            let mut in_batch = 0;
            scratch
                .run_batch::<_, SimdLanes, _>(&plan, &layout, &AcceptAll, batch, &mut |seed: &Seed| {
                    assert!(seen.insert(*seed), "{seed} reported twice");
                    in_batch += 1;
                })
                .unwrap();
            assert_eq!(in_batch, plan.seeds_per_batch());
        }
        assert_eq!(seen.len() as u64, 35u64.pow(3));
        assert!(seen.contains(&Seed::new("1ZZ").unwrap()));
    }

    #[test]
    fn sequential_prefix_tables_match_direct_hashing() {
        let plan = BatchPlan::Sequential(SequentialPlan::new(5, 2));
        let layout = layout_for(&["boss", "Joker1"]);
        let mut scratch = WorkerScratch::new(&layout);
        for batch in [0, 17, plan.max_batch() - 1] {
            let mut count = 0u64;
            scratch
                .run_batch::<_, PortableLanes, _>(&plan, &layout, &CacheAgreement, batch, &mut |_: &Seed| {
                    count += 1
                })
                .unwrap();
            assert_eq!(count, plan.seeds_per_batch());
        }
    }

    #[test]
    fn mixed_length_provider_batches_find_the_same_seeds() {
        let uniform: Vec<&str> = vec!["AAAA", "BBBB", "CCCC", "DDDD", "EEEE", "FFFF", "GGGG", "HHHH"];
        let mixed: Vec<&str> = vec!["AAAA", "BBB", "CCCC", "DD", "EEEE", "FFFFF", "GGGG", "H"];
        let layout = layout_for(&["boss"]);

        let run = |entries: &[&str]| {
            let list = SeedList::from_strs(entries).unwrap();
            let plan = BatchPlan::Provider(Arc::new(list));
            let mut scratch = WorkerScratch::new(&layout);
            let mut found = HashSet::new();
            for batch in 0..plan.max_batch() {
                scratch
                    .run_batch::<_, SimdLanes, _>(&plan, &layout, &LowBossDraw, batch, &mut |seed: &Seed| {
                        found.insert(seed.to_string());
                    })
                    .unwrap();
            }
            found
        };

        let uniform_found = run(&uniform[..]);
        let mixed_found = run(&mixed[..]);
        for seed in ["AAAA", "CCCC", "EEEE", "GGGG"] {
            assert_eq!(uniform_found.contains(seed), mixed_found.contains(seed), "{seed}");
        }
        // Every mixed seed is judged the same as it would be in a frame of its own.
        let single_found = run(&["BBB"][..]);
        assert_eq!(mixed_found.contains("BBB"), single_found.contains("BBB"));
    }

    #[test]
    fn short_final_provider_batch_visits_remaining_seeds() {
        let list = SeedList::from_strs(&["A1", "B2", "C3", "D4", "E5", "F6", "G7", "H8", "J9", "KK"]).unwrap();
        let plan = BatchPlan::Provider(Arc::new(list));
        assert_eq!(plan.max_batch(), 2);
        let layout = layout_for(&[]);
        let mut scratch = WorkerScratch::new(&layout);
        let mut found = Vec::new();
        scratch
            .run_batch::<_, PortableLanes, _>(&plan, &layout, &AcceptAll, 1, &mut |seed: &Seed| {
                found.push(seed.to_string())
            })
            .unwrap();
        assert_eq!(found, vec!["J9", "KK"]);
    }

    /// Accepts every valid lane and counts the frames it was shown.
    struct FrameCounter(AtomicUsize);

    impl SeedFilter for FrameCounter {
        fn filter<B: LaneBackend>(&self, ctx: &mut WideSearchContext<'_, B>) -> LaneMask {
            self.0.fetch_add(1, Ordering::Relaxed);
            ctx.valid_lanes()
        }
    }

    #[test]
    fn mixed_length_provider_batches_share_a_frame_per_length() {
        let entries = ["AAAA", "BB", "CCCC", "DD", "EEEE", "FF", "GGGG", "HH"];
        let plan = BatchPlan::Provider(Arc::new(SeedList::from_strs(&entries).unwrap()));
        let layout = layout_for(&[]);
        let mut scratch = WorkerScratch::new(&layout);

        let counter = FrameCounter(AtomicUsize::new(0));
        let mut found = Vec::new();
        scratch
            .run_batch::<_, SimdLanes, _>(&plan, &layout, &counter, 0, &mut |seed: &Seed| {
                found.push(seed.to_string())
            })
            .unwrap();
        assert_eq!(counter.0.load(Ordering::Relaxed), 2);
        found.sort();
        let mut expected: Vec<String> = entries.iter().map(|s| s.to_string()).collect();
        expected.sort();
        assert_eq!(found, expected);

        // Grouped frames judge every seed the way a frame of its own would.
        let grouped: HashSet<String> = {
            let mut found = HashSet::new();
            scratch
                .run_batch::<_, SimdLanes, _>(&plan, &layout, &LowBossDraw, 0, &mut |seed: &Seed| {
                    found.insert(seed.to_string());
                })
                .unwrap();
            found
        };
        for entry in entries {
            let alone = BatchPlan::Provider(Arc::new(SeedList::from_strs(&[entry]).unwrap()));
            let mut hit = false;
            scratch
                .run_batch::<_, SimdLanes, _>(&alone, &layout, &LowBossDraw, 0, &mut |_: &Seed| {
                    hit = true
                })
                .unwrap();
            assert_eq!(grouped.contains(entry), hit, "{entry}");
        }
    }

    #[test]
    fn batch_seed_counts_shrink_only_at_the_provider_tail() {
        let sequential = BatchPlan::Sequential(SequentialPlan::new(4, 2));
        assert_eq!(sequential.batch_seed_count(0), 35 * 35);
        assert_eq!(sequential.batch_seed_count(sequential.max_batch() - 1), 35 * 35);

        let entries: Vec<String> = (0..10).map(|i| format!("S{i}")).collect();
        let provider = BatchPlan::Provider(Arc::new(SeedList::from_strs(&entries).unwrap()));
        assert_eq!(provider.max_batch(), 2);
        assert_eq!(provider.batch_seed_count(0), 8);
        assert_eq!(provider.batch_seed_count(1), 2);
        let total: u64 = (0..provider.max_batch()).map(|i| provider.batch_seed_count(i)).sum();
        assert_eq!(total, 10);
    }

    #[test]
    fn unreadable_provider_seeds_fail_the_batch() {
        struct Broken;
        impl SeedProvider for Broken {
            fn seed_count(&self) -> u64 {
                3
            }
            fn seed_at(&self, index: u64) -> Result<Seed, SeedError> {
                if index == 1 { Err(SeedError::Empty) } else { Seed::new("OK") }
            }
        }
        let plan = BatchPlan::Provider(Arc::new(Broken));
        let layout = layout_for(&[]);
        let mut scratch = WorkerScratch::new(&layout);
        let result = scratch.run_batch::<_, SimdLanes, _>(&plan, &layout, &AcceptAll, 0, &mut |_: &Seed| {});
        assert!(matches!(result, Err(BatchError::Seed { index: 1, .. })));
    }
}

// ========================================================================================
//
//                   Execution contexts: what a filter sees of a batch
//
// ========================================================================================
//
// A filter never touches hashes, caches or lanes directly. It asks a context for named
// random streams and draws from them. The wide context answers for all lanes of a batch
// at once; the single context answers for one lane. Both expose the same operations
// through `SearchContext`, and lane `i` of any wide result is bit-identical to the
// single-context result for seed `i`.
//
// The usual shape of a filter is a cheap wide pass that narrows the mask, followed by
// `search_individual_seeds` for the branchy logic that only a handful of lanes survive.

use crate::cache::{MAX_KEY_LENGTH, PartialHashCache};
use crate::hash;
use crate::kernel::{LANE_COUNT, LaneBackend, LaneF64, LaneMask, lanes};
use crate::prng;
use crate::seed::{Seed, SeedLanes};
use crate::stream::{
    PrngStream, RESAMPLE_CACHE_LIMIT, ResampleStream, WidePrngStream, WideResampleStream,
    resample_key,
};
use bumpalo::Bump;
use std::marker::PhantomData;

/// The operation set shared by the wide and the single-seed context.
pub trait SearchContext {
    /// A draw: `f64` for one seed, one value per lane for the wide context.
    type Float: Copy;
    /// An integer draw.
    type Int: Copy;
    /// A draw from a choice list.
    type Element<T: Copy>: Copy;
    type Stream;
    type Resample;

    /// The pseudo-hash of `key` against the context's seed(s). With `use_cache` the seed
    /// half is taken from, or stored into, the partial-hash cache.
    fn pseudo_hash(&mut self, key: &str, use_cache: bool) -> Self::Float;

    /// A stream whose state starts at the cached pseudo-hash of `key`.
    fn create_prng_stream(&mut self, key: &str) -> Self::Stream {
        self.create_prng_stream_with(key, true)
    }

    fn create_prng_stream_with(&mut self, key: &str, use_cache: bool) -> Self::Stream;

    /// Like `create_prng_stream`, but yields the invalid stream when `include` is false.
    /// Drawing from the invalid stream is a programming error.
    fn create_optional_prng_stream(&mut self, key: &str, include: bool) -> Self::Stream;

    fn create_resample_stream(&mut self, key: &str) -> Self::Resample;

    /// Sub-stream `index` of a resample stream, derived on first use. Indices must be
    /// requested in order, starting at 0.
    fn resample_stream<'r>(
        &mut self,
        stream: &'r mut Self::Resample,
        index: usize,
    ) -> &'r mut Self::Stream;

    /// Advances `stream` and returns a uniform draw in `[0, 1)`.
    fn next_random(&self, stream: &mut Self::Stream) -> Self::Float;

    /// Advances `stream` and returns a uniform integer in `[min, max]`.
    fn next_random_int(&self, stream: &mut Self::Stream, min: i32, max: i32) -> Self::Int;

    /// Advances `stream` and returns one of `choices`, which must not be empty.
    fn next_random_element<T: Copy>(
        &self,
        stream: &mut Self::Stream,
        choices: &[T],
    ) -> Self::Element<T>;
}

// ========================================================================================
//                                    Wide context
// ========================================================================================

pub struct WideSearchContext<'a, B: LaneBackend> {
    cache: PartialHashCache<'a>,
    bump: &'a Bump,
    seed_hash: LaneF64,
    _backend: PhantomData<B>,
}

impl<'a, B: LaneBackend> WideSearchContext<'a, B> {
    pub fn new(cache: PartialHashCache<'a>, bump: &'a Bump) -> Self {
        let seed_hash = cache.seed_hash();
        Self {
            cache,
            bump,
            seed_hash,
            _backend: PhantomData,
        }
    }

    /// The lanes that carry a real seed.
    #[inline]
    pub fn valid_lanes(&self) -> LaneMask {
        self.cache.valid_lanes()
    }

    #[inline]
    pub fn seeds(&self) -> &SeedLanes {
        self.cache.seeds()
    }

    #[inline]
    pub fn seed(&self, lane: usize) -> &Seed {
        self.cache.seeds().seed(lane)
    }

    #[inline]
    fn draw(&self, state: LaneF64) -> LaneF64 {
        B::lua_random((state + self.seed_hash) / LaneF64::splat(2.0))
    }

    /// `next_random` that only advances the lanes set in `mask`. Lanes outside the mask
    /// keep their stream position; their returned values are meaningless.
    #[inline]
    pub fn next_random_masked(&self, stream: &mut WidePrngStream, mask: LaneMask) -> LaneF64 {
        let state = stream.advance_masked::<B>(mask);
        self.draw(state)
    }

    pub fn next_random_int_masked(
        &self,
        stream: &mut WidePrngStream,
        mask: LaneMask,
        min: i32,
        max: i32,
    ) -> [i32; LANE_COUNT] {
        self.next_random_masked(stream, mask)
            .to_array()
            .map(|value| prng::random_int(value, min, max))
    }

    pub fn next_random_element_masked<T: Copy>(
        &self,
        stream: &mut WidePrngStream,
        mask: LaneMask,
        choices: &[T],
    ) -> [T; LANE_COUNT] {
        self.next_random_masked(stream, mask)
            .to_array()
            .map(|value| choices[prng::random_index(value, choices.len())])
    }

    /// Runs `predicate` on a single-seed context for every valid lane set in `mask`, and
    /// returns the mask of lanes for which it returned true.
    pub fn search_individual_seeds<F>(&mut self, mask: LaneMask, mut predicate: F) -> LaneMask
    where
        F: FnMut(&mut SingleSearchContext<'_>) -> bool,
    {
        let mut result = LaneMask::splat(false);
        let bump = self.bump;
        for lane in lanes(mask & self.cache.valid_lanes()) {
            let mut single = SingleSearchContext::new(self.cache.reborrow(), lane, bump);
            if predicate(&mut single) {
                result.set(lane, true);
            }
        }
        result
    }
}

impl<'a, B: LaneBackend> SearchContext for WideSearchContext<'a, B> {
    type Float = LaneF64;
    type Int = [i32; LANE_COUNT];
    type Element<T: Copy> = [T; LANE_COUNT];
    type Stream = WidePrngStream;
    type Resample = WideResampleStream<'a>;

    fn pseudo_hash(&mut self, key: &str, use_cache: bool) -> LaneF64 {
        let key = key.as_bytes();
        // The cache has no slot past the longest key it can hold.
        let mut state = if use_cache && key.len() <= MAX_KEY_LENGTH {
            self.cache.partial_hash::<B>(key.len())
        } else {
            self.cache.seeds().partial_hash::<B>(key.len())
        };
        for (index, &code) in key.iter().enumerate().rev() {
            state = B::fold_hash(state, LaneF64::splat(code as f64), (index + 1) as f64);
        }
        state
    }

    fn create_prng_stream_with(&mut self, key: &str, use_cache: bool) -> WidePrngStream {
        WidePrngStream::new(self.pseudo_hash(key, use_cache))
    }

    fn create_optional_prng_stream(&mut self, key: &str, include: bool) -> WidePrngStream {
        if include {
            self.create_prng_stream(key)
        } else {
            WidePrngStream::INVALID
        }
    }

    fn create_resample_stream(&mut self, key: &str) -> WideResampleStream<'a> {
        let bump = self.bump;
        let key: &'a str = bump.alloc_str(key);
        let initial = self.create_prng_stream(key);
        WideResampleStream::new(key, initial, bump)
    }

    fn resample_stream<'r>(
        &mut self,
        stream: &'r mut WideResampleStream<'a>,
        index: usize,
    ) -> &'r mut WidePrngStream {
        let bump = self.bump;
        stream.get_or_create(index, |key| {
            let composed = resample_key(bump, key, index);
            self.create_prng_stream_with(composed, index < RESAMPLE_CACHE_LIMIT)
        })
    }

    #[inline]
    fn next_random(&self, stream: &mut WidePrngStream) -> LaneF64 {
        let state = stream.advance::<B>();
        self.draw(state)
    }

    fn next_random_int(&self, stream: &mut WidePrngStream, min: i32, max: i32) -> [i32; LANE_COUNT] {
        self.next_random(stream)
            .to_array()
            .map(|value| prng::random_int(value, min, max))
    }

    fn next_random_element<T: Copy>(
        &self,
        stream: &mut WidePrngStream,
        choices: &[T],
    ) -> [T; LANE_COUNT] {
        self.next_random(stream)
            .to_array()
            .map(|value| choices[prng::random_index(value, choices.len())])
    }
}

// ========================================================================================
//                                  Single-seed context
// ========================================================================================

/// One lane of a batch, evaluated with scalar arithmetic. Shares the batch's cache with
/// the wide context it was created from.
pub struct SingleSearchContext<'a> {
    cache: PartialHashCache<'a>,
    lane: usize,
    bump: &'a Bump,
    seed_hash: f64,
}

impl<'a> SingleSearchContext<'a> {
    pub fn new(cache: PartialHashCache<'a>, lane: usize, bump: &'a Bump) -> Self {
        debug_assert!(lane < LANE_COUNT);
        let seed_hash = cache.seed_hash()[lane];
        Self {
            cache,
            lane,
            bump,
            seed_hash,
        }
    }

    #[inline]
    pub fn lane(&self) -> usize {
        self.lane
    }

    #[inline]
    pub fn seed(&self) -> &Seed {
        self.cache.seeds().seed(self.lane)
    }
}

impl<'a> SearchContext for SingleSearchContext<'a> {
    type Float = f64;
    type Int = i32;
    type Element<T: Copy> = T;
    type Stream = PrngStream;
    type Resample = ResampleStream<'a>;

    fn pseudo_hash(&mut self, key: &str, use_cache: bool) -> f64 {
        let key = key.as_bytes();
        let partial = if use_cache && key.len() <= MAX_KEY_LENGTH {
            self.cache.partial_hash_lane(key.len(), self.lane)
        } else {
            self.seed().partial_hash(key.len())
        };
        hash::finish_hash(partial, key)
    }

    fn create_prng_stream_with(&mut self, key: &str, use_cache: bool) -> PrngStream {
        PrngStream::new(self.pseudo_hash(key, use_cache))
    }

    fn create_optional_prng_stream(&mut self, key: &str, include: bool) -> PrngStream {
        if include {
            self.create_prng_stream(key)
        } else {
            PrngStream::INVALID
        }
    }

    fn create_resample_stream(&mut self, key: &str) -> ResampleStream<'a> {
        let bump = self.bump;
        let key: &'a str = bump.alloc_str(key);
        let initial = self.create_prng_stream(key);
        ResampleStream::new(key, initial, bump)
    }

    fn resample_stream<'r>(
        &mut self,
        stream: &'r mut ResampleStream<'a>,
        index: usize,
    ) -> &'r mut PrngStream {
        let bump = self.bump;
        stream.get_or_create(index, |key| {
            let composed = resample_key(bump, key, index);
            self.create_prng_stream_with(composed, index < RESAMPLE_CACHE_LIMIT)
        })
    }

    #[inline]
    fn next_random(&self, stream: &mut PrngStream) -> f64 {
        let state = stream.advance();
        prng::lua_random(prng::pseudo_seed(state, self.seed_hash))
    }

    #[inline]
    fn next_random_int(&self, stream: &mut PrngStream, min: i32, max: i32) -> i32 {
        prng::random_int(self.next_random(stream), min, max)
    }

    #[inline]
    fn next_random_element<T: Copy>(&self, stream: &mut PrngStream, choices: &[T]) -> T {
        choices[prng::random_index(self.next_random(stream), choices.len())]
    }
}

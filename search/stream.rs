// ========================================================================================
//                          PRNG streams and resample streams
// ========================================================================================

// A stream is a cursor over one named random sequence of a seed. A resample stream is a
// family of such cursors derived from one key: when a draw collides with something
// already picked, the game redraws from `key_resample2`, then `key_resample3`, and so on,
// never reusing a sub-stream. Sub-streams are derived lazily, in order, and memoized in
// the batch arena.

use crate::kernel::{LaneBackend, LaneF64, LaneMask};
use crate::prng;
use bumpalo::Bump;
use bumpalo::collections::{String as BumpString, Vec as BumpVec};
use std::fmt::Write as FmtWrite;
use std::simd::Select;

/// The suffix joined onto a key to name its resample sub-streams.
pub const RESAMPLE_SUFFIX: &str = "_resample";

/// The number appended for sub-stream 0. The game's attempt counter starts at 1 and is
/// incremented before the first redraw.
pub const RESAMPLE_FIRST_ATTEMPT: usize = 2;

/// Sub-streams at or beyond this index are hashed without the partial-hash cache.
pub const RESAMPLE_CACHE_LIMIT: usize = 8;

/// The state value marking a stream that a filter excluded from consideration.
const INVALID_STATE: f64 = -1.0;

/// Builds `key_resample{index + 2}` in the arena.
pub fn resample_key<'a>(bump: &'a Bump, key: &str, resample_index: usize) -> &'a str {
    let mut composed = BumpString::with_capacity_in(key.len() + RESAMPLE_SUFFIX.len() + 2, bump);
    composed.push_str(key);
    composed.push_str(RESAMPLE_SUFFIX);
    // Writing an integer into an in-memory string cannot fail.
    let _ = write!(composed, "{}", resample_index + RESAMPLE_FIRST_ATTEMPT);
    composed.into_bump_str()
}

/// The key lengths a resample stream on `key` will hash through the cache.
pub fn cached_resample_key_lengths(key_length: usize) -> impl Iterator<Item = usize> {
    (0..RESAMPLE_CACHE_LIMIT).map(move |index| {
        key_length + RESAMPLE_SUFFIX.len() + decimal_digits(index + RESAMPLE_FIRST_ATTEMPT)
    })
}

fn decimal_digits(mut value: usize) -> usize {
    let mut digits = 1;
    while value >= 10 {
        value /= 10;
        digits += 1;
    }
    digits
}

// ========================================================================================
//                                  Single-seed streams
// ========================================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PrngStream {
    state: f64,
}

impl PrngStream {
    /// A stream that must never be drawn from.
    pub const INVALID: Self = Self {
        state: INVALID_STATE,
    };

    #[inline]
    pub fn new(state: f64) -> Self {
        Self { state }
    }

    #[inline]
    pub fn state(&self) -> f64 {
        self.state
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.state == INVALID_STATE
    }

    /// Advances the state one step and returns it.
    #[inline]
    pub fn advance(&mut self) -> f64 {
        debug_assert!(!self.is_invalid(), "advanced an excluded PRNG stream");
        self.state = prng::iterate(self.state);
        self.state
    }
}

pub struct ResampleStream<'a> {
    key: &'a str,
    initial: PrngStream,
    resamples: BumpVec<'a, PrngStream>,
}

impl<'a> ResampleStream<'a> {
    pub(crate) fn new(key: &'a str, initial: PrngStream, bump: &'a Bump) -> Self {
        Self {
            key,
            initial,
            resamples: BumpVec::new_in(bump),
        }
    }

    #[inline]
    pub fn key(&self) -> &'a str {
        self.key
    }

    #[inline]
    pub fn initial(&mut self) -> &mut PrngStream {
        &mut self.initial
    }

    /// How many sub-streams have been derived so far.
    #[inline]
    pub fn resample_count(&self) -> usize {
        self.resamples.len()
    }

    /// Returns sub-stream `index`, deriving it with `derive` if this is its first use.
    /// Indices must be requested in order.
    pub(crate) fn get_or_create(
        &mut self,
        index: usize,
        derive: impl FnOnce(&'a str) -> PrngStream,
    ) -> &mut PrngStream {
        debug_assert!(
            index <= self.resamples.len(),
            "resample {index} requested before resample {}",
            self.resamples.len()
        );
        if index == self.resamples.len() {
            self.resamples.push(derive(self.key));
        }
        &mut self.resamples[index]
    }
}

// ========================================================================================
//                                    Wide streams
// ========================================================================================

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WidePrngStream {
    state: LaneF64,
}

impl WidePrngStream {
    pub const INVALID: Self = Self {
        state: LaneF64::from_array([INVALID_STATE; crate::kernel::LANE_COUNT]),
    };

    #[inline]
    pub fn new(state: LaneF64) -> Self {
        Self { state }
    }

    #[inline]
    pub fn state(&self) -> LaneF64 {
        self.state
    }

    #[inline]
    pub fn is_invalid(&self) -> bool {
        self.state[0] == INVALID_STATE
    }

    /// One lane of this stream as a single-seed stream.
    #[inline]
    pub fn lane(&self, lane: usize) -> PrngStream {
        PrngStream::new(self.state[lane])
    }

    #[inline]
    pub fn advance<B: LaneBackend>(&mut self) -> LaneF64 {
        debug_assert!(!self.is_invalid(), "advanced an excluded PRNG stream");
        self.state = B::iterate(self.state);
        self.state
    }

    /// Advances only the lanes set in `mask`; the other lanes keep their state. Returns
    /// the advanced state of every lane, committed or not.
    #[inline]
    pub fn advance_masked<B: LaneBackend>(&mut self, mask: LaneMask) -> LaneF64 {
        debug_assert!(!self.is_invalid(), "advanced an excluded PRNG stream");
        let next = B::iterate(self.state);
        self.state = mask.select(next, self.state);
        next
    }
}

pub struct WideResampleStream<'a> {
    key: &'a str,
    initial: WidePrngStream,
    resamples: BumpVec<'a, WidePrngStream>,
}

impl<'a> WideResampleStream<'a> {
    pub(crate) fn new(key: &'a str, initial: WidePrngStream, bump: &'a Bump) -> Self {
        Self {
            key,
            initial,
            resamples: BumpVec::new_in(bump),
        }
    }

    #[inline]
    pub fn key(&self) -> &'a str {
        self.key
    }

    #[inline]
    pub fn initial(&mut self) -> &mut WidePrngStream {
        &mut self.initial
    }

    #[inline]
    pub fn resample_count(&self) -> usize {
        self.resamples.len()
    }

    pub(crate) fn get_or_create(
        &mut self,
        index: usize,
        derive: impl FnOnce(&'a str) -> WidePrngStream,
    ) -> &mut WidePrngStream {
        debug_assert!(
            index <= self.resamples.len(),
            "resample {index} requested before resample {}",
            self.resamples.len()
        );
        if index == self.resamples.len() {
            self.resamples.push(derive(self.key));
        }
        &mut self.resamples[index]
    }
}

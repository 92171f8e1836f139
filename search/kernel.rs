// ========================================================================================
//
//                      The kernel: lane-parallel PRNG arithmetic
//
// ========================================================================================
//
// This module contains the innermost arithmetic of the search engine: the pseudo-hash
// fold step, the state recurrence, and the LuaJIT generator, each evaluated for
// `LANE_COUNT` seeds at once. It contains zero search logic. Two interchangeable
// backends implement the same trait; a lane computed by either one is bit-identical to
// the scalar functions in `hash` and `prng` applied to that lane alone.

use crate::hash::{self, HASH_CONSTANT};
use crate::prng::{
    self, ITERATE_MULTIPLIER, ITERATE_OFFSET, LUA_MANTISSA_MASK, LUA_ONE_BITS,
    LUA_SEED_MINIMUMS, LUA_WARMUP_STEPS, ROUND13_SCALE,
};
use std::f64::consts::{E, PI};
use std::simd::cmp::SimdPartialOrd;
use std::simd::num::SimdFloat;
use std::simd::{Mask, Select, Simd, StdFloat};

// --- Type Aliases for Readability ---
// These types are part of the public API of the kernel.
pub const LANE_COUNT: usize = 8;
pub type LaneF64 = Simd<f64, LANE_COUNT>;
pub type LaneU64 = Simd<u64, LANE_COUNT>;
pub type LaneMask = Mask<i64, LANE_COUNT>;

/// Iterates the indices of the set lanes of `mask`, lowest first.
#[inline]
pub fn lanes(mask: LaneMask) -> impl Iterator<Item = usize> {
    (0..LANE_COUNT).filter(move |&lane| mask.test(lane))
}

// ========================================================================================
//                                 The backend contract
// ========================================================================================

/// A lane-parallel implementation of the three PRNG primitives.
///
/// Implementations must be bit-identical to the scalar reference functions lane by lane;
/// they differ only in how the lanes are fanned out.
pub trait LaneBackend: Copy + Send + Sync + 'static {
    /// A short name for logs.
    const NAME: &'static str;

    /// One pseudo-hash fold step with a per-lane character code and a shared 1-based
    /// position.
    fn fold_hash(state: LaneF64, codes: LaneF64, position: f64) -> LaneF64;

    /// One step of the stream state recurrence.
    fn iterate(state: LaneF64) -> LaneF64;

    /// Reseeds the LuaJIT generator with each lane's pseudo-seed and returns its first
    /// draw.
    fn lua_random(pseudo_seed: LaneF64) -> LaneF64;
}

/// Vectorized backend built on `std::simd`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SimdLanes;

/// Portable fallback that applies the scalar reference functions lane by lane.
#[derive(Clone, Copy, Debug, Default)]
pub struct PortableLanes;

#[inline(always)]
fn fract_lanes(x: LaneF64) -> LaneF64 {
    x - x.floor()
}

#[inline(always)]
fn round13_lanes(x: LaneF64) -> LaneF64 {
    let scale = LaneF64::splat(ROUND13_SCALE);
    let scaled = x * scale;
    let residual = x.mul_add(scale, -scaled);
    let whole = scaled.floor();
    let round_up = ((scaled - whole) - LaneF64::splat(0.5)).simd_ge(-residual);
    round_up.select(whole + LaneF64::splat(1.0), whole) / scale
}

/// The lane-parallel form of one Tausworthe component step.
#[inline(always)]
fn tw223_lanes(z: LaneU64, k: u64, q: u64, s: u64) -> LaneU64 {
    let high_mask = LaneU64::splat(u64::MAX << (64 - k));
    (((z << LaneU64::splat(q)) ^ z) >> LaneU64::splat(k - s))
        ^ ((z & high_mask) << LaneU64::splat(s))
}

#[inline(always)]
fn lua_step_lanes(state: &mut [LaneU64; 4]) -> LaneU64 {
    state[0] = tw223_lanes(state[0], 63, 31, 18);
    state[1] = tw223_lanes(state[1], 58, 19, 28);
    state[2] = tw223_lanes(state[2], 55, 24, 7);
    state[3] = tw223_lanes(state[3], 47, 21, 8);
    ((state[0] ^ state[1] ^ state[2] ^ state[3]) & LaneU64::splat(LUA_MANTISSA_MASK))
        | LaneU64::splat(LUA_ONE_BITS)
}

impl LaneBackend for SimdLanes {
    const NAME: &'static str = "simd";

    #[inline(always)]
    fn fold_hash(state: LaneF64, codes: LaneF64, position: f64) -> LaneF64 {
        fract_lanes(
            (LaneF64::splat(HASH_CONSTANT) / state) * codes * LaneF64::splat(PI)
                + LaneF64::splat(PI * position),
        )
    }

    #[inline(always)]
    fn iterate(state: LaneF64) -> LaneF64 {
        round13_lanes(fract_lanes(
            state * LaneF64::splat(ITERATE_MULTIPLIER) + LaneF64::splat(ITERATE_OFFSET),
        ))
    }

    #[inline(always)]
    fn lua_random(pseudo_seed: LaneF64) -> LaneF64 {
        let mut state = [LaneU64::splat(0); 4];
        let mut d = pseudo_seed;
        for (component, minimum) in state.iter_mut().zip(LUA_SEED_MINIMUMS) {
            d = d * LaneF64::splat(PI) + LaneF64::splat(E);
            let bits = d.to_bits();
            let minimum = LaneU64::splat(minimum);
            *component = bits.simd_lt(minimum).select(bits + minimum, bits);
        }
        for _ in 0..LUA_WARMUP_STEPS {
            lua_step_lanes(&mut state);
        }
        LaneF64::from_bits(lua_step_lanes(&mut state)) - LaneF64::splat(1.0)
    }
}

impl LaneBackend for PortableLanes {
    const NAME: &'static str = "portable";

    #[inline]
    fn fold_hash(state: LaneF64, codes: LaneF64, position: f64) -> LaneF64 {
        let state = state.to_array();
        let codes = codes.to_array();
        LaneF64::from_array(std::array::from_fn(|lane| {
            hash::fract((HASH_CONSTANT / state[lane]) * codes[lane] * PI + PI * position)
        }))
    }

    #[inline]
    fn iterate(state: LaneF64) -> LaneF64 {
        LaneF64::from_array(state.to_array().map(prng::iterate))
    }

    #[inline]
    fn lua_random(pseudo_seed: LaneF64) -> LaneF64 {
        LaneF64::from_array(pseudo_seed.to_array().map(prng::lua_random))
    }
}

// ========================================================================================
//                              Runtime capability detection
// ========================================================================================

/// The widest vector instruction set detected on this machine.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum Isa {
    Avx512,
    Avx2,
    // Baseline on every x86_64 CPU.
    Sse2,
    Neon,
    Unknown,
}

impl Isa {
    /// Whether `SimdLanes` lowers to real vector instructions on this ISA.
    pub fn is_vectorized(self) -> bool {
        !matches!(self, Isa::Unknown)
    }
}

#[cfg(target_arch = "x86_64")]
pub fn detect_isa() -> Isa {
    if is_x86_feature_detected!("avx512f") {
        return Isa::Avx512;
    }
    if is_x86_feature_detected!("avx2") {
        return Isa::Avx2;
    }
    Isa::Sse2
}

#[cfg(target_arch = "aarch64")]
pub fn detect_isa() -> Isa {
    Isa::Neon
}

#[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
pub fn detect_isa() -> Isa {
    Isa::Unknown
}

/// The backend a search will run on.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum BackendKind {
    Simd,
    Portable,
}

impl BackendKind {
    pub fn name(self) -> &'static str {
        match self {
            BackendKind::Simd => SimdLanes::NAME,
            BackendKind::Portable => PortableLanes::NAME,
        }
    }
}

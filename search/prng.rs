// ========================================================================================
//
//                  The PRNG: a low-precision outer recurrence feeding
//                        a bit-exact LuaJIT inner generator
//
// ========================================================================================
//
// The game keeps one double of state per named stream and advances it with a small
// affine recurrence whose result is printed with 13 decimals and parsed back. Each draw
// then averages that state with the seed hash, reseeds the scripting runtime's generator
// with the average, and takes one value from it. Both layers are reproduced here, in
// that order.

use std::f64::consts::{E, PI};

/// Multiplier of the state recurrence.
pub const ITERATE_MULTIPLIER: f64 = 1.72431234;
/// Offset of the state recurrence.
pub const ITERATE_OFFSET: f64 = 2.134453429141;

/// `10^13`, exactly representable as a double.
pub const ROUND13_SCALE: f64 = 10_000_000_000_000.0;

/// Rounds a value in `[0, 1)` to 13 decimal places, half away from zero, reproducing
/// `tonumber(string.format("%.13f", x))`.
///
/// `x * 1e13` is itself rounded, so a product that lands on or next to a `.5` boundary
/// may sit on the wrong side of it. The fused multiply-add residual recovers the exact
/// product, and the half-way decision is made against that instead.
#[inline(always)]
pub fn round13(x: f64) -> f64 {
    let scaled = x * ROUND13_SCALE;
    let residual = x.mul_add(ROUND13_SCALE, -scaled);
    let whole = scaled.floor();
    let rounded = if (scaled - whole) - 0.5 >= -residual {
        whole + 1.0
    } else {
        whole
    };
    rounded / ROUND13_SCALE
}

/// Advances a stream state by one step.
#[inline(always)]
pub fn iterate(state: f64) -> f64 {
    let next = round13(crate::hash::fract(state * ITERATE_MULTIPLIER + ITERATE_OFFSET));
    debug_assert!(next.is_finite(), "PRNG state became {next}");
    next
}

/// Couples an iterated state to the seed being tested.
#[inline(always)]
pub fn pseudo_seed(state: f64, seed_hash: f64) -> f64 {
    (state + seed_hash) / 2.0
}

// ========================================================================================
//                         LuaJIT-compatible inner generator
// ========================================================================================

/// Per-generator minimums: `1 << (64 - k)` for the four Tausworthe components, so that
/// the top `k` bits of each component are never all zero.
pub const LUA_SEED_MINIMUMS: [u64; 4] = [1 << 1, 1 << 6, 1 << 9, 1 << 17];

/// Number of warm-up steps taken after reseeding.
pub const LUA_WARMUP_STEPS: usize = 10;

/// Mantissa mask and exponent bits that turn 52 random bits into a double in `[1, 2)`.
pub const LUA_MANTISSA_MASK: u64 = 0x000f_ffff_ffff_ffff;
pub const LUA_ONE_BITS: u64 = 0x3ff0_0000_0000_0000;

/// The four-component combined Tausworthe generator used by `math.random`.
#[derive(Clone, Copy, Debug)]
pub struct LuaRandom {
    state: [u64; 4],
}

/// One component step; `k`, `q`, `s` are the component's word length and shift
/// parameters.
#[inline(always)]
fn tw223_component(z: u64, k: u32, q: u32, s: u32) -> u64 {
    (((z << q) ^ z) >> (k - s)) ^ ((z & (u64::MAX << (64 - k))) << s)
}

impl LuaRandom {
    /// Equivalent of `math.randomseed(seed)`.
    pub fn new(seed: f64) -> Self {
        let mut state = [0u64; 4];
        let mut d = seed;
        for (component, minimum) in state.iter_mut().zip(LUA_SEED_MINIMUMS) {
            d = d * PI + E;
            let bits = d.to_bits();
            *component = if bits < minimum { bits + minimum } else { bits };
        }
        let mut generator = Self { state };
        for _ in 0..LUA_WARMUP_STEPS {
            generator.step();
        }
        generator
    }

    #[inline(always)]
    fn step(&mut self) -> u64 {
        let [a, b, c, d] = self.state;
        let a = tw223_component(a, 63, 31, 18);
        let b = tw223_component(b, 58, 19, 28);
        let c = tw223_component(c, 55, 24, 7);
        let d = tw223_component(d, 47, 21, 8);
        self.state = [a, b, c, d];
        ((a ^ b ^ c ^ d) & LUA_MANTISSA_MASK) | LUA_ONE_BITS
    }

    /// Equivalent of `math.random()`: a double in `[0, 1)`.
    #[inline]
    pub fn next_f64(&mut self) -> f64 {
        f64::from_bits(self.step()) - 1.0
    }
}

/// The single value `math.random()` returns right after `math.randomseed(seed)`.
#[inline]
pub fn lua_random(seed: f64) -> f64 {
    LuaRandom::new(seed).next_f64()
}

/// Maps a uniform draw onto `[min, max]` the way `math.random(min, max)` does.
#[inline(always)]
pub fn random_int(value: f64, min: i32, max: i32) -> i32 {
    (value * (max as f64 - min as f64 + 1.0)).floor() as i32 + min
}

/// Maps a uniform draw onto a 0-based index into `len` choices.
#[inline(always)]
pub fn random_index(value: f64, len: usize) -> usize {
    debug_assert!(len > 0, "cannot pick from an empty choice list");
    ((value * len as f64).floor() as usize).min(len - 1)
}

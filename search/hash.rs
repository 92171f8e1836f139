// ========================================================================================
//
//                      The pseudo-hash: seed + key -> PRNG state
//
// ========================================================================================
//
// The game derives the starting state of every named random stream by folding the
// characters of `key ++ seed` from right to left into a double. Because the seed sits
// at the end of that string, its characters are folded first, and the only thing they
// depend on besides the seed itself is the position offset, i.e. the key length. That
// split is what the partial-hash cache exploits: the seed half is computed once per key
// length per batch, and only the key half is folded per call.
//
// Every operation below is a plain IEEE-754 double operation in a fixed order. Nothing
// may be reassociated or fused, or the results drift from the game after a few steps.

use std::f64::consts::PI;

/// The multiplier the game divides by the running state on each fold step.
pub const HASH_CONSTANT: f64 = 1.1239285023;

/// The true fractional part `x - floor(x)`. Unlike `f64::fract`, this stays in `[0, 1)`
/// and matches the game's `% 1` for the positive values the recurrences produce.
#[inline(always)]
pub fn fract(x: f64) -> f64 {
    x - x.floor()
}

/// One step of the fold: absorbs the character `code` found at 1-based `position` of
/// the hashed string.
#[inline(always)]
pub fn fold_char(state: f64, code: u8, position: usize) -> f64 {
    fract((HASH_CONSTANT / state) * code as f64 * PI + PI * position as f64)
}

/// Folds the seed characters, starting from `1.0`, as they appear after a key of
/// `key_length` bytes. For a fixed key length the result depends only on the seed.
#[inline]
pub fn partial_hash(seed: &[u8], key_length: usize) -> f64 {
    let mut state = 1.0;
    for (index, &code) in seed.iter().enumerate().rev() {
        state = fold_char(state, code, key_length + index + 1);
    }
    state
}

/// Folds the key characters on top of a partial hash computed for `key.len()`.
#[inline]
pub fn finish_hash(partial: f64, key: &[u8]) -> f64 {
    let mut state = partial;
    for (index, &code) in key.iter().enumerate().rev() {
        state = fold_char(state, code, index + 1);
    }
    debug_assert!(state.is_finite(), "pseudo-hash produced {state}");
    state
}

/// The full, uncached pseudo-hash of `key ++ seed`.
#[inline]
pub fn pseudo_hash(key: &[u8], seed: &[u8]) -> f64 {
    finish_hash(partial_hash(seed, key.len()), key)
}

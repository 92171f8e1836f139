// ========================================================================================
//                             Seeds and seed lanes
// ========================================================================================

// This file holds the seed value type that every other module passes around. A seed is
// validated exactly once, when it is constructed; nothing downstream re-checks it.

use crate::hash;
use crate::kernel::{LANE_COUNT, LaneBackend, LaneF64, LaneMask};
use std::fmt;
use thiserror::Error;

/// The longest seed the game accepts.
pub const MAX_SEED_LENGTH: usize = 8;

/// Every character a seed may contain, in enumeration order.
pub const SEED_ALPHABET: &[u8] = b"123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// The number of distinct seed characters. Batch arithmetic is expressed in this base.
pub const ALPHABET_SIZE: usize = SEED_ALPHABET.len();

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SeedError {
    #[error("a seed must contain at least one character")]
    Empty,
    #[error("seed is {length} characters long; the maximum is {MAX_SEED_LENGTH}")]
    TooLong { length: usize },
    #[error("invalid seed character {character:?} at position {position}")]
    InvalidCharacter { character: char, position: usize },
}

/// Maps a raw character onto the seed alphabet. The digit zero is accepted and stored
/// as the letter `O`, matching how the game normalizes typed seeds.
#[inline]
pub fn normalize_seed_char(byte: u8) -> Option<u8> {
    match byte {
        b'0' => Some(b'O'),
        b'1'..=b'9' | b'A'..=b'Z' => Some(byte),
        _ => None,
    }
}

/// A validated seed of one to eight alphabet characters.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Seed {
    chars: [u8; MAX_SEED_LENGTH],
    len: u8,
}

impl Seed {
    pub fn new(text: &str) -> Result<Self, SeedError> {
        Self::from_bytes(text.as_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, SeedError> {
        if bytes.is_empty() {
            return Err(SeedError::Empty);
        }
        if bytes.len() > MAX_SEED_LENGTH {
            return Err(SeedError::TooLong {
                length: bytes.len(),
            });
        }
        let mut chars = [0u8; MAX_SEED_LENGTH];
        for (position, &byte) in bytes.iter().enumerate() {
            chars[position] = normalize_seed_char(byte).ok_or(SeedError::InvalidCharacter {
                character: byte as char,
                position,
            })?;
        }
        Ok(Self {
            chars,
            len: bytes.len() as u8,
        })
    }

    /// Builds a seed from characters already known to be in the alphabet. Used by the
    /// sequential enumerator, which only ever draws from `SEED_ALPHABET`.
    #[inline]
    pub(crate) fn from_alphabet_chars(mut chars: [u8; MAX_SEED_LENGTH], len: usize) -> Self {
        debug_assert!((1..=MAX_SEED_LENGTH).contains(&len));
        debug_assert!(chars[..len].iter().all(|c| SEED_ALPHABET.contains(c)));
        // Equality and hashing look at the whole buffer.
        chars[len..].fill(0);
        Self {
            chars,
            len: len as u8,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.chars[..self.len as usize]
    }

    pub fn as_str(&self) -> &str {
        // Every stored byte is an ASCII alphabet character.
        std::str::from_utf8(self.as_bytes()).unwrap_or_default()
    }

    /// The pseudo-hash state of this seed after folding all of its characters for a key
    /// of the given length.
    #[inline]
    pub fn partial_hash(&self, key_length: usize) -> f64 {
        hash::partial_hash(self.as_bytes(), key_length)
    }
}

impl fmt::Display for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for Seed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Seed({})", self.as_str())
    }
}

impl std::str::FromStr for Seed {
    type Err = SeedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Seed::new(s)
    }
}

// ========================================================================================
//                                    Seed lanes
// ========================================================================================

/// One seed per lane, all of the same length, with a mask marking which lanes carry a
/// real seed. Unused lanes repeat lane 0 so that wide arithmetic over them stays finite;
/// their results are discarded by the validity mask.
#[derive(Clone, Copy)]
pub struct SeedLanes {
    seeds: [Seed; LANE_COUNT],
    valid: LaneMask,
    length: usize,
    /// The character codes at each seed position, one vector per position.
    codes: [LaneF64; MAX_SEED_LENGTH],
}

impl SeedLanes {
    /// Packs up to `LANE_COUNT` seeds. Returns `None` when the slice is empty, too long,
    /// or mixes seed lengths.
    pub fn new(seeds: &[Seed]) -> Option<Self> {
        let first = *seeds.first()?;
        if seeds.len() > LANE_COUNT || seeds.iter().any(|s| s.len() != first.len()) {
            return None;
        }
        let mut lanes = [first; LANE_COUNT];
        let mut valid = LaneMask::splat(false);
        for (lane, seed) in seeds.iter().enumerate() {
            lanes[lane] = *seed;
            valid.set(lane, true);
        }
        Some(Self::from_parts(lanes, valid))
    }

    pub(crate) fn from_parts(seeds: [Seed; LANE_COUNT], valid: LaneMask) -> Self {
        let length = seeds[0].len();
        debug_assert!(seeds.iter().all(|s| s.len() == length));
        let mut codes = [LaneF64::splat(0.0); MAX_SEED_LENGTH];
        for (position, code) in codes.iter_mut().enumerate().take(length) {
            *code = LaneF64::from_array(std::array::from_fn(|lane| {
                seeds[lane].as_bytes()[position] as f64
            }));
        }
        Self {
            seeds,
            valid,
            length,
            codes,
        }
    }

    #[inline]
    pub fn seed(&self, lane: usize) -> &Seed {
        &self.seeds[lane]
    }

    #[inline]
    pub fn valid(&self) -> LaneMask {
        self.valid
    }

    #[inline]
    pub fn seed_length(&self) -> usize {
        self.length
    }

    /// The wide counterpart of [`Seed::partial_hash`]: folds every seed character from
    /// the last position to the first, for all lanes at once.
    pub fn partial_hash<B: LaneBackend>(&self, key_length: usize) -> LaneF64 {
        let mut state = LaneF64::splat(1.0);
        for position in (0..self.length).rev() {
            state = B::fold_hash(
                state,
                self.codes[position],
                (key_length + position + 1) as f64,
            );
        }
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_alphabet_character_round_trips() {
        for &c in SEED_ALPHABET {
            let text = (c as char).to_string();
            let seed = Seed::new(&text).unwrap();
            assert_eq!(seed.as_str(), text);
        }
    }

    #[test]
    fn zero_is_normalized_to_letter_o() {
        assert_eq!(Seed::new("A0B").unwrap().as_str(), "AOB");
    }

    #[test]
    fn characters_outside_the_alphabet_are_rejected() {
        for byte in 0u8..=127 {
            let accepted = normalize_seed_char(byte).is_some();
            let result = Seed::from_bytes(&[byte]);
            assert_eq!(result.is_ok(), accepted, "byte {byte}");
        }
        assert_eq!(
            Seed::new("ab"),
            Err(SeedError::InvalidCharacter {
                character: 'a',
                position: 0
            })
        );
    }

    #[test]
    fn seed_length_is_bounded() {
        assert_eq!(Seed::new(""), Err(SeedError::Empty));
        assert!(Seed::new("ABCDEFGH").is_ok());
        assert_eq!(
            Seed::new("ABCDEFGHI"),
            Err(SeedError::TooLong { length: 9 })
        );
    }

    #[test]
    fn seed_lanes_reject_mixed_lengths() {
        let a = Seed::new("AAAA").unwrap();
        let b = Seed::new("BBB").unwrap();
        assert!(SeedLanes::new(&[a, b]).is_none());
        assert!(SeedLanes::new(&[]).is_none());

        let lanes = SeedLanes::new(&[a, a]).unwrap();
        assert!(lanes.valid().test(0));
        assert!(lanes.valid().test(1));
        assert!(!lanes.valid().test(2));
        assert_eq!(lanes.seed(5), &a);
    }
}

// ========================================================================================
//                             Filters shipped with the CLI
// ========================================================================================

use seedsift::context::SearchContext;
use seedsift::stream::ResampleStream;
use seedsift::{
    FilterCreationContext, FilterError, LaneBackend, LaneF64, LaneMask, SeedFilter,
    SeedFilterDesc, SingleSearchContext, WideSearchContext,
};
use std::simd::cmp::SimdPartialOrd;

// --- Threshold ---

/// Seeds whose first draw from `key` is below `below`.
pub struct ThresholdDesc {
    pub key: String,
    pub below: f64,
}

pub struct ThresholdFilter {
    key: String,
    below: LaneF64,
}

impl SeedFilterDesc for ThresholdDesc {
    type Filter = ThresholdFilter;

    fn create(&self, ctx: &mut FilterCreationContext) -> Result<ThresholdFilter, FilterError> {
        if !(self.below > 0.0 && self.below <= 1.0) {
            return Err(FilterError::Invalid(format!(
                "threshold {} is outside (0, 1]",
                self.below
            )));
        }
        ctx.cache_pseudo_hash(&self.key)?;
        Ok(ThresholdFilter {
            key: self.key.clone(),
            below: LaneF64::splat(self.below),
        })
    }
}

impl SeedFilter for ThresholdFilter {
    fn filter<B: LaneBackend>(&self, ctx: &mut WideSearchContext<'_, B>) -> LaneMask {
        let mut stream = ctx.create_prng_stream(&self.key);
        ctx.next_random(&mut stream).simd_lt(self.below)
    }
}

// --- Picks ---

/// Seeds that, drawing `draws` distinct values from `1..=choices` on `key` and redrawing
/// from resample streams on a repeat, pick every value in `wanted`.
pub struct PicksDesc {
    pub key: String,
    pub choices: i32,
    pub draws: usize,
    pub wanted: Vec<i32>,
}

pub struct PicksFilter {
    key: String,
    choices: i32,
    draws: usize,
    wanted: Vec<i32>,
}

impl SeedFilterDesc for PicksDesc {
    type Filter = PicksFilter;

    fn create(&self, ctx: &mut FilterCreationContext) -> Result<PicksFilter, FilterError> {
        if self.choices < 1 || self.draws == 0 || self.draws > self.choices as usize {
            return Err(FilterError::Invalid(format!(
                "cannot draw {} distinct values from 1..={}",
                self.draws, self.choices
            )));
        }
        let mut wanted = self.wanted.clone();
        wanted.sort_unstable();
        wanted.dedup();
        if wanted.is_empty() || wanted.len() > self.draws {
            return Err(FilterError::Invalid(format!(
                "{} wanted values cannot appear among {} draws",
                wanted.len(),
                self.draws
            )));
        }
        if let Some(value) = wanted.iter().find(|&&v| !(1..=self.choices).contains(&v)) {
            return Err(FilterError::Invalid(format!(
                "wanted value {value} is outside 1..={}",
                self.choices
            )));
        }
        ctx.cache_resample_stream(&self.key)?;
        Ok(PicksFilter {
            key: self.key.clone(),
            choices: self.choices,
            draws: self.draws,
            wanted,
        })
    }
}

impl PicksFilter {
    /// Draws the picks of one seed, resampling on repeats.
    fn picks(&self, ctx: &mut SingleSearchContext<'_>) -> Vec<i32> {
        let mut stream: ResampleStream<'_> = ctx.create_resample_stream(&self.key);
        let mut picked = Vec::with_capacity(self.draws);
        while picked.len() < self.draws {
            let mut value = ctx.next_random_int(stream.initial(), 1, self.choices);
            let mut attempt = 0;
            while picked.contains(&value) {
                let sub = ctx.resample_stream(&mut stream, attempt);
                value = ctx.next_random_int(sub, 1, self.choices);
                attempt += 1;
            }
            picked.push(value);
        }
        picked
    }
}

impl SeedFilter for PicksFilter {
    fn filter<B: LaneBackend>(&self, ctx: &mut WideSearchContext<'_, B>) -> LaneMask {
        // Only when every pick must be wanted does the first pick, which is never
        // resampled, rule a seed out.
        let candidates = if self.wanted.len() == self.draws {
            let mut stream = ctx.create_prng_stream(&self.key);
            let first = ctx.next_random_int(&mut stream, 1, self.choices);
            let mut candidates = LaneMask::splat(false);
            for (lane, value) in first.iter().enumerate() {
                candidates.set(lane, self.wanted.contains(value));
            }
            candidates
        } else {
            ctx.valid_lanes()
        };

        ctx.search_individual_seeds(candidates, |single| {
            let picked = self.picks(single);
            self.wanted.iter().all(|value| picked.contains(value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bumpalo::Bump;
    use seedsift::cache::{DynamicHashTable, PartialHashCache};
    use seedsift::seed::{SEED_ALPHABET, SeedLanes};
    use seedsift::{LANE_COUNT, PortableLanes, Seed, hash, prng};

    #[test]
    fn thresholds_must_be_probabilities() {
        let mut ctx = FilterCreationContext::new();
        let desc = ThresholdDesc {
            key: "boss".into(),
            below: 1.5,
        };
        assert!(matches!(desc.create(&mut ctx), Err(FilterError::Invalid(_))));
    }

    #[test]
    fn picks_reject_impossible_requests() {
        let mut ctx = FilterCreationContext::new();
        let desc = PicksDesc {
            key: "Voucher1".into(),
            choices: 4,
            draws: 5,
            wanted: vec![1],
        };
        assert!(desc.create(&mut ctx).is_err());

        let desc = PicksDesc {
            key: "Voucher1".into(),
            choices: 4,
            draws: 2,
            wanted: vec![9],
        };
        assert!(desc.create(&mut ctx).is_err());
    }

    /// Runs `filter` and a direct evaluation of `picks` over the same frames of seeds and
    /// returns the seeds each of them accepted.
    fn accepted_both_ways(desc: &PicksDesc, seeds: &[Seed]) -> (Vec<Seed>, Vec<Seed>) {
        let mut creation = FilterCreationContext::new();
        let filter = desc.create(&mut creation).unwrap();
        let layout = creation.into_layout().unwrap();
        let mut dynamic = DynamicHashTable::default();
        let bump = Bump::new();

        let (mut filtered, mut direct) = (Vec::new(), Vec::new());
        for chunk in seeds.chunks(LANE_COUNT) {
            let lanes = SeedLanes::new(chunk).unwrap();
            let initial: Vec<LaneF64> = layout
                .lengths()
                .iter()
                .map(|&length| lanes.partial_hash::<PortableLanes>(length))
                .collect();
            dynamic.reset();
            let cache = PartialHashCache::new(&layout, &lanes, &initial, &mut dynamic);
            let mut ctx = WideSearchContext::<PortableLanes>::new(cache, &bump);

            let by_filter = filter.filter(&mut ctx) & ctx.valid_lanes();
            let valid = ctx.valid_lanes();
            let by_picks = ctx.search_individual_seeds(valid, |single| {
                let picked = filter.picks(single);
                desc.wanted.iter().all(|value| picked.contains(value))
            });
            for lane in 0..chunk.len() {
                if by_filter.test(lane) {
                    filtered.push(chunk[lane]);
                }
                if by_picks.test(lane) {
                    direct.push(chunk[lane]);
                }
            }
        }
        (filtered, direct)
    }

    fn four_character_seeds() -> Vec<Seed> {
        (0..96usize)
            .map(|i| {
                let text: Vec<u8> = (0..4)
                    .map(|k| SEED_ALPHABET[(i * (2 * k + 3) + k * k + i / 35) % SEED_ALPHABET.len()])
                    .collect();
                Seed::from_bytes(&text).unwrap()
            })
            .collect()
    }

    #[test]
    fn picks_filter_accepts_exactly_the_seeds_whose_picks_match() {
        let seeds = four_character_seeds();
        let partial = PicksDesc {
            key: "Voucher1".into(),
            choices: 10,
            draws: 3,
            wanted: vec![7],
        };
        let (filtered, direct) = accepted_both_ways(&partial, &seeds);
        assert!(!direct.is_empty());
        assert_eq!(filtered, direct);

        // A wanted value drawn second or third still counts.
        let later_pick = direct
            .iter()
            .any(|seed| first_pick(seed, "Voucher1", 10) != 7);
        assert!(later_pick, "every match drew the wanted value first");

        let repeated: Vec<Seed> = "ABCDEFGHIJKLM"
            .chars()
            .map(|c| Seed::new(&c.to_string().repeat(4)).unwrap())
            .collect();
        let (filtered, direct) = accepted_both_ways(&partial, &repeated);
        let names: Vec<String> = filtered.iter().map(|seed| seed.to_string()).collect();
        assert_eq!(names, ["BBBB", "DDDD", "FFFF", "IIII", "MMMM"]);
        assert_eq!(filtered, direct);

        let complete = PicksDesc {
            key: "Voucher1".into(),
            choices: 4,
            draws: 2,
            wanted: vec![3, 1, 3],
        };
        let (filtered, direct) = accepted_both_ways(&complete, &seeds);
        assert!(!direct.is_empty());
        assert_eq!(filtered, direct);
    }

    /// The first integer a fresh stream on `key` draws, computed without any cache.
    fn first_pick(seed: &Seed, key: &str, choices: i32) -> i32 {
        let state = prng::iterate(hash::pseudo_hash(key.as_bytes(), seed.as_bytes()));
        let value = prng::lua_random(prng::pseudo_seed(state, seed.partial_hash(0)));
        prng::random_int(value, 1, choices)
    }
}

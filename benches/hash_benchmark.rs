// ========================================================================================
//
//                       SEEDSIFT PSEUDO-HASH THROUGHPUT BENCHMARK
//
// ========================================================================================
//
// Measures the cost of one pseudo-hash and one random draw per seed, scalar against
// eight-wide, and the cost of a whole sequential batch with a trivial filter. The batch
// numbers are the ones that decide how many fast digits to enumerate per batch.
//
// ========================================================================================

#![feature(portable_simd)]

use bumpalo::Bump;
use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use seedsift::batch::WorkerScratch;
use seedsift::cache::{CacheLayout, DynamicHashTable, PartialHashCache};
use seedsift::seed::{SEED_ALPHABET, SeedLanes};
use seedsift::{
    BatchPlan, FilterCreationContext, LANE_COUNT, LaneBackend, LaneF64, LaneMask, PortableLanes,
    SearchContext, Seed, SeedFilter, SequentialPlan, SimdLanes, WideSearchContext, hash, prng,
};
use std::simd::cmp::SimdPartialOrd;

// --- Benchmark Tuning Parameters ---

/// Seeds hashed per iteration of the scalar and wide benchmarks.
const SEEDS_PER_ITERATION: usize = 4096;
/// Keys of the lengths filters typically use.
const KEYS: [&str; 3] = ["boss", "Voucher1", "shop_pack1"];

fn random_seeds(count: usize) -> Vec<Seed> {
    let mut rng = StdRng::seed_from_u64(0xbe9c);
    (0..count)
        .map(|_| {
            let text: Vec<u8> = (0..8)
                .map(|_| SEED_ALPHABET[rng.gen_range(0..SEED_ALPHABET.len())])
                .collect();
            Seed::from_bytes(&text).unwrap()
        })
        .collect()
}

struct FirstDrawBelow;

impl SeedFilter for FirstDrawBelow {
    fn filter<B: LaneBackend>(&self, ctx: &mut WideSearchContext<'_, B>) -> LaneMask {
        let mut stream = ctx.create_prng_stream("boss");
        ctx.next_random(&mut stream).simd_lt(LaneF64::splat(0.001))
    }
}

fn bench_scalar(c: &mut Criterion) {
    let seeds = random_seeds(SEEDS_PER_ITERATION);
    let mut group = c.benchmark_group("scalar");
    group.throughput(Throughput::Elements(SEEDS_PER_ITERATION as u64));
    for key in KEYS {
        group.bench_with_input(BenchmarkId::new("hash_and_draw", key), key, |b, key| {
            b.iter(|| {
                let mut sum = 0.0;
                for seed in &seeds {
                    let state = hash::pseudo_hash(key.as_bytes(), seed.as_bytes());
                    sum += prng::iterate(state);
                }
                black_box(sum)
            })
        });
    }
    group.finish();
}

fn bench_wide<B: LaneBackend>(c: &mut Criterion, name: &str) {
    let seeds = random_seeds(SEEDS_PER_ITERATION);
    let lanes: Vec<SeedLanes> = seeds
        .chunks(LANE_COUNT)
        .filter_map(SeedLanes::new)
        .collect();

    let mut creation = FilterCreationContext::new();
    creation.cache_pseudo_hash("boss").unwrap();
    let layout = creation.into_layout().unwrap();
    let initial: Vec<Vec<LaneF64>> = lanes
        .iter()
        .map(|lanes| {
            layout
                .lengths()
                .iter()
                .map(|&length| lanes.partial_hash::<B>(length))
                .collect()
        })
        .collect();

    let mut group = c.benchmark_group(name);
    group.throughput(Throughput::Elements(SEEDS_PER_ITERATION as u64));
    for key in KEYS {
        for cached in [false, true] {
            let id = BenchmarkId::new(if cached { "cached" } else { "uncached" }, key);
            group.bench_function(id, |b| {
                let mut bump = Bump::new();
                let mut dynamic = DynamicHashTable::default();
                b.iter(|| {
                    let mut sum = LaneF64::splat(0.0);
                    for (seeds, initial) in lanes.iter().zip(&initial) {
                        dynamic.reset();
                        let cache = PartialHashCache::new(&layout, seeds, initial, &mut dynamic);
                        let mut ctx = WideSearchContext::<B>::new(cache, &bump);
                        let state = ctx.pseudo_hash(key, cached);
                        sum += B::iterate(state);
                    }
                    bump.reset();
                    black_box(sum)
                })
            });
        }
    }
    group.finish();
}

fn bench_batches(c: &mut Criterion) {
    let mut creation = FilterCreationContext::new();
    creation.cache_pseudo_hash("boss").unwrap();
    let layout = creation.into_layout().unwrap();

    let mut group = c.benchmark_group("sequential_batch");
    group.sample_size(20);
    for fast_digits in [2, 3] {
        let plan = BatchPlan::Sequential(SequentialPlan::new(8, fast_digits));
        group.throughput(Throughput::Elements(plan.seeds_per_batch()));
        group.bench_with_input(
            BenchmarkId::from_parameter(fast_digits),
            &plan,
            |b, plan| {
                let mut scratch = WorkerScratch::new(&layout);
                let mut index = 0u64;
                b.iter(|| {
                    let mut found = 0u64;
                    scratch
                        .run_batch::<_, SimdLanes, _>(plan, &layout, &FirstDrawBelow, index, &mut |_: &Seed| {
                            found += 1
                        })
                        .unwrap();
                    index = (index + 1) % plan.max_batch();
                    black_box(found)
                })
            },
        );
    }
    group.finish();
}

fn bench_all(c: &mut Criterion) {
    bench_scalar(c);
    bench_wide::<SimdLanes>(c, "simd");
    bench_wide::<PortableLanes>(c, "portable");
    bench_batches(c);
}

criterion_group!(benches, bench_all);
criterion_main!(benches);

// The `unused_crate_dependencies` lint checks every crate in a package separately.
// See <https://github.com/rust-lang/rust/issues/57274>.
#![allow(unused_crate_dependencies)]

use criterion::{measurement::WallTime, BatchSize, BenchmarkGroup, Criterion, Throughput};
use rand::{rngs::StdRng, Rng as _, SeedableRng as _};
use slasher::{
    AttestationData, Epoch, Focus, FuzzyDetector, SlasherConfig, ValidatorIndexSet, H256,
};

const ATTESTATION_COUNT: usize = 1024;
const VALIDATORS_PER_ATTESTATION: usize = 16;

// Criterion macros only add confusion.
fn main() {
    let mut criterion = Criterion::default().configure_from_args();

    let mut group = criterion.benchmark_group("slasher");

    group.throughput(Throughput::Elements(
        ATTESTATION_COUNT
            .try_into()
            .expect("number of attestations should fit in u64"),
    ));

    benchmark_gates(&mut group);
    benchmark_grouped_detection(&mut group);

    group.finish();

    criterion.final_summary();
}

fn benchmark_gates(group: &mut BenchmarkGroup<'_, WallTime>) {
    let config = SlasherConfig::default();
    let attestations = random_attestations(config.max_target, 1024);
    let focus = Focus::new([0]);

    group.bench_function("distance bands", |bencher| {
        bencher.iter_batched_ref(
            || {
                config
                    .build_distance_bands()
                    .expect("default configuration should be valid")
            },
            |bands| check_all(bands, &attestations, &focus),
            BatchSize::LargeInput,
        );
    });

    group.bench_function("geo lookup", |bencher| {
        bencher.iter_batched_ref(
            || {
                config
                    .build_geo_lookup(0)
                    .expect("default configuration should be valid")
            },
            |lookup| check_all(lookup, &attestations, &focus),
            BatchSize::LargeInput,
        );
    });
}

fn benchmark_grouped_detection(group: &mut BenchmarkGroup<'_, WallTime>) {
    let config = SlasherConfig {
        validator_count: 1024,
        group_size: 128,
        distance_gradient: vec![4, 12, 48, 192, 768, 3073],
        max_target: 4096,
        ..SlasherConfig::default()
    };

    let mut rng = StdRng::seed_from_u64(0);
    let attestations = random_attestations(config.max_target, 64);

    let submissions = (0..ATTESTATION_COUNT)
        .map(|index| {
            let validators = (0..VALIDATORS_PER_ATTESTATION)
                .map(|_| rng.gen_range(0..config.validator_count))
                .collect::<ValidatorIndexSet>();

            (attestations[index], Focus::new(validators))
        })
        .collect::<Vec<_>>();

    group.bench_function("grouped detection", |bencher| {
        bencher.iter_batched_ref(
            || {
                config
                    .build_default_detection()
                    .expect("benchmark configuration should be valid")
            },
            |detection| {
                for (attestation, focus) in &submissions {
                    detection
                        .check_and_add(attestation, focus)
                        .expect("attestation should be within capacity");
                }
            },
            BatchSize::LargeInput,
        );
    });
}

fn check_all(gate: &mut impl FuzzyDetector, attestations: &[AttestationData], focus: &Focus) {
    for attestation in attestations {
        gate.fuzzy_check_and_add(attestation, focus)
            .expect("attestation should be within capacity");
    }
}

// Most attestations are close together, like on a healthy chain.
fn random_attestations(max_target: Epoch, max_distance: u64) -> Vec<AttestationData> {
    let mut rng = StdRng::seed_from_u64(1);

    (0..ATTESTATION_COUNT)
        .map(|_| {
            let distance = rng.gen_range(1..=max_distance);
            let source = rng.gen_range(0..max_target - distance);
            let root = H256::from_low_u64_be(rng.gen());

            AttestationData::new(source, source + distance, root)
        })
        .collect()
}

use lowrank_core::{
    ChannelMatrix, DecomposeOptions, FactorStore, PowerIterationDecomposer, Preset,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn random_matrix(rows: usize, cols: usize, seed: u64) -> ChannelMatrix {
    let mut rng = StdRng::seed_from_u64(seed);
    ChannelMatrix::from_fn(rows, cols, |_, _| rng.gen_range(0.0..255.0))
}

fn store_for(matrix: &ChannelMatrix, rank: usize, options: &DecomposeOptions) -> FactorStore {
    let triplets = PowerIterationDecomposer::from_seed(11)
        .decompose(matrix.clone(), rank, options)
        .expect("decomposition succeeds");
    let mut store = FactorStore::default();
    store.initialize(&triplets);
    store
}

#[test]
fn diagonal_matrix_is_recovered_at_full_rank() {
    let original = ChannelMatrix::diagonal(&[4.0, 3.0, 2.0, 1.0]);
    let options = DecomposeOptions::default();
    let mut store = store_for(&original, 4, &options);

    let full = store.reconstruct_from_scratch(4).clone();
    assert!(full.max_abs_diff(&original) < 1e-4);

    let one = store.reconstruct_from_scratch(1).frobenius_distance(&original);
    let two = store.reconstruct_from_scratch(2).frobenius_distance(&original);
    assert!(two < one, "rank 2 error {two} should beat rank 1 error {one}");
}

#[test]
fn diagonal_singular_values_are_ordered() {
    let original = ChannelMatrix::diagonal(&[9.0, 6.0, 3.0, 1.0]);
    let triplets = PowerIterationDecomposer::from_seed(5)
        .decompose(original, 4, &Preset::Precise.options())
        .unwrap();

    assert!(triplets.is_ordered_within(1e-3));
    let sigmas = triplets.singular_values();
    assert!((sigmas[0] - 9.0).abs() < 1e-2);
    assert!(sigmas.iter().all(|&s| s >= 0.0));
}

#[test]
fn incremental_updates_match_scratch_reconstruction() {
    let matrix = random_matrix(100, 80, 2024);
    let options = Preset::Fast.options();
    let mut incremental = store_for(&matrix, 20, &options);
    let mut scratch = incremental.clone();

    incremental.update_rank(20);
    incremental.update_rank(5);
    let down = incremental.buffer().clone();
    let expected_down = scratch.reconstruct_from_scratch(5).clone();
    assert!(down.max_abs_diff(&expected_down) < 1e-8);

    incremental.update_rank(20);
    let up = incremental.buffer().clone();
    let expected_up = scratch.reconstruct_from_scratch(20).clone();
    assert!(up.max_abs_diff(&expected_up) < 1e-8);
    assert_eq!(incremental.current_rank(), 20);
}

#[test]
fn requested_rank_is_clamped() {
    let matrix = random_matrix(12, 9, 7);
    let mut store = store_for(&matrix, 6, &Preset::Fast.options());

    assert_eq!(store.rank(), 6);
    assert_eq!(store.clamp_rank(0), 1);
    assert_eq!(store.clamp_rank(100), 6);

    let at_max = store.reconstruct_from_scratch(6).clone();
    let beyond = store.reconstruct_from_scratch(100).clone();
    assert_eq!(at_max, beyond);
}

#[test]
fn repeated_rank_is_idempotent() {
    let matrix = random_matrix(30, 20, 99);
    let mut store = store_for(&matrix, 10, &Preset::Balanced.options());

    let first = store.update_rank(7).clone();
    let second = store.update_rank(7).clone();
    assert_eq!(first, second);

    let frame = store.to_display_frame();
    assert_eq!((frame.width, frame.height), (20, 30));
}

#[test]
fn singular_values_are_non_negative() {
    let mut rng = StdRng::seed_from_u64(3);
    let matrix = ChannelMatrix::from_fn(25, 40, |_, _| rng.gen_range(-1.0..1.0));
    let triplets = PowerIterationDecomposer::from_seed(8)
        .decompose(matrix, 25, &Preset::Fast.options())
        .unwrap();

    assert_eq!(triplets.len(), 25);
    assert!(triplets.singular_values().iter().all(|&s| s >= 0.0));
}

#[test]
fn same_seed_same_factors() {
    let matrix = random_matrix(16, 16, 1);
    let options = Preset::Fast.options();
    let a = PowerIterationDecomposer::from_seed(77)
        .decompose(matrix.clone(), 4, &options)
        .unwrap();
    let b = PowerIterationDecomposer::from_seed(77)
        .decompose(matrix, 4, &options)
        .unwrap();
    assert_eq!(a, b);
}

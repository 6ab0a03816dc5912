//! # Two-Phase Sizing Tests
//!
//! Measured peaks, exact fixed-arena replay, capacity exhaustion and replay
//! divergence.
//!
//! Run with: cargo test --test two_phase_test -- --nocapture

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use tally_core::{
    run, run_with, Arena, ArenaError, ArenaResult, CapacityPlan, Handle, Link, Payload,
    SizingConfig, TypeSet, UsageProfile,
};

// ============================================================================
// FIXTURES
// ============================================================================

struct Tree {
    value: i64,
    left: Link<Tree>,
    right: Link<Tree>,
}

impl Tree {
    fn leaf(value: i64) -> Self {
        Self {
            value,
            left: Link::Null,
            right: Link::Null,
        }
    }
}

impl Payload for Tree {
    fn release_links(&mut self) {
        self.left.clear();
        self.right.clear();
    }
}

fn tree_types() -> TypeSet {
    TypeSet::builder()
        .register_named::<Tree>("tree")
        .build()
        .unwrap()
}

/// Root plus two leaves; leaves are allocated first.
fn build_tree(arena: &Arena) -> ArenaResult<Handle<Tree>> {
    let mut left = arena.try_alloc(Tree::leaf(1))?;
    let right = match arena.try_alloc(Tree::leaf(2)) {
        Ok(right) => right,
        Err(err) => {
            left.clear();
            return Err(err);
        }
    };
    arena.try_alloc(Tree {
        value: 0,
        left: left.into(),
        right: right.into(),
    })
}

fn sum(tree: &Link<Tree>) -> i64 {
    match tree.get() {
        Some(node) => node.value + sum(&node.left) + sum(&node.right),
        None => 0,
    }
}

// ============================================================================
// SCENARIO: INT + DOUBLE
// ============================================================================

#[test]
fn int_and_double_peaks_are_sequential() {
    let types = TypeSet::builder()
        .register_named::<i32>("int")
        .register_named::<f64>("double")
        .build()
        .unwrap();

    let execution = run(&types, |arena| {
        let mut a = arena.alloc(2i32);
        let mut b = arena.alloc(3.5f64);
        let total = f64::from(*a.get()) + *b.get();
        a.clear();
        b.clear();
        arena.alloc(total)
    })
    .unwrap();

    assert_eq!(execution.profile.peak("int"), 1);
    assert_eq!(execution.profile.peak("double"), 1);
    assert_eq!(execution.plan.capacity("int"), Some(1));
    assert!((*execution.result.get() - 5.5).abs() < f64::EPSILON);
    assert_eq!(execution.arena.live_objects::<f64>(), 1);

    execution.release();
}

// ============================================================================
// SCENARIO: THREE-NODE TREE
// ============================================================================

#[test]
fn tree_peak_is_three_and_fixed_replay_succeeds() {
    let types = tree_types();

    let execution = run(&types, |arena| build_tree(arena).unwrap()).unwrap();

    assert_eq!(execution.profile.peak("tree"), 3);
    assert_eq!(execution.arena.capacity::<Tree>(), Some(3));
    assert_eq!(execution.arena.live_objects::<Tree>(), 3);
    assert_eq!(execution.result.get().value, 0);
    assert!(execution.result.get().left.get().is_some());

    execution.release();
}

#[test]
fn tree_in_two_slots_exhausts_capacity() {
    let types = tree_types();
    let arena = Arena::fixed(&types, &CapacityPlan::uniform(types.names(), 2)).unwrap();

    let err = build_tree(&arena).unwrap_err();
    assert_eq!(
        err,
        ArenaError::CapacityExhausted {
            type_name: std::any::type_name::<Tree>(),
            capacity: 2,
        }
    );
    // The rejected root released both leaves.
    assert_eq!(arena.live_objects::<Tree>(), 0);
}

#[test]
fn tree_values_survive_the_fixed_pass() {
    let types = tree_types();
    let mut execution = run(&types, |arena| {
        let root = build_tree(arena).unwrap();
        Link::Live(root)
    })
    .unwrap();

    assert_eq!(sum(&execution.result), 3);
    if let Link::Live(root) = &mut execution.result {
        root.get_mut().value = 10;
    }
    assert_eq!(sum(&execution.result), 13);
    execution.release();
}

// ============================================================================
// SIZING CONFIGURATION
// ============================================================================

#[test]
fn headroom_and_minimum_from_toml() {
    let types = tree_types();
    let config = SizingConfig::from_toml_str("headroom = 2\nmin_capacity = 8").unwrap();

    let execution = run_with(&types, &config, |arena| {
        let mut root = build_tree(arena).unwrap();
        root.clear();
    })
    .unwrap();

    assert_eq!(execution.profile.peak("tree"), 3);
    assert_eq!(execution.plan.capacity("tree"), Some(8));
    assert_eq!(execution.arena.capacity::<Tree>(), Some(8));
}

#[test]
fn persisted_plan_rebuilds_the_same_arena() {
    let types = tree_types();
    let execution = run(&types, |arena| {
        let mut root = build_tree(arena).unwrap();
        root.clear();
    })
    .unwrap();

    let profile_text = execution.profile.to_toml().unwrap();
    let plan_text = execution.plan.to_toml().unwrap();
    assert_eq!(UsageProfile::from_toml_str(&profile_text).unwrap(), execution.profile);

    let plan = CapacityPlan::from_toml_str(&plan_text).unwrap();
    let arena = Arena::fixed(&types, &plan).unwrap();
    let mut root = build_tree(&arena).unwrap();
    assert_eq!(arena.live_objects::<Tree>(), 3);
    root.clear();
    assert_eq!(arena.profile(), execution.arena.profile());
}

// ============================================================================
// NON-DETERMINISTIC WORKLOADS
// ============================================================================

#[test]
fn fewer_allocations_on_replay_diverge() {
    let types = TypeSet::builder().register_named::<u8>("byte").build().unwrap();
    let mut pass = 0;

    let result = run(&types, |arena| {
        pass += 1;
        if pass == 1 {
            let mut byte = arena.alloc(1u8);
            byte.clear();
        }
    });

    assert_eq!(
        result.unwrap_err(),
        ArenaError::ReplayDiverged {
            type_name: "byte".into(),
            measured: 1,
            replayed: 0,
        }
    );
}

#[test]
fn more_allocations_on_replay_exhaust() {
    let types = TypeSet::builder().register_named::<u8>("byte").build().unwrap();
    let mut pass = 0u8;

    let execution = run(&types, |arena| {
        pass += 1;
        let mut held = Vec::new();
        let mut exhausted = false;
        for value in 0..pass {
            match arena.try_alloc(value) {
                Ok(handle) => held.push(handle),
                Err(ArenaError::CapacityExhausted { .. }) => exhausted = true,
                Err(err) => panic!("{err}"),
            }
        }
        for handle in &mut held {
            handle.clear();
        }
        exhausted
    })
    .unwrap();

    assert!(execution.result);
    assert_eq!(execution.arena.profile().peak("byte"), 1);
}

// ============================================================================
// SEEDED RANDOM WORKLOADS
// ============================================================================

/// Random interleaving of allocations and releases over two types. Returns
/// the surviving handles and records the highest live counts it saw.
fn churn(
    arena: &Arena,
    seed: u64,
    steps: usize,
    maxima: &mut Vec<(usize, usize)>,
) -> (Vec<Handle<u64>>, Vec<Handle<String>>) {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut words: Vec<Handle<u64>> = Vec::new();
    let mut texts: Vec<Handle<String>> = Vec::new();
    let (mut max_words, mut max_texts) = (0, 0);

    for _ in 0..steps {
        match rng.gen_range(0..4) {
            0 => words.push(arena.alloc(rng.gen::<u64>())),
            1 => texts.push(arena.alloc(format!("t{}", rng.gen_range(0..1000)))),
            2 if !words.is_empty() => {
                let index = rng.gen_range(0..words.len());
                words.swap_remove(index).clear();
            }
            3 if !texts.is_empty() => {
                let index = rng.gen_range(0..texts.len());
                texts.swap_remove(index).clear();
            }
            _ => {}
        }
        max_words = max_words.max(words.len());
        max_texts = max_texts.max(texts.len());
    }

    maxima.push((max_words, max_texts));
    (words, texts)
}

#[test]
fn random_workload_replays_exactly() {
    let types = TypeSet::builder()
        .register_named::<u64>("word")
        .register_named::<String>("text")
        .build()
        .unwrap();

    for seed in [1, 7, 42, 1234] {
        let mut maxima = Vec::new();
        let execution = run(&types, |arena| churn(arena, seed, 400, &mut maxima)).unwrap();

        assert_eq!(maxima.len(), 2);
        assert_eq!(maxima[0], maxima[1]);
        let (max_words, max_texts) = maxima[0];
        assert_eq!(execution.profile.peak("word"), max_words);
        assert_eq!(execution.profile.peak("text"), max_texts);
        assert_eq!(execution.arena.capacity::<u64>(), Some(max_words));

        let replayed = execution.arena.profile();
        assert_eq!(replayed.peak("word"), max_words);
        assert_eq!(replayed.peak("text"), max_texts);
        assert_eq!(
            execution.arena.live_objects::<u64>(),
            execution.result.0.len()
        );

        execution.release();
    }
}

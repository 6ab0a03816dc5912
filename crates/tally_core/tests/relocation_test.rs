//! # Relocation Tests
//!
//! Deactivation into mementos, activation against the same or a second
//! arena, polymorphic resolution and memento storage overflow.
//!
//! Run with: cargo test --test relocation_test -- --nocapture

use serde::{Deserialize, Serialize};

use tally_core::{
    run, Activator, Arena, ArenaError, ArenaResult, CapacityPlan, Deactivator, Handle, Link,
    Memento, Mode, Payload, TypeSet,
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

    fn deactivate_links(&mut self, deactivator: &mut Deactivator<'_>) -> ArenaResult<()> {
        deactivator.deactivate_link(&mut self.left)?;
        deactivator.deactivate_link(&mut self.right)
    }
}

fn tree_types() -> TypeSet {
    TypeSet::builder()
        .register_named::<Tree>("tree")
        .build()
        .unwrap()
}

fn build_tree(arena: &Arena) -> Handle<Tree> {
    let left = arena.alloc(Tree::leaf(1));
    let right = arena.alloc(Tree::leaf(2));
    arena.alloc(Tree {
        value: 0,
        left: left.into(),
        right: right.into(),
    })
}

trait Shape {
    fn area(&self) -> f64;
}

struct Circle {
    radius: f64,
}

struct Square {
    side: f64,
}

impl Payload for Circle {}
impl Payload for Square {}

impl Shape for Circle {
    fn area(&self) -> f64 {
        std::f64::consts::PI * self.radius * self.radius
    }
}

impl Shape for Square {
    fn area(&self) -> f64 {
        self.side * self.side
    }
}

tally_core::subtype!(Shape => Circle, Square);

trait Labelled {
    fn label(&self) -> u32;
}

struct Tag(u32);

impl Payload for Tag {}

impl Labelled for Tag {
    fn label(&self) -> u32 {
        self.0
    }
}

tally_core::subtype!(Labelled => Tag);

struct Pair {
    first: Link<dyn Labelled>,
    second: Link<dyn Labelled>,
}

impl Payload for Pair {
    fn release_links(&mut self) {
        self.first.clear();
        self.second.clear();
    }

    fn deactivate_links(&mut self, deactivator: &mut Deactivator<'_>) -> ArenaResult<()> {
        deactivator.deactivate_link(&mut self.first)?;
        deactivator.deactivate_link(&mut self.second)
    }
}

struct Node {
    next: Link<Node>,
}

impl Payload for Node {
    fn release_links(&mut self) {
        self.next.clear();
    }

    fn deactivate_links(&mut self, deactivator: &mut Deactivator<'_>) -> ArenaResult<()> {
        deactivator.deactivate_link(&mut self.next)
    }
}

const CHAIN_LENGTH: usize = 200_000;

fn chain_arena() -> Arena {
    let types = TypeSet::builder().register_named::<Node>("node").build().unwrap();
    Arena::fixed(&types, &CapacityPlan::uniform(types.names(), CHAIN_LENGTH)).unwrap()
}

fn chain(arena: &Arena) -> Link<Node> {
    let mut head = Link::Null;
    for _ in 0..CHAIN_LENGTH {
        head = Link::Live(arena.alloc(Node { next: head }));
    }
    head
}

fn shape_types() -> TypeSet {
    TypeSet::builder()
        .register_named::<Circle>("circle")
        .register_named::<Square>("square")
        .register_named::<u8>("byte")
        .register_as::<Circle, dyn Shape>()
        .register_as::<Square, dyn Shape>()
        .build()
        .unwrap()
}

// ============================================================================
// ROUND TRIP
// ============================================================================

#[test]
fn frozen_tree_round_trips() {
    let types = tree_types();
    let execution = run(&types, build_tree).unwrap();

    let mut frozen = execution.freeze().unwrap();
    assert!(!frozen.ledger.overflow());
    assert_eq!(frozen.ledger.len(), 3);
    assert_eq!(frozen.arena.records_used::<Tree>(), 3);
    assert_eq!(frozen.arena.live_objects::<Tree>(), 0);

    let root = frozen.view().unwrap();
    assert!(!root.is_writable());
    let (left, right) = {
        let node = root.get().unwrap();
        assert_eq!(node.value, 0);
        (node.left.memento().unwrap(), node.right.memento().unwrap())
    };
    assert_eq!(frozen.arena.activate_ref(&left).unwrap().get().unwrap().value, 1);
    assert_eq!(frozen.arena.activate_ref(&right).unwrap().get().unwrap().value, 2);

    let thawed = frozen.thaw().unwrap();
    assert_eq!(thawed, root);
    thawed.get_mut().unwrap().unwrap().value = 42;
    assert_eq!(frozen.view().unwrap().get().unwrap().value, 42);
    assert_eq!(frozen.thaw().unwrap(), thawed);
}

#[test]
fn memento_survives_serialization() {
    #[derive(Serialize, Deserialize)]
    struct Envelope {
        root: Memento<Tree>,
    }

    let types = tree_types();
    let frozen = run(&types, build_tree).unwrap().freeze().unwrap();

    let text = toml::to_string(&Envelope { root: frozen.value }).unwrap();
    let envelope: Envelope = toml::from_str(&text).unwrap();
    assert_eq!(envelope.root, frozen.value);
    assert_eq!(
        frozen.arena.activate_ref(&envelope.root).unwrap().get().unwrap().value,
        0
    );
}

// ============================================================================
// IDEMPOTENCE
// ============================================================================

#[test]
fn deactivating_twice_yields_one_record() {
    let types = tree_types();
    let mut arena = Arena::fixed(&types, &CapacityPlan::uniform(types.names(), 4)).unwrap();
    let mut root = arena.alloc(Tree::leaf(5));
    let raw = root.raw().unwrap();

    let mut deactivator = Deactivator::new(&mut arena).unwrap();
    let by_ref = deactivator.deactivate_ref(raw).unwrap();
    let again = deactivator.deactivate_ref(raw).unwrap();
    let by_handle = deactivator.deactivate(&mut root).unwrap();
    let ledger = deactivator.finish();

    assert_eq!(by_ref, again);
    assert_eq!(by_ref, by_handle);
    assert_eq!(by_ref.offset(), 1);
    assert_eq!(ledger.len(), 1);
    assert!(root.is_empty());
    assert_eq!(arena.records_used::<Tree>(), 1);
}

#[test]
fn empty_handle_deactivates_to_null() {
    let types = tree_types();
    let mut arena = Arena::measuring(&types);
    let mut empty: Handle<Tree> = Handle::empty();

    let mut deactivator = Deactivator::new(&mut arena).unwrap();
    let memento = deactivator.deactivate(&mut empty).unwrap();
    drop(deactivator);

    assert!(memento.is_initialized());
    assert!(memento.is_null());
    assert!(arena.activate_ref(&memento).unwrap().is_null());
}

// ============================================================================
// MODES
// ============================================================================

#[test]
fn allocation_is_rejected_between_passes() {
    let types = TypeSet::builder().register::<u32>().build().unwrap();
    let mut arena = Arena::fixed(&types, &CapacityPlan::uniform(types.names(), 2)).unwrap();

    let _ = Deactivator::new(&mut arena).unwrap().finish();
    assert!(matches!(
        arena.try_alloc(1u32),
        Err(ArenaError::ModeViolation {
            operation: "alloc",
            ..
        })
    ));
    assert!(matches!(
        Deactivator::new(&mut arena),
        Err(ArenaError::ModeViolation { .. })
    ));

    Activator::new(&mut arena).unwrap();
    let mut value = arena.alloc(1u32);
    value.clear();
}

#[test]
fn undeactivated_objects_are_reclaimed_by_the_pass() {
    let types = TypeSet::builder().register::<u32>().build().unwrap();
    let mut arena = Arena::fixed(&types, &CapacityPlan::uniform(types.names(), 2)).unwrap();
    let mut kept = arena.alloc(1u32);
    let mut dropped = arena.alloc(2u32);

    let mut deactivator = Deactivator::new(&mut arena).unwrap();
    let memento = deactivator.deactivate(&mut kept).unwrap();
    let _ = deactivator.finish();

    assert_eq!(arena.live_objects::<u32>(), 0);
    // Releases after the pass are ignored.
    dropped.clear();
    assert_eq!(*arena.activate_ref(&memento).unwrap().get().unwrap(), 1);
}

// ============================================================================
// POLYMORPHIC RESOLUTION
// ============================================================================

#[test]
fn shapes_resolve_through_their_concrete_allocator() {
    let types = shape_types();
    let execution = run(&types, |arena| {
        vec![
            arena.alloc(Circle { radius: 1.0 }).upcast::<dyn Shape>(),
            arena.alloc(Square { side: 2.0 }).upcast::<dyn Shape>(),
        ]
    })
    .unwrap();

    let frozen = execution
        .deactivate_with(|shapes, deactivator| {
            shapes
                .iter_mut()
                .map(|shape| deactivator.deactivate(shape))
                .collect::<ArenaResult<Vec<_>>>()
        })
        .unwrap();

    let circle = frozen.arena.activate_ref(&frozen.value[0]).unwrap();
    let square = frozen.arena.activate_ref(&frozen.value[1]).unwrap();
    assert!(circle.concrete_type().unwrap().ends_with("Circle"));
    assert!(square.concrete_type().unwrap().ends_with("Square"));
    assert!((circle.get().unwrap().area() - std::f64::consts::PI).abs() < 1e-12);
    assert!((square.get().unwrap().area() - 4.0).abs() < 1e-12);
}

#[test]
fn concrete_memento_upcasts() {
    let types = shape_types();
    let mut arena = Arena::fixed(&types, &CapacityPlan::uniform(types.names(), 1)).unwrap();
    let mut square = arena.alloc(Square { side: 3.0 });

    let mut deactivator = Deactivator::new(&mut arena).unwrap();
    let memento = deactivator.deactivate(&mut square).unwrap();
    let _ = deactivator.finish();

    let shape: Memento<dyn Shape> = memento.upcast();
    let reloc = arena.activate_ref(&shape).unwrap();
    assert!((reloc.get().unwrap().area() - 9.0).abs() < 1e-12);
}

#[test]
fn foreign_allocator_id_is_a_mismatch() {
    #[derive(Deserialize)]
    struct Envelope {
        shape: Memento<dyn Shape>,
    }

    let types = shape_types();
    let arena = Arena::measuring(&types);
    // Allocator #3 holds bytes, which are not shapes.
    let envelope: Envelope =
        toml::from_str("[shape]\ninitialized = true\nallocator_id = 3\noffset = 1\n").unwrap();

    assert!(matches!(
        arena.activate_ref(&envelope.shape),
        Err(ArenaError::AllocatorIdentityMismatch { .. })
    ));
}

#[test]
fn uninitialized_memento_is_rejected() {
    let types = shape_types();
    let arena = Arena::measuring(&types);
    assert_eq!(
        arena.activate_ref(&Memento::<dyn Shape>::default()).unwrap_err(),
        ArenaError::UninitializedMemento
    );
}

// ============================================================================
// SECOND ARENA INSTANCE
// ============================================================================

#[test]
fn second_arena_carries_the_payload() {
    let types = tree_types();
    let mut frozen = run(&types, build_tree).unwrap().freeze().unwrap();
    let original = frozen.view().unwrap();

    let second = Arena::fixed(&types, &frozen.arena.capacity_plan()).unwrap();
    // Ids resolve before any record is there.
    assert!(second.activate_ref(&frozen.value).unwrap().get().is_none());

    assert_eq!(frozen.move_to(second).unwrap(), 3);
    let moved = frozen.view().unwrap();
    assert_eq!(moved, original);
    let (left, right) = {
        let node = moved.get().unwrap();
        assert_eq!(node.value, 0);
        (node.left.memento().unwrap(), node.right.memento().unwrap())
    };
    assert_eq!(frozen.arena.activate_ref(&left).unwrap().get().unwrap().value, 1);
    assert_eq!(frozen.arena.activate_ref(&right).unwrap().get().unwrap().value, 2);

    let thawed = frozen.thaw().unwrap();
    thawed.get_mut().unwrap().unwrap().value = 7;
    assert_eq!(frozen.view().unwrap().get().unwrap().value, 7);
}

#[test]
fn adopting_records_checks_both_arenas() {
    let types = tree_types();
    let plan = CapacityPlan::uniform(types.names(), 3);
    let target = Arena::fixed(&types, &plan).unwrap();

    let mut active = Arena::fixed(&types, &plan).unwrap();
    assert!(matches!(
        target.adopt_records(&mut active),
        Err(ArenaError::ModeViolation { .. })
    ));

    let mut source = Arena::fixed(&types, &plan).unwrap();
    let mut leaf = source.alloc(Tree::leaf(4));
    let mut deactivator = Deactivator::new(&mut source).unwrap();
    let memento = deactivator.deactivate(&mut leaf).unwrap();
    let _ = deactivator.finish();

    let mut occupant = target.alloc(Tree::leaf(5));
    assert!(matches!(
        target.adopt_records(&mut source),
        Err(ArenaError::InvalidConfig(_))
    ));
    occupant.clear();

    let bytes = TypeSet::builder().register_named::<u8>("byte").build().unwrap();
    let foreign = Arena::fixed(&bytes, &CapacityPlan::uniform(bytes.names(), 3)).unwrap();
    assert!(matches!(
        foreign.adopt_records(&mut source),
        Err(ArenaError::InvalidConfig(_))
    ));

    assert_eq!(target.adopt_records(&mut source).unwrap(), 1);
    assert_eq!(target.mode(), Mode::Memento);
    assert_eq!(target.activate_ref(&memento).unwrap().get().unwrap().value, 4);
    assert!(source.activate_ref(&memento).unwrap().get().is_none());
}

// ============================================================================
// OVERFLOW
// ============================================================================

fn freeze_tree(types: &TypeSet, plan: &CapacityPlan) -> (Arena, Memento<Tree>, bool) {
    let mut arena = Arena::fixed(types, plan).unwrap();
    let mut root = build_tree(&arena);

    let mut deactivator = Deactivator::new(&mut arena).unwrap();
    let memento = deactivator.deactivate(&mut root).unwrap();
    let ledger = deactivator.finish();
    let overflow = ledger.overflow();
    if overflow {
        assert_eq!(ledger.overflowed_types(), vec![std::any::type_name::<Tree>()]);
    }
    (arena, memento, overflow)
}

#[test]
fn overflow_is_flagged_then_fixed_by_growing_records() {
    let types = tree_types();
    let tight = CapacityPlan::uniform(types.names(), 3).with_record_capacity("tree", 1);

    let (arena, root, overflow) = freeze_tree(&types, &tight);
    assert!(overflow);
    {
        let reloc = arena.activate_ref(&root).unwrap();
        let node = reloc.get().unwrap();
        // Children that did not fit became null references.
        assert!(node.left.is_null());
        assert!(node.right.is_null());
        assert!(node.left.memento().unwrap().is_initialized());
    }
    assert_eq!(arena.live_objects::<Tree>(), 0);

    let grown = tight.with_record_capacity("tree", 3);
    let (arena, root, overflow) = freeze_tree(&types, &grown);
    assert!(!overflow);
    let reloc = arena.activate_ref(&root).unwrap();
    let left = reloc.get().unwrap().left.memento().unwrap();
    assert_eq!(arena.activate_ref(&left).unwrap().get().unwrap().value, 1);
}

#[test]
fn measuring_arena_always_overflows() {
    let types = tree_types();
    let mut arena = Arena::measuring(&types);
    let mut leaf = arena.alloc(Tree::leaf(9));

    let mut deactivator = Deactivator::new(&mut arena).unwrap();
    let memento = deactivator.deactivate(&mut leaf).unwrap();
    assert!(deactivator.ledger().overflow());
    drop(deactivator);

    assert!(memento.is_null());
    assert!(memento.is_initialized());
    assert_eq!(memento.allocator_id(), arena.allocator_id::<Tree>().unwrap());
}

#[test]
#[should_panic(expected = "must be cleared before drop")]
fn overflowed_payload_with_unconverted_child_panics() {
    struct Careless {
        child: Link<u8>,
    }

    impl Payload for Careless {
        fn release_links(&mut self) {
            self.child.clear();
        }
    }

    let types = TypeSet::builder()
        .register_named::<Careless>("careless")
        .register_named::<u8>("byte")
        .build()
        .unwrap();
    let mut arena = Arena::measuring(&types);
    let child = arena.alloc(3u8);
    let mut parent = arena.alloc(Careless { child: child.into() });

    let mut deactivator = Deactivator::new(&mut arena).unwrap();
    let _ = deactivator.deactivate(&mut parent);
}

// ============================================================================
// FAILED CHILDREN
// ============================================================================

#[test]
fn failed_child_deactivation_keeps_the_parent_record() {
    // Tags are members, but were never registered as `dyn Labelled`.
    let types = TypeSet::builder()
        .register_named::<Pair>("pair")
        .register_named::<Tag>("tag")
        .build()
        .unwrap();
    let mut arena = Arena::fixed(&types, &CapacityPlan::uniform(types.names(), 2)).unwrap();
    let first = arena.alloc(Tag(1)).upcast::<dyn Labelled>();
    let second = arena.alloc(Tag(2)).upcast::<dyn Labelled>();
    let mut pair = arena.alloc(Pair {
        first: first.into(),
        second: second.into(),
    });
    let raw = pair.raw().unwrap();

    let mut deactivator = Deactivator::new(&mut arena).unwrap();
    assert_eq!(
        deactivator.deactivate(&mut pair).unwrap_err(),
        ArenaError::UnregisteredType(std::any::type_name::<dyn Labelled>())
    );
    // The pair had already moved out of its slot.
    assert!(pair.is_empty());
    let memento = deactivator.deactivate_ref(raw).unwrap();
    let _ = deactivator.finish();

    assert_eq!(memento.offset(), 1);
    assert_eq!(arena.records_used::<Pair>(), 1);
    assert_eq!(arena.live_objects::<Tag>(), 0);
    let reloc = arena.activate_ref(&memento).unwrap();
    let record = reloc.get().unwrap();
    assert!(matches!(record.first, Link::Live(_)));
    assert!(matches!(record.second, Link::Live(_)));
}

// ============================================================================
// LONG CHAINS
// ============================================================================

#[test]
fn long_chain_clears_in_constant_stack() {
    let arena = chain_arena();
    let mut head = chain(&arena);
    assert_eq!(arena.live_objects::<Node>(), CHAIN_LENGTH);

    head.clear();
    assert_eq!(arena.live_objects::<Node>(), 0);
}

#[test]
fn long_chain_deactivates_in_constant_stack() {
    let mut arena = chain_arena();
    let mut head = chain(&arena);

    let mut deactivator = Deactivator::new(&mut arena).unwrap();
    deactivator.deactivate_link(&mut head).unwrap();
    let ledger = deactivator.finish();
    assert_eq!(ledger.len(), CHAIN_LENGTH);
    assert!(!ledger.overflow());

    let mut length = 0;
    let mut next = head.memento().unwrap();
    while !next.is_null() {
        length += 1;
        next = arena
            .activate_ref(&next)
            .unwrap()
            .get()
            .unwrap()
            .next
            .memento()
            .unwrap_or(Memento::null());
    }
    assert_eq!(length, CHAIN_LENGTH);
}

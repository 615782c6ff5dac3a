//! Unit tests for memory_manager components

use core_types::{QualifiedName, Value, ValueId};
use memory_manager::{
    BlockState, Disposal, GcConfig, Generation, Heap, SlotTable, HASH_MIN_PROP,
};

// ============================================================================
// Slot/name consistency
// ============================================================================

/// Small deterministic generator so operation sequences are reproducible.
struct Lcg(u64);

impl Lcg {
    fn next(&mut self, bound: usize) -> usize {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        ((self.0 >> 33) as usize) % bound
    }
}

fn random_name(rng: &mut Lcg) -> QualifiedName {
    let spaces = ["", "ns1", "ns2"];
    let space = spaces[rng.next(spaces.len())];
    QualifiedName::new(space, format!("n{}", rng.next(6)))
}

/// Linear reference: the first slot whose recorded name equals `name`.
fn model_lookup(model: &[QualifiedName], name: &QualifiedName) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    model.iter().position(|candidate| candidate == name)
}

fn check_consistency(table: &SlotTable, model: &[QualifiedName], rng_seed: u64) {
    assert_eq!(table.count(), model.len(), "seed {}", rng_seed);
    for space in ["", "ns1", "ns2"] {
        for i in 0..6 {
            let name = QualifiedName::new(space, format!("n{}", i));
            let found = table.lookup(&name);
            assert_eq!(found, model_lookup(model, &name), "seed {} name {}", rng_seed, name);
            if let Some(slot) = found {
                assert_eq!(table.name(slot), Some(&name));
            }
        }
    }
}

fn run_sequence(seed: u64, steps: usize, max_slots: usize) {
    let mut rng = Lcg(seed);
    let mut table = SlotTable::new();
    let mut model: Vec<QualifiedName> = Vec::new();

    for _ in 0..steps {
        match rng.next(4) {
            0 if model.len() < max_slots => {
                let name = random_name(&mut rng);
                let slot = model.len();
                table.set(slot, Value::Null);
                table.set_name(slot, name.clone());
                model.push(name);
            }
            1 if !model.is_empty() => {
                let slot = rng.next(model.len());
                let name = random_name(&mut rng);
                table.set_name(slot, name.clone());
                model[slot] = name;
            }
            2 if !model.is_empty() => {
                let slot = rng.next(model.len());
                table.remove(slot, false);
                model[slot] = QualifiedName::empty();
            }
            3 if !model.is_empty() => {
                let slot = rng.next(model.len());
                table.remove(slot, true);
                model.remove(slot);
            }
            _ => {}
        }
        check_consistency(&table, &model, seed);
    }
}

#[test]
fn test_name_consistency_without_index() {
    for seed in 1..20 {
        run_sequence(seed, 60, HASH_MIN_PROP);
    }
}

#[test]
fn test_name_consistency_with_index() {
    for seed in 1..20 {
        run_sequence(seed, 200, 40);
    }
}

#[test]
fn test_insert_at_preserves_lookup() {
    let mut table = SlotTable::new();
    for i in 0..12 {
        table.define(QualifiedName::public(format!("m{}", i)), Value::Number(i as f64));
    }
    table.insert_at(0, 5);
    for i in 0..12 {
        let slot = table.lookup(&QualifiedName::public(format!("m{}", i)));
        assert_eq!(slot, Some(i + 5));
        assert_eq!(table.get(i + 5), Some(&Value::Number(i as f64)));
    }
    for hole in 0..5 {
        assert_eq!(table.name(hole), None);
    }
}

// ============================================================================
// Heap and collector
// ============================================================================

struct Cell {
    refs: Vec<ValueId>,
}

fn trace(cell: &Cell, out: &mut Vec<ValueId>) {
    out.extend(cell.refs.iter().copied());
}

fn new_cell(heap: &mut Heap<Cell>, key: u32, refs: Vec<ValueId>) -> ValueId {
    heap.allocate(key, 32, true, move |recycled| match recycled {
        Some(mut cell) => {
            cell.refs = refs;
            cell
        }
        None => Cell { refs },
    })
    .unwrap()
}

#[test]
fn test_pool_receives_dropped_values() {
    let mut heap = Heap::new(GcConfig::default());
    let keeper = new_cell(&mut heap, 1, vec![]);
    let before = heap.pool_count(2);

    for _ in 0..50 {
        new_cell(&mut heap, 2, vec![]);
    }
    heap.collect(Generation::New, &[keeper], trace, |_| Disposal::Pool);

    let gained = heap.pool_count(2) - before;
    assert!(gained > 0 && gained <= 50);
    assert!(heap.contains(keeper));
    assert_eq!(heap.live_count(), 1);
    assert!(heap.verify_disjoint());
}

#[test]
fn test_pool_capacity_is_bounded() {
    let mut heap = Heap::new(GcConfig {
        max_type_pool: 4,
        ..GcConfig::default()
    });
    for _ in 0..10 {
        new_cell(&mut heap, 3, vec![]);
    }
    let cycle = heap
        .collect(Generation::New, &[], trace, |_| Disposal::Pool)
        .unwrap();
    assert_eq!(cycle.pooled, 4);
    assert_eq!(cycle.released, 6);
    assert_eq!(heap.pool_count(3), 4);
}

#[test]
fn test_release_disposal_bypasses_pool() {
    let mut heap = Heap::new(GcConfig::default());
    new_cell(&mut heap, 4, vec![]);
    heap.collect(Generation::New, &[], trace, |_| Disposal::Release);
    assert_eq!(heap.pool_count(4), 0);
    assert_eq!(heap.bytes_in_use(), 0);
}

#[test]
fn test_permanent_values_survive_without_roots() {
    let mut heap = Heap::new(GcConfig::default());
    let singleton = new_cell(&mut heap, 1, vec![]);
    heap.set_permanent(singleton, true);
    heap.collect(Generation::Old, &[], trace, |_| Disposal::Pool);
    assert!(heap.contains(singleton));
}

#[test]
fn test_disjointness_through_reuse_cycles() {
    let mut heap = Heap::new(GcConfig::default());
    for round in 0..5 {
        let ids: Vec<_> = (0..20).map(|_| new_cell(&mut heap, 9, vec![])).collect();
        let roots: Vec<_> = ids.iter().copied().step_by(round + 2).collect();
        heap.collect(Generation::New, &roots, trace, |_| Disposal::Pool);
        assert!(heap.verify_disjoint());
        for id in roots {
            assert!(matches!(heap.state(id), Some(BlockState::InGeneration(_))));
        }
    }
}

#[test]
fn test_no_leak_under_repeated_churn() {
    let mut heap = Heap::new(GcConfig::default());
    for _ in 0..10 {
        for _ in 0..100 {
            new_cell(&mut heap, 5, vec![]);
        }
        heap.collect(Generation::New, &[], trace, |_| Disposal::Pool);
        assert_eq!(heap.live_count(), 0);
    }
    assert!(heap.pool_stats(5).reuse >= 900);
    assert!(heap.pool_count(5) <= heap.config().max_type_pool);
}

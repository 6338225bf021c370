//! Property tests: OffsetVec against a std Vec model, under every growth path

use proptest::prelude::*;
use relocmem::segment::ExpansionPolicy;
use relocmem::{
    ArenaSegment, BlockAllocator, Error, GrowthStats, OffsetVec, SegmentAllocator,
    SegmentManager, SimpleAllocator,
};
use std::cell::Cell;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Growth {
    Forward,
    Backward,
    NewBlock,
    SingleShot,
}

const STRATEGIES: [Growth; 4] = [
    Growth::Forward,
    Growth::Backward,
    Growth::NewBlock,
    Growth::SingleShot,
];

fn policy(strategy: Growth) -> ExpansionPolicy {
    match strategy {
        Growth::Forward => ExpansionPolicy::FORWARD_ONLY,
        Growth::Backward => ExpansionPolicy::BACKWARD_ONLY,
        Growth::NewBlock | Growth::SingleShot => ExpansionPolicy::NEW_BLOCK_ONLY,
    }
}

/// Build a full vector of `initial` behind a spacer block, free the spacer,
/// and run `op` on it.
fn with_full_vec<T, A, R>(
    seg: &ArenaSegment,
    alloc: A,
    initial: Vec<T>,
    op: impl FnOnce(&mut OffsetVec<T, A>) -> R,
) -> R
where
    A: BlockAllocator<T>,
{
    let spacer = seg.allocate(16 * 1024).unwrap();
    let mut v = OffsetVec::with_capacity_in(initial.len(), alloc).unwrap();
    v.insert_iter(0, initial).unwrap();
    assert_eq!(v.len(), v.capacity(), "vector must start at capacity");
    unsafe { seg.deallocate(spacer) };
    v.reset_stats();
    op(&mut v)
}

fn insert_with(
    strategy: Growth,
    initial: &[i32],
    index: usize,
    values: &[i32],
) -> (Vec<i32>, GrowthStats) {
    let seg = ArenaSegment::with_policy(64 * 1024, policy(strategy)).unwrap();
    match strategy {
        Growth::SingleShot => with_full_vec(&seg, SimpleAllocator::new(&seg), initial.to_vec(), |v| {
            insert_and_collect(v, index, values)
        }),
        _ => with_full_vec(&seg, SegmentAllocator::new(&seg), initial.to_vec(), |v| {
            insert_and_collect(v, index, values)
        }),
    }
}

fn insert_and_collect<A: BlockAllocator<i32>>(
    v: &mut OffsetVec<i32, A>,
    index: usize,
    values: &[i32],
) -> (Vec<i32>, GrowthStats) {
    v.insert_slice(index, values).unwrap();
    assert!(v.len() <= v.capacity());
    (v.to_vec(), v.stats())
}

/// Initial contents whose byte size is a whole number of segment blocks,
/// so every allocator reports capacity == length.
fn full_block_contents() -> impl proptest::strategy::Strategy<Value = Vec<i32>> {
    (1usize..=8).prop_flat_map(|blocks| prop::collection::vec(any::<i32>(), blocks * 4))
}

#[test]
fn test_insert_scenario_new_buffer() {
    let (result, stats) = insert_with(Growth::NewBlock, &[1, 2, 3, 4], 1, &[10, 20]);
    assert_eq!(result, vec![1, 10, 20, 2, 3, 4]);
    assert_eq!(stats.new_allocations, 1);
}

#[test]
fn test_each_strategy_takes_its_path() {
    let initial: Vec<i32> = (0..8).collect();
    for strategy in STRATEGIES {
        let (result, stats) = insert_with(strategy, &initial, 3, &[100, 101, 102]);
        assert_eq!(result, vec![0, 1, 2, 100, 101, 102, 3, 4, 5, 6, 7]);

        let expected = match strategy {
            Growth::Forward => (1, 0, 0),
            Growth::Backward => (0, 1, 0),
            Growth::NewBlock | Growth::SingleShot => (0, 0, 1),
        };
        assert_eq!(
            (stats.expanded_forward, stats.expanded_backward, stats.new_allocations),
            expected,
            "{strategy:?}"
        );
    }
}

#[derive(Debug, Clone)]
enum Op {
    Push(i32),
    Pop,
    Insert(usize, Vec<i32>),
    Erase(usize, usize),
    Reserve(usize),
    Resize(usize),
    ShrinkToFit,
}

fn op() -> impl proptest::strategy::Strategy<Value = Op> {
    prop_oneof![
        4 => any::<i32>().prop_map(Op::Push),
        1 => Just(Op::Pop),
        3 => (any::<usize>(), prop::collection::vec(any::<i32>(), 0..12))
            .prop_map(|(at, values)| Op::Insert(at, values)),
        2 => (any::<usize>(), 0usize..6).prop_map(|(at, n)| Op::Erase(at, n)),
        1 => (0usize..64).prop_map(Op::Reserve),
        1 => (0usize..48).prop_map(Op::Resize),
        1 => Just(Op::ShrinkToFit),
    ]
}

fn apply<A: BlockAllocator<i32>>(v: &mut OffsetVec<i32, A>, model: &mut Vec<i32>, op: &Op) {
    match op {
        Op::Push(x) => {
            v.push(*x).unwrap();
            model.push(*x);
        }
        Op::Pop => assert_eq!(v.pop(), model.pop()),
        Op::Insert(at, values) => {
            let at = at % (model.len() + 1);
            v.insert_slice(at, values).unwrap();
            model.splice(at..at, values.iter().copied());
        }
        Op::Erase(at, n) => {
            if model.is_empty() {
                return;
            }
            let from = at % model.len();
            let to = (from + n).min(model.len());
            v.erase(from..to).unwrap();
            model.drain(from..to);
        }
        Op::Reserve(cap) => {
            v.reserve(*cap).unwrap();
            assert!(v.capacity() >= *cap);
        }
        Op::Resize(n) => {
            v.resize(*n, -1).unwrap();
            model.resize(*n, -1);
        }
        Op::ShrinkToFit => {
            v.shrink_to_fit().unwrap();
            assert!(v.capacity() >= v.len());
        }
    }
}

proptest! {
    /// Inserting a range at capacity gives the same sequence whichever way
    /// the segment satisfies the growth.
    #[test]
    fn growth_path_does_not_change_result(
        initial in full_block_contents(),
        at in any::<usize>(),
        values in prop::collection::vec(any::<i32>(), 1..24),
    ) {
        let index = at % (initial.len() + 1);
        let mut expected = initial.clone();
        expected.splice(index..index, values.iter().copied());

        for strategy in STRATEGIES {
            let (result, _) = insert_with(strategy, &initial, index, &values);
            prop_assert_eq!(&result, &expected, "{:?}", strategy);
        }
    }

    /// Every operation keeps `len <= capacity` and the same contents as a
    /// plain Vec.
    #[test]
    fn matches_vec_model(ops in prop::collection::vec(op(), 1..64), strategy_idx in 0usize..4) {
        let strategy = STRATEGIES[strategy_idx];
        let seg = ArenaSegment::with_policy(256 * 1024, policy(strategy)).unwrap();
        let mut model = Vec::new();

        match strategy {
            Growth::SingleShot => {
                let mut v = OffsetVec::new_in(SimpleAllocator::new(&seg));
                for op in &ops {
                    apply(&mut v, &mut model, op);
                    prop_assert!(v.len() <= v.capacity());
                    prop_assert_eq!(v.as_slice(), model.as_slice());
                }
            }
            _ => {
                let mut v = OffsetVec::new_in(SegmentAllocator::new(&seg));
                for op in &ops {
                    apply(&mut v, &mut model, op);
                    prop_assert!(v.len() <= v.capacity());
                    prop_assert_eq!(v.as_slice(), model.as_slice());
                }
            }
        }
        prop_assert_eq!(seg.live_blocks(), 0);
    }
}

/// Element with a shared live counter.
#[derive(Debug)]
struct Tracked {
    value: i32,
    live: Rc<Cell<usize>>,
}

impl Tracked {
    fn new(value: i32, live: &Rc<Cell<usize>>) -> Self {
        live.set(live.get() + 1);
        Self {
            value,
            live: live.clone(),
        }
    }
}

impl Drop for Tracked {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

fn failing_insert(strategy: Growth, index: usize, n: usize, fail_at: usize) {
    let seg = ArenaSegment::with_policy(64 * 1024, policy(strategy)).unwrap();
    let live = Rc::new(Cell::new(0));
    let initial: Vec<Tracked> = (0..4).map(|i| Tracked::new(i, &live)).collect();

    match strategy {
        Growth::SingleShot => with_full_vec(&seg, SimpleAllocator::new(&seg), initial, |v| {
            insert_failing_at(v, index, n, fail_at, &live)
        }),
        _ => with_full_vec(&seg, SegmentAllocator::new(&seg), initial, |v| {
            insert_failing_at(v, index, n, fail_at, &live)
        }),
    }
    assert_eq!(live.get(), 0, "{strategy:?}");
    assert_eq!(seg.live_blocks(), 0, "{strategy:?}");
}

fn insert_failing_at<A: BlockAllocator<Tracked>>(
    v: &mut OffsetVec<Tracked, A>,
    index: usize,
    n: usize,
    fail_at: usize,
    live: &Rc<Cell<usize>>,
) {
    let err = v
        .try_insert_with(index, n, |i| {
            if i == fail_at {
                Err(format!("element {i} refused"))
            } else {
                Ok(Tracked::new(1000, live))
            }
        })
        .unwrap_err();
    assert!(
        matches!(err, Error::Construction { index: at, .. } if at == index + fail_at),
        "{err}"
    );

    let values: Vec<i32> = v.iter().map(|t| t.value).collect();
    assert_eq!(values, vec![0, 1, 2, 3]);
    assert_eq!(live.get(), 4);
}

proptest! {
    /// A failure on the K-th new element leaves the previous elements, drops
    /// each new element once, and leaks nothing.
    #[test]
    fn failed_insert_restores_sequence(
        strategy_idx in 0usize..4,
        index in 0usize..=4,
        (n, fail_at) in (1usize..10).prop_flat_map(|n| (Just(n), 0..n)),
    ) {
        failing_insert(STRATEGIES[strategy_idx], index, n, fail_at);
    }
}

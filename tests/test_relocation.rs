//! Data stored in a segment stays reachable after the segment moves

use relocmem::vector::RawParts;
use relocmem::{
    ArenaSegment, Config, NodeAllocator, OffsetPtr, OffsetVec, SegmentAllocator, SegmentManager,
};
use std::mem::{self, size_of};

#[test]
fn test_vector_header_stored_in_segment() {
    let mut seg = ArenaSegment::new(64 * 1024).unwrap();

    // The offset triple itself lives in the segment
    let slot: OffsetPtr<RawParts<u32>> = seg.allocate(size_of::<RawParts<u32>>()).unwrap().cast();
    {
        let mut v = OffsetVec::new_in(SegmentAllocator::new(&seg));
        for i in 0..1000u32 {
            v.push(i * 3).unwrap();
        }
        let (parts, _alloc) = v.into_raw_parts();
        unsafe { slot.resolve(seg.base()).write(parts) };
    }

    let before = seg.base();
    seg.remap().unwrap();
    assert_ne!(seg.base(), before);

    let parts = unsafe { slot.resolve(seg.base()).read() };
    let v = unsafe { OffsetVec::from_raw_parts(parts, SegmentAllocator::new(&seg)) };
    assert_eq!(v.len(), 1000);
    assert!(v.iter().enumerate().all(|(i, &x)| x == i as u32 * 3));
}

#[test]
fn test_node_pool_found_after_remap() {
    let mut seg = ArenaSegment::new(64 * 1024).unwrap();

    let nodes: Vec<OffsetPtr<u64>> = {
        let alloc = NodeAllocator::<u64, _>::new(&seg).unwrap();
        let nodes = (0..10)
            .map(|i| {
                let node = alloc.allocate_one().unwrap();
                unsafe { alloc.construct(node, i * i) };
                node
            })
            .collect();
        // Another holder keeps the pool linked while the region moves
        mem::forget(alloc);
        nodes
    };

    seg.remap().unwrap();

    let alloc = NodeAllocator::<u64, _>::new(&seg).unwrap();
    assert_eq!(alloc.node_pool().ref_count(), 2);
    assert_eq!(alloc.node_pool().free_nodes(), 64 - 10);
    for (i, node) in nodes.iter().enumerate() {
        assert_eq!(unsafe { *alloc.resolve(*node) }, (i * i) as u64);
    }
    assert_eq!(alloc.node_pool().verify_free_list().unwrap(), 54);
}

#[test]
fn test_segment_from_config() {
    let config = Config::from_toml_str(
        r#"
        [segment]
        size = 8192
        expand_forward = false
        expand_backward = false
        "#,
    )
    .unwrap();
    let seg = ArenaSegment::from_config(&config.segment).unwrap();
    assert_eq!(seg.max_size(), 8192);

    let mut v = OffsetVec::with_capacity_in(4, SegmentAllocator::new(&seg)).unwrap();
    v.extend_from_slice(&[1u32, 2, 3, 4, 5]).unwrap();
    assert_eq!(v.stats().expanded_forward, 0);
    assert_eq!(v.stats().new_allocations, 2);
}

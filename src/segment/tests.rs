//! Segment tests - allocation-command protocol against `ArenaSegment`
//!
//! Covers each command outcome: new block, forward growth, backward
//! growth (alone and combined with forward), shrink in place, refusal.

use super::*;
use crate::error::Error;

const CMD_GROW: AllocationCommand = AllocationCommand::ALLOCATE_NEW
    .union(AllocationCommand::EXPAND_FWD)
    .union(AllocationCommand::EXPAND_BWD);

fn alloc(segment: &ArenaSegment, bytes: usize) -> OffsetPtr<u8> {
    segment.allocate(bytes).expect("allocation")
}

#[cfg(test)]
mod layout_tests {
    use super::*;

    #[test]
    fn test_fresh_segment_is_all_free() {
        let segment = ArenaSegment::new(4096).unwrap();
        assert_eq!(segment.max_size(), 4096);
        assert_eq!(segment.free_memory(), 4096);
        assert_eq!(segment.live_blocks(), 0);
        assert_eq!(segment.alignment(), SEGMENT_ALIGNMENT);
    }

    #[test]
    fn test_allocations_are_aligned_and_distinct() {
        let segment = ArenaSegment::new(4096).unwrap();
        let a = alloc(&segment, 10);
        let b = alloc(&segment, 33);

        assert_ne!(a, b);
        assert_eq!(a.offset().unwrap() % SEGMENT_ALIGNMENT, 0);
        assert_eq!(b.offset().unwrap() % SEGMENT_ALIGNMENT, 0);
        assert_eq!(segment.block_size(a), Some(16));
        assert_eq!(segment.block_size(b), Some(48));
    }

    #[test]
    fn test_exhausted_segment_reports_out_of_memory() {
        let segment = ArenaSegment::new(256).unwrap();
        let _a = alloc(&segment, 200);

        let err = segment.allocate(128).unwrap_err();
        assert!(matches!(err, Error::OutOfMemory { requested: 128, available: 48 }));
        assert_eq!(segment.stats().failed, 1);
    }

    #[test]
    fn test_allocate_new_accepts_down_to_limit() {
        let segment = ArenaSegment::new(256).unwrap();
        let received = segment
            .allocation_command(&CommandRequest::allocate(4, 100, 16))
            .unwrap();
        // 100 objects of 16 bytes cannot fit, the whole region (16 objects) can
        assert!(!received.expanded);
        assert_eq!(received.size, 16);
    }

    #[test]
    fn test_segment_ids_are_unique() {
        let a = ArenaSegment::new(64).unwrap();
        let b = ArenaSegment::new(64).unwrap();
        assert_ne!(a.id(), b.id());
    }
}

#[cfg(test)]
mod expansion_tests {
    use super::*;

    #[test]
    fn test_forward_expansion_keeps_start() {
        let segment = ArenaSegment::new(1024).unwrap();
        let block = alloc(&segment, 64);

        let received = segment
            .allocation_command(&CommandRequest::new(CMD_GROW, 8, 8, 16, block))
            .unwrap();

        assert!(received.is_forward_of(block));
        assert_eq!(received.size, 8);
        assert_eq!(segment.block_size(block), Some(128));
        assert_eq!(segment.stats().expanded_forward, 1);
    }

    #[test]
    fn test_backward_expansion_moves_start_by_whole_objects() {
        let segment = ArenaSegment::new(1024).unwrap();
        let before = alloc(&segment, 96);
        let block = alloc(&segment, 48);
        let _after = alloc(&segment, 16);
        unsafe { segment.deallocate(before) };

        // 12-byte objects: start may only move by multiples of 48 bytes
        let received = segment
            .allocation_command(&CommandRequest::new(CMD_GROW, 8, 8, 12, block))
            .unwrap();

        assert!(received.expanded);
        assert_ne!(received.block, block);
        let moved = block.offset().unwrap() - received.block.offset().unwrap();
        assert_eq!(moved % 48, 0);
        assert!(received.size >= 8);
        assert_eq!(segment.stats().expanded_backward, 1);
    }

    #[test]
    fn test_backward_expansion_combines_with_forward() {
        let segment = ArenaSegment::new(1024).unwrap();
        let before = alloc(&segment, 32);
        let block = alloc(&segment, 32);
        let after = alloc(&segment, 32);
        let _fence = alloc(&segment, 16);
        unsafe {
            segment.deallocate(before);
            segment.deallocate(after);
        }

        // 96 bytes needed: 32 current + 32 forward + 32 backward
        let received = segment
            .allocation_command(&CommandRequest::new(CMD_GROW, 96, 96, 1, block))
            .unwrap();

        assert!(received.expanded);
        assert_eq!(received.block.offset(), Some(0));
        assert_eq!(received.size, 96);
    }

    #[test]
    fn test_disabled_directions_fall_back_to_new_block() {
        let segment = ArenaSegment::with_policy(1024, ExpansionPolicy::NEW_BLOCK_ONLY).unwrap();
        let block = alloc(&segment, 64);

        let received = segment
            .allocation_command(&CommandRequest::new(CMD_GROW, 8, 8, 16, block))
            .unwrap();

        assert!(!received.expanded);
        assert_ne!(received.block, block);
        assert_eq!(segment.live_blocks(), 2);
    }

    #[test]
    fn test_expand_only_request_fails_without_touching_block() {
        let segment = ArenaSegment::new(256).unwrap();
        let block = alloc(&segment, 64);
        let _fence = alloc(&segment, 192);

        let err = segment
            .allocation_command(&CommandRequest::new(
                AllocationCommand::EXPAND_FWD,
                8,
                8,
                16,
                block,
            ))
            .unwrap_err();

        assert!(err.is_out_of_memory());
        assert_eq!(segment.block_size(block), Some(64));
    }

    #[test]
    fn test_shrink_in_place_releases_tail() {
        let segment = ArenaSegment::new(1024).unwrap();
        let block = alloc(&segment, 256);
        let free_before = segment.free_memory();

        let received = segment
            .allocation_command(&CommandRequest::new(
                AllocationCommand::SHRINK_IN_PLACE,
                64,
                4,
                16,
                block,
            ))
            .unwrap();

        assert_eq!(received.block, block);
        assert_eq!(received.size, 4);
        assert_eq!(segment.block_size(block), Some(64));
        assert_eq!(segment.free_memory(), free_before + 192);
    }

    #[test]
    fn test_unknown_block_is_rejected() {
        let segment = ArenaSegment::new(256).unwrap();
        let bogus = OffsetPtr::from_offset(32);
        let err = segment
            .allocation_command(&CommandRequest::new(CMD_GROW, 4, 4, 16, bogus))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidBlock { offset: 32 }));
    }
}

#[cfg(test)]
mod directory_tests {
    use super::*;

    #[test]
    fn test_shared_directory_registers_once() {
        let segment = ArenaSegment::new(256).unwrap();
        let key = PoolKey {
            node_size: 16,
            nodes_per_chunk: 64,
        };
        let at = OffsetPtr::from_offset(64);

        assert!(segment.find_shared(&key).is_none());
        assert!(segment.register_shared(key, at));
        assert!(!segment.register_shared(key, OffsetPtr::from_offset(128)));
        assert_eq!(segment.find_shared(&key), Some(at));
        assert_eq!(segment.unregister_shared(&key), Some(at));
        assert!(segment.find_shared(&key).is_none());
    }
}

#[cfg(test)]
mod relocation_tests {
    use super::*;

    #[test]
    fn test_remap_changes_base_and_keeps_bytes() {
        let mut segment = ArenaSegment::new(256).unwrap();
        let block = alloc(&segment, 16);
        unsafe { *block.resolve(segment.base()) = 0xAB };
        let old_base = segment.base();

        segment.remap().unwrap();

        assert_ne!(segment.base(), old_base);
        assert_eq!(unsafe { *block.resolve(segment.base()) }, 0xAB);
    }

    #[test]
    fn test_segment_moves_to_another_thread() {
        fn assert_send<T: Send>() {}
        assert_send::<ArenaSegment>();

        let segment = ArenaSegment::new(256).unwrap();
        let block = alloc(&segment, 16);
        unsafe { *block.resolve(segment.base()) = 0x5A };

        let segment = std::thread::spawn(move || {
            assert_eq!(unsafe { *block.resolve(segment.base()) }, 0x5A);
            unsafe { segment.deallocate(block) };
            segment
        })
        .join()
        .unwrap();
        assert_eq!(segment.live_blocks(), 0);
    }
}

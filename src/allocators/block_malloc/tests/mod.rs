use crate::heaps::MmapHeapFactory;

use super::*;

/// An allocator whose heap can not grow beyond its first instance.
fn fixed(arena_size: usize) -> BlockMalloc<MmapHeapFactory> {
    let mut allocator =
        BlockMalloc::with_factory(MmapHeapFactory::with_limit(arena_size), arena_size);
    allocator.initialize_heap().unwrap();
    allocator
}

fn growable(arena_size: usize) -> BlockMalloc<MmapHeapFactory> {
    let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::new(), arena_size);
    allocator.initialize_heap().unwrap();
    allocator
}

#[test]
fn test_1() {
    const BUF_SIZE: usize = 64 * 1024;
    let allocator = fixed(BUF_SIZE);
    let stats = allocator.validate().unwrap();
    assert_eq!(
        stats,
        HeapStats {
            instances: 1,
            blocks: 1,
            free_blocks: 1,
            free_bytes: BUF_SIZE - HEADER_SIZE,
            used_bytes: 0,
        }
    );
}

#[test]
fn test_2() {
    const BUF_SIZE: usize = 64 * 1024;
    let mut allocator = fixed(BUF_SIZE);

    let mut objects: Vec<(*mut u8, usize)> = vec![];
    for i in 0..12 {
        let size = 1 << i;
        objects.push((allocator.malloc(size), size));
        allocator.validate().unwrap();
    }

    for i in 0..objects.len() {
        let (ptr, size) = objects[i];
        assert!(!ptr.is_null());
        assert_eq!(ptr as usize % HEADER_ALIGN, 0);
        if i != objects.len() - 1 {
            assert_eq!(
                ptr.wrapping_add(augment_size(size).unwrap() + HEADER_SIZE),
                objects[i + 1].0
            );
        }
        unsafe {
            allocator.free(ptr);
            assert_eq!(allocator.malloc(size), ptr);
        }
        allocator.validate().unwrap();
    }

    for i in (0..objects.len()).rev() {
        unsafe { allocator.free(objects[i].0) };
        allocator.validate().unwrap();
    }
    assert_eq!(allocator.validate().unwrap().blocks, 1);

    for i in 0..objects.len() {
        assert_eq!(allocator.malloc(objects[i].1), objects[i].0);
    }
}

#[test]
fn test_3() {
    const BUF_SIZE: usize = 32 * BLOCK_MIN_SIZE;
    let mut allocator = fixed(BUF_SIZE);

    let size_1 = BLOCK_CONTENT_MIN_SIZE;
    let size_2 = BLOCK_CONTENT_MIN_SIZE * 2 + HEADER_SIZE;
    unsafe {
        let p1 = allocator.malloc(size_1);
        let p2 = allocator.malloc(size_1);
        let p3 = allocator.malloc(size_1);
        let p4 = allocator.malloc(size_2);
        assert!(!p1.is_null());
        assert!(!p2.is_null());
        assert!(!p3.is_null());
        assert!(!p4.is_null());
        allocator.free(p1);
        allocator.free(p2);
        assert_eq!(allocator.validate().unwrap().free_blocks, 2);
        // p1 and p2 were merged into a block exactly large enough for size_2.
        let p5 = allocator.malloc(size_2);
        assert_eq!(p1, p5);
        allocator.free(p4);
        allocator.free(p3);
        allocator.free(p5);
        assert_eq!(allocator.validate().unwrap().blocks, 1);
    }
}

#[test]
fn test_4() {
    const BUF_SIZE: usize = 32 * BLOCK_MIN_SIZE;
    let mut allocator = fixed(BUF_SIZE);

    let size_1 = BLOCK_CONTENT_MIN_SIZE;
    let size_2 = BLOCK_CONTENT_MIN_SIZE * 3 + 2 * HEADER_SIZE;
    unsafe {
        let p1 = allocator.malloc(size_1);
        let p2 = allocator.malloc(size_1);
        let p3 = allocator.malloc(size_1);
        let p4 = allocator.malloc(size_1);
        allocator.free(p1);
        allocator.free(p3);
        let stats = allocator.validate().unwrap();
        assert_eq!(stats.free_blocks, 3);

        // Releasing p2 merges it with both of its neighbours.
        allocator.free(p2);
        let stats = allocator.validate().unwrap();
        assert_eq!(stats.free_blocks, 2);
        assert_eq!(p1, allocator.malloc(size_2));
        assert!(!p4.is_null());
    }
}

#[test]
fn test_5() {
    const BUF_SIZE: usize = 8 * BLOCK_MIN_SIZE;
    let mut allocator = fixed(BUF_SIZE);

    unsafe {
        let p1 = allocator.malloc(BUF_SIZE - HEADER_SIZE);
        assert!(!p1.is_null());
        assert_eq!(allocator.validate().unwrap().free_blocks, 0);
        // It's ok for the size to be 0 since it should get augmented, but there is no room.
        assert!(allocator.malloc(0).is_null());
        assert!(allocator.malloc(1).is_null());
        allocator.free(p1);
        assert!(!allocator.malloc(BUF_SIZE - HEADER_SIZE).is_null());
    }
}

#[test]
fn test_6() {
    const BUF_SIZE: usize = 128 * HEADER_SIZE;
    let mut allocator = fixed(BUF_SIZE);

    let size_1 = HEADER_SIZE * 4;
    let size_2 = HEADER_SIZE * 10;
    unsafe {
        let p1 = allocator.malloc(size_1);
        let p2 = allocator.malloc(size_2);
        let p3 = allocator.malloc(size_2);
        assert!(!p1.is_null());
        assert!(!p2.is_null());
        assert!(!p3.is_null());
        allocator.free(p2);
        allocator.free(p3);

        assert_eq!(p1, allocator.realloc(p1, size_2));
        allocator.validate().unwrap();
        assert_eq!(p1, allocator.realloc(p1, size_1));
        allocator.validate().unwrap();

        let p4 = allocator.malloc(size_1);
        assert_eq!(p2, p4);

        assert_eq!(
            p4.add(size_1 + HEADER_SIZE),
            allocator.realloc(p1, size_2)
        );
        allocator.validate().unwrap();
    }
}

#[test]
fn test_7() {
    const BUF_SIZE: usize = 64 * HEADER_SIZE;
    let mut allocator = fixed(BUF_SIZE);

    let size = HEADER_SIZE * 10;
    unsafe {
        let p1 = allocator.malloc(size);
        assert!(!p1.is_null());
        allocator.free(p1);
        let p2 = allocator.malloc(size);
        let p3 = allocator.malloc(size);

        assert_ne!(p2, p3);
    }
}

#[test]
fn test_8() {
    const BUF_SIZE: usize = 64 * BLOCK_MIN_SIZE;
    let mut allocator = fixed(BUF_SIZE);

    let size = HEADER_SIZE * 8;
    unsafe {
        let p1 = allocator.malloc(size);
        assert!(!p1.is_null());
        let p2 = allocator.realloc(p1, 1);
        assert_eq!(p1, p2);
        assert_eq!(BlockMalloc::<MmapHeapFactory>::usable_size(p2), BLOCK_CONTENT_MIN_SIZE);
        let stats = allocator.validate().unwrap();
        assert_eq!(stats.blocks, 2);
    }
}

#[test]
fn test_9() {
    const BUF_SIZE: usize = BLOCK_MIN_SIZE * 8;
    let mut allocator = fixed(BUF_SIZE);

    let p1 = allocator.malloc(0);
    let p2 = allocator.malloc(0);
    assert!(!p1.is_null());
    assert!(!p2.is_null());
    assert_ne!(p1, p2);
    unsafe {
        allocator.free(p1);
        allocator.free(p2);
    }
    assert_eq!(allocator.validate().unwrap().blocks, 1);
}

#[test]
fn test_10() {
    const BUF_SIZE: usize = BLOCK_MIN_SIZE * 16;
    let mut allocator = fixed(BUF_SIZE);

    unsafe {
        let p1 = allocator.malloc(64);
        let pattern: Vec<u8> = (0..64).collect();
        p1.copy_from_nonoverlapping(pattern.as_ptr(), 64);

        // The successor is in use, so growing has to move the object.
        let blocker = allocator.malloc(8);
        let p2 = allocator.realloc(p1, 200);
        assert_ne!(p1, p2);
        assert_eq!(core::slice::from_raw_parts(p2, 64), &pattern[..]);
        allocator.validate().unwrap();

        let p3 = allocator.realloc(p2, 24);
        assert_eq!(p2, p3);
        assert_eq!(core::slice::from_raw_parts(p3, 24), &pattern[..24]);
        allocator.validate().unwrap();

        allocator.free(blocker);
        allocator.free(p3);
        assert_eq!(allocator.validate().unwrap().blocks, 1);
    }
}

#[test]
fn test_11() {
    const BUF_SIZE: usize = BLOCK_MIN_SIZE * 16;
    let mut allocator = fixed(BUF_SIZE);

    unsafe {
        let p1 = allocator.malloc(128);
        p1.write_bytes(0xFF, 128);
        allocator.free(p1);

        let p2 = allocator.calloc(16, 8);
        assert_eq!(p1, p2);
        assert!(core::slice::from_raw_parts(p2, 128).iter().all(|&b| b == 0));

        assert!(allocator.calloc(usize::MAX, 2).is_null());
        assert!(allocator.calloc(2, usize::MAX / 2 + 1).is_null());
        allocator.validate().unwrap();
    }
}

#[test]
fn test_12() {
    const BUF_SIZE: usize = BLOCK_MIN_SIZE * 8;
    let mut allocator = fixed(BUF_SIZE);

    unsafe {
        let p1 = allocator.realloc(null_mut(), 40);
        assert!(!p1.is_null());
        assert_eq!(allocator.validate().unwrap().used_bytes, 40);

        assert!(allocator.realloc(p1, 0).is_null());
        assert_eq!(allocator.validate().unwrap().blocks, 1);

        allocator.free(null_mut());
        assert_eq!(allocator.validate().unwrap().blocks, 1);
    }
}

#[test]
fn test_13() {
    const BUF_SIZE: usize = 4096;
    let mut allocator = growable(BUF_SIZE);

    unsafe {
        let p1 = allocator.malloc(BUF_SIZE - HEADER_SIZE);
        let p2 = allocator.malloc(16);
        let p3 = allocator.malloc(3 * BUF_SIZE);
        assert!(!p1.is_null());
        assert!(!p2.is_null());
        assert!(!p3.is_null());

        let stats = allocator.validate().unwrap();
        assert_eq!(stats.instances, 3);
        assert_eq!(allocator.heap_instances()[2].size(), 3 * BUF_SIZE + HEADER_SIZE);

        allocator.free(p1);
        allocator.free(p2);
        allocator.free(p3);
        let stats = allocator.validate().unwrap();
        // Blocks never merge across instances.
        assert_eq!(stats.blocks, 3);
        assert_eq!(stats.free_blocks, 3);
    }
}

#[test]
fn test_14() {
    let mut allocator = growable(4096);
    assert!(!allocator.malloc(100).is_null());
    assert_eq!(allocator.heap_instances().len(), 1);

    allocator.reset();
    assert!(allocator.heap_instances().is_empty());
    assert_eq!(allocator.validate().unwrap(), HeapStats::default());

    allocator.initialize_heap().unwrap();
    assert_eq!(allocator.validate().unwrap().free_blocks, 1);
}

#[test]
fn test_15() {
    let mut allocator = BlockMalloc::with_factory(MmapHeapFactory::with_limit(1000), 1000);
    allocator.initialize_heap().unwrap();

    assert!(allocator.malloc(usize::MAX).is_null());
    assert!(allocator.malloc(isize::MAX as usize).is_null());
    assert!(allocator.malloc(2000).is_null());
    let stats = allocator.validate().unwrap();
    assert_eq!(stats.free_bytes, 1000 - HEADER_SIZE);
}

#[test]
fn test_16() {
    // Instances are never smaller than a single minimal block.
    let mut allocator = growable(1);
    assert_eq!(allocator.heap_factory().total_size(), BLOCK_MIN_SIZE);
    let stats = allocator.validate().unwrap();
    assert_eq!(stats.instances, 1);
    assert_eq!(stats.free_bytes, BLOCK_MIN_SIZE - HEADER_SIZE);

    unsafe {
        assert!(allocator.add_instance(BLOCK_MIN_SIZE - 1).is_err());
    }
    assert_eq!(allocator.heap_instances().len(), 1);
    assert_eq!(allocator.heap_factory().total_size(), BLOCK_MIN_SIZE);
}

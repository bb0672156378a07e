//! The real program break is process-global, so this lives in its own test
//! binary.
#![cfg(unix)]
use tagheap::{AllocError, Sbrk, TagHeap};

#[test]
fn program_break() {
    let _ = env_logger::builder().is_test(true).try_init();

    let mut heap = match TagHeap::new(unsafe { Sbrk::new() }) {
        Ok(heap) => heap,
        // Some platforms don't support `sbrk`
        Err(AllocError::ArenaExhausted { .. }) => return,
        Err(e) => panic!("{}", e),
    };
    assert_eq!(heap.arena_start().as_ptr() as usize % tagheap::ALIGNMENT, 0);

    // The system allocator may move the break between our calls, in which
    // case growing fails cleanly
    match heap.allocate(64) {
        Ok(ptr) => {
            assert_eq!(ptr.as_ptr() as usize % tagheap::ALIGNMENT, 0);
            unsafe {
                ptr.as_ptr().write_bytes(0x42, 64);
                heap.free(ptr.as_ptr());
            }
        }
        Err(e) => assert!(matches!(e, AllocError::ArenaExhausted { .. })),
    }
    assert!(heap.check().is_ok());
}

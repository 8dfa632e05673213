//! Property-based tests for the object facility.
//!
//! Uses proptest to generate random inputs and verify invariants hold.

use proptest::prelude::*;
use refblock::{
    adjust, alloc, alloc_with_options, decrement, increment, lock, ref_count, try_lock, unlock,
    Error, RawHandle, Variant, PAYLOAD_ALIGN,
};

use std::sync::atomic::{AtomicUsize, Ordering};

/// Strategy for generating every variant
fn variant() -> impl Strategy<Value = Variant> {
    prop_oneof![
        Just(Variant::Locked),
        Just(Variant::SharedLock),
        Just(Variant::Unlocked),
    ]
}

#[repr(C, align(16))]
struct Scratch([u8; 256]);

proptest! {
    /// Allocated payloads are aligned, zeroed and start with one reference
    #[test]
    fn fresh_objects(size in 0usize..2048, variant in variant()) {
        let handle = alloc(size, None, variant).unwrap();
        prop_assert_eq!(handle.as_ptr() as usize % PAYLOAD_ALIGN, 0);

        let payload = unsafe { std::slice::from_raw_parts(handle.as_ptr(), size) };
        prop_assert!(payload.iter().all(|&b| b == 0));
        prop_assert_eq!(unsafe { ref_count(handle) }, Ok(1));
        prop_assert_eq!(unsafe { refblock::variant(handle) }, Ok(variant));

        prop_assert_eq!(unsafe { decrement(handle) }, Ok(1));
    }

    /// Taking and releasing the same number of references leaves the count
    /// and liveness unchanged
    #[test]
    fn balanced_updates(extra in 1usize..64, variant in variant()) {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn count_drop(_: RawHandle) {
            DROPS.fetch_add(1, Ordering::SeqCst);
        }

        let before = DROPS.load(Ordering::SeqCst);
        let handle = alloc(32, Some(count_drop), variant).unwrap();

        for expected in 1..=extra {
            prop_assert_eq!(unsafe { increment(handle) }, Ok(expected as i32));
        }
        for expected in (2..=extra + 1).rev() {
            prop_assert_eq!(unsafe { decrement(handle) }, Ok(expected as i32));
        }

        prop_assert_eq!(unsafe { ref_count(handle) }, Ok(1));
        prop_assert_eq!(DROPS.load(Ordering::SeqCst), before);

        prop_assert_eq!(unsafe { decrement(handle) }, Ok(1));
        prop_assert!(DROPS.load(Ordering::SeqCst) > before);
    }

    /// Adjusting by an arbitrary positive delta reports the previous count
    #[test]
    fn adjust_reports_previous(delta in 1i32..1000, variant in variant()) {
        let handle = alloc(8, None, variant).unwrap();
        unsafe {
            prop_assert_eq!(adjust(handle, delta), Ok(1));
            prop_assert_eq!(adjust(handle, 0), Ok(1 + delta));
            prop_assert_eq!(adjust(handle, -delta), Ok(1 + delta));
            prop_assert_eq!(adjust(handle, -1), Ok(1));
        }
    }

    /// Memory this crate never allocated is rejected and left untouched
    #[test]
    fn foreign_memory_is_rejected(fill in any::<u8>(), offset in 0usize..8, delta in -4i32..4) {
        let mut scratch = Box::new(Scratch([fill; 256]));
        let handle = RawHandle::from_ptr(unsafe {
            scratch.0.as_mut_ptr().add(64 + offset * PAYLOAD_ALIGN)
        })
        .unwrap();

        unsafe {
            prop_assert_eq!(adjust(handle, delta), Err(Error::InvalidObject));
            prop_assert_eq!(lock(handle), Err(Error::InvalidObject));
            prop_assert_eq!(try_lock(handle), Err(Error::InvalidObject));
            prop_assert_eq!(unlock(handle), Err(Error::InvalidObject));
        }
        prop_assert!(scratch.0.iter().all(|&b| b == fill));
    }

    /// Option words decode by their low two bits
    #[test]
    fn option_words(options in any::<u32>()) {
        let result = alloc_with_options(8, None, options);
        match options & 0b11 {
            3 => prop_assert_eq!(result.err(), Some(Error::AllocationFailure)),
            bits => {
                let handle = result.unwrap();
                let expected = Variant::from_options(bits).unwrap();
                prop_assert_eq!(unsafe { refblock::variant(handle) }, Ok(expected));
                prop_assert_eq!(unsafe { decrement(handle) }, Ok(1));
            }
        }
    }
}

#[test]
fn destroyed_handle_is_rejected_everywhere() {
    static DROPS: AtomicUsize = AtomicUsize::new(0);

    unsafe fn count_drop(_: RawHandle) {
        DROPS.fetch_add(1, Ordering::SeqCst);
    }

    // Reads the freed header, so this relies on the allocator not handing the
    // chunk out again before the checks below. Unlocked keeps it lock-free.
    let handle = alloc(16, Some(count_drop), Variant::Unlocked).unwrap();
    unsafe {
        assert_eq!(increment(handle), Ok(1));
        assert_eq!(decrement(handle), Ok(2));
        assert_eq!(DROPS.load(Ordering::SeqCst), 0);
        assert_eq!(decrement(handle), Ok(1));
        assert_eq!(DROPS.load(Ordering::SeqCst), 1);

        assert_eq!(adjust(handle, 0), Err(Error::InvalidObject));
        assert_eq!(increment(handle), Err(Error::InvalidObject));
        assert_eq!(decrement(handle), Err(Error::InvalidObject));
        assert_eq!(lock(handle), Err(Error::InvalidObject));
        assert_eq!(unlock(handle), Err(Error::InvalidObject));
        assert_eq!(try_lock(handle), Err(Error::InvalidObject));
    }
    assert_eq!(DROPS.load(Ordering::SeqCst), 1);
}

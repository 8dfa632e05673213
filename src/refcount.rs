use core::sync::atomic::{self, Ordering};

use tracing::{trace, warn};

use crate::block::free_block;
use crate::header::{resolve_live, Object, RawHandle};
use crate::{Error, Result};

/// Adds `delta` to the object's reference count and returns the count as it
/// was before the update.
///
/// - `delta == 0` only reads the count. The read is not synchronized with
///   concurrent updates, so the value may be stale by the time it is
///   returned; do not base ordering decisions on it.
/// - If the count stays positive, the object stays live.
/// - If the count reaches exactly zero, the destructor runs with `handle`
///   while the payload is still valid, the header is marked dead and the
///   block (including its embedded lock) is freed, all before this call
///   returns.
/// - If the count drops below zero, more references were released than
///   taken. [`Error::InvalidObject`] is returned and the object is left as it
///   is, corrupted count included.
///
/// # Safety
/// The bytes preceding `handle` that hold an object header must be readable.
/// This is always true for a handle returned by [`alloc`] whose object has
/// not been freed, and for any address inside a larger live allocation. A
/// handle whose object was destroyed is recognised as long as its memory has
/// not been handed out again. Dropping a reference may free the object, after
/// which the payload must not be touched.
///
/// [`alloc`]: crate::alloc
pub unsafe fn adjust(handle: RawHandle, delta: i32) -> Result<i32> {
    let object = resolve_live(handle)?;
    let header = object.header();

    if delta == 0 {
        return Ok(header.count.load(Ordering::Relaxed));
    }

    let previous = header.count.fetch_add(delta, Ordering::AcqRel);
    let current = previous.wrapping_add(delta);

    if current > 0 {
        return Ok(previous);
    }

    if current < 0 {
        warn!(handle = ?handle.as_ptr(), previous, delta, "reference count released below zero");
        return Err(Error::InvalidObject);
    }

    destroy(handle, object);
    Ok(previous)
}

unsafe fn destroy(handle: RawHandle, object: Object) {
    atomic::fence(Ordering::Acquire);

    let header = object.header();
    if let Some(destructor) = header.destructor {
        destructor.run(handle);
    }
    header.magic.store(0, Ordering::Release);
    trace!(handle = ?handle.as_ptr(), "destroyed object");

    free_block(object);
}

/// Highest count [`try_increment`] will raise an object to. Leaves headroom
/// below `i32::MAX` for raw increments racing past the check.
pub(crate) const MAX_REFCOUNT: i32 = i32::MAX / 2;

/// Takes one more reference unless the count has reached `ceiling`, in which
/// case nothing is added and [`Error::RefCountOverflow`] is returned.
///
/// # Safety
/// See [`adjust`].
pub(crate) unsafe fn try_increment(handle: RawHandle, ceiling: i32) -> Result<i32> {
    let object = resolve_live(handle)?;
    let count = &object.header().count;

    let mut previous = count.load(Ordering::Relaxed);
    loop {
        if previous >= ceiling {
            warn!(handle = ?handle.as_ptr(), previous, "reference count at ceiling");
            return Err(Error::RefCountOverflow);
        }
        if previous <= 0 {
            return Err(Error::InvalidObject);
        }
        match count.compare_exchange_weak(
            previous,
            previous + 1,
            Ordering::AcqRel,
            Ordering::Relaxed,
        ) {
            Ok(_) => return Ok(previous),
            Err(actual) => previous = actual,
        }
    }
}

/// Takes one more reference. Equivalent to `adjust(handle, 1)`.
///
/// # Safety
/// See [`adjust`].
pub unsafe fn increment(handle: RawHandle) -> Result<i32> {
    adjust(handle, 1)
}

/// Releases one reference. Equivalent to `adjust(handle, -1)`.
///
/// # Safety
/// See [`adjust`].
pub unsafe fn decrement(handle: RawHandle) -> Result<i32> {
    adjust(handle, -1)
}

/// Releases one reference if there is a handle; does nothing for `None`.
///
/// # Safety
/// See [`adjust`].
pub unsafe fn cleanup(handle: Option<RawHandle>) {
    if let Some(handle) = handle {
        let _ = decrement(handle);
    }
}

/// Reads the current reference count. Equivalent to `adjust(handle, 0)` and
/// just as racy.
///
/// # Safety
/// See [`adjust`].
pub unsafe fn ref_count(handle: RawHandle) -> Result<i32> {
    adjust(handle, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{alloc, Variant};

    use std::sync::atomic::AtomicUsize;

    #[test]
    fn last_release_runs_destructor_once() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);
        static SEEN: AtomicUsize = AtomicUsize::new(0);

        unsafe fn record(handle: RawHandle) {
            SEEN.store(handle.as_ptr() as usize, Ordering::Relaxed);
            DROPS.fetch_add(1, Ordering::Relaxed);
        }

        let handle = alloc(16, Some(record), Variant::Locked).unwrap();
        unsafe {
            assert_eq!(increment(handle), Ok(1));
            assert_eq!(ref_count(handle), Ok(2));
            assert_eq!(decrement(handle), Ok(2));
            assert_eq!(DROPS.load(Ordering::Relaxed), 0);

            assert_eq!(decrement(handle), Ok(1));
            assert_eq!(DROPS.load(Ordering::Relaxed), 1);
            assert_eq!(SEEN.load(Ordering::Relaxed), handle.as_ptr() as usize);
        }
    }

    #[test]
    fn destructor_sees_payload() {
        static VALUE: AtomicUsize = AtomicUsize::new(0);

        unsafe fn read_payload(handle: RawHandle) {
            VALUE.store(*(handle.as_ptr() as *const usize), Ordering::Relaxed);
        }

        let handle = alloc(8, Some(read_payload), Variant::Unlocked).unwrap();
        unsafe {
            *(handle.as_ptr() as *mut usize) = 0xfeed;
            decrement(handle).unwrap();
        }
        assert_eq!(VALUE.load(Ordering::Relaxed), 0xfeed);
    }

    #[test]
    fn over_release_is_inert() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        unsafe fn count_drop(_: RawHandle) {
            DROPS.fetch_add(1, Ordering::Relaxed);
        }

        let handle = alloc(4, Some(count_drop), Variant::Unlocked).unwrap();
        unsafe {
            assert_eq!(adjust(handle, -2), Err(Error::InvalidObject));
            assert_eq!(ref_count(handle), Ok(-1));
            assert_eq!(DROPS.load(Ordering::Relaxed), 0);

            // Restore the count so the block is released.
            assert_eq!(adjust(handle, 2), Ok(-1));
            assert_eq!(decrement(handle), Ok(1));
        }
        assert_eq!(DROPS.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn guarded_increment_stops_at_ceiling() {
        let handle = alloc(4, None, Variant::Unlocked).unwrap();
        unsafe {
            assert_eq!(try_increment(handle, 3), Ok(1));
            assert_eq!(try_increment(handle, 3), Ok(2));
            assert_eq!(try_increment(handle, 3), Err(Error::RefCountOverflow));
            assert_eq!(ref_count(handle), Ok(3));

            assert_eq!(adjust(handle, -2), Ok(3));
            assert_eq!(decrement(handle), Ok(1));
        }
    }

    #[test]
    fn cleanup_tolerates_none() {
        unsafe {
            cleanup(None);
        }

        let handle = alloc(4, None, Variant::SharedLock).unwrap();
        unsafe {
            increment(handle).unwrap();
            cleanup(Some(handle));
            assert_eq!(ref_count(handle), Ok(1));
            cleanup(Some(handle));
        }
    }
}

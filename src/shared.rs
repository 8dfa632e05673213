use crate::block::PAYLOAD_ALIGN;
use crate::{lock, refcount, Error, RawHandle, Result, Variant};

use core::fmt;
use core::marker::PhantomData;
use core::mem::{self, ManuallyDrop};
use core::ops::{Deref, DerefMut};

use parking_lot::lock_api::GuardNoSend;

/// A reference-counted, typed object.
///
/// `Shared<T>` stores its value in a block allocated by [`alloc`], so the
/// count, the value and (for locking variants) the lock share one
/// allocation. Cloning takes a reference; dropping releases one, and the
/// last release drops the value.
///
/// The value is only reached through guards. [`read`] is always available;
/// [`write`] needs an embedded lock, since an [`Unlocked`] object has
/// nothing to keep writers apart.
///
/// # Examples
/// ```
/// use refblock::{Shared, Variant};
///
/// let shared = Shared::new(vec![1, 2, 3], Variant::Locked).unwrap();
/// let copy = shared.clone();
/// copy.write().unwrap().push(4);
///
/// assert_eq!(shared.read().unwrap().len(), 4);
/// assert_eq!(shared.ref_count(), 2);
/// ```
///
/// [`alloc`]: crate::alloc
/// [`read`]: Shared::read
/// [`write`]: Shared::write
/// [`Unlocked`]: Variant::Unlocked
pub struct Shared<T> {
    handle: RawHandle,
    variant: Variant,
    phantom: PhantomData<T>,
}

unsafe impl<T: Send + Sync> Send for Shared<T> {}
unsafe impl<T: Send + Sync> Sync for Shared<T> {}

unsafe fn drop_payload<T>(handle: RawHandle) {
    (handle.as_ptr() as *mut T).drop_in_place();
}

impl<T> Shared<T> {
    /// Moves `value` into a new object with a reference count of one.
    ///
    /// Fails with [`Error::AllocationFailure`] if memory is exhausted or `T`
    /// needs stricter alignment than a payload provides.
    pub fn new(value: T, variant: Variant) -> Result<Shared<T>> {
        if mem::align_of::<T>() > PAYLOAD_ALIGN {
            return Err(Error::AllocationFailure);
        }

        let handle = crate::alloc(mem::size_of::<T>(), Some(drop_payload::<T>), variant)?;
        unsafe {
            (handle.as_ptr() as *mut T).write(value);
        }

        Ok(Shared {
            handle,
            variant,
            phantom: PhantomData,
        })
    }

    /// The variant this object was allocated with.
    pub fn variant(&self) -> Variant {
        self.variant
    }

    /// Current reference count. Racy under concurrent clones and drops.
    pub fn ref_count(&self) -> i32 {
        unsafe { refcount::ref_count(self.handle) }.unwrap_or(0)
    }

    /// Locks the object for reading.
    ///
    /// On a [`Variant::SharedLock`] object readers run concurrently; a
    /// [`Variant::Locked`] object admits one holder at a time; an unlocked
    /// object takes no lock at all.
    pub fn read(&self) -> Result<ReadGuard<'_, T>> {
        unsafe { lock::read_lock(self.handle)? };
        Ok(ReadGuard {
            shared: self,
            marker: PhantomData,
        })
    }

    /// Like [`read`](Shared::read), but fails with [`Error::Busy`] instead of
    /// blocking.
    pub fn try_read(&self) -> Result<ReadGuard<'_, T>> {
        unsafe { lock::try_read_lock(self.handle)? };
        Ok(ReadGuard {
            shared: self,
            marker: PhantomData,
        })
    }

    /// Locks the object for writing. Fails with [`Error::Unsynchronized`] on
    /// an unlocked object.
    pub fn write(&self) -> Result<WriteGuard<'_, T>> {
        if !self.variant.has_lock() {
            return Err(Error::Unsynchronized);
        }
        unsafe { lock::lock(self.handle)? };
        Ok(WriteGuard {
            shared: self,
            marker: PhantomData,
        })
    }

    /// Like [`write`](Shared::write), but fails with [`Error::Busy`] instead
    /// of blocking.
    pub fn try_write(&self) -> Result<WriteGuard<'_, T>> {
        if !self.variant.has_lock() {
            return Err(Error::Unsynchronized);
        }
        unsafe { lock::try_lock(self.handle)? };
        Ok(WriteGuard {
            shared: self,
            marker: PhantomData,
        })
    }

    /// The handle of the underlying object. The handle does not hold a
    /// reference of its own.
    pub fn as_raw(&self) -> RawHandle {
        self.handle
    }

    /// Gives up ownership of this reference without releasing it.
    pub fn into_raw(self) -> RawHandle {
        let this = ManuallyDrop::new(self);
        this.handle
    }

    /// Takes ownership of one reference to an object created by
    /// [`Shared::new`].
    ///
    /// # Safety
    /// `handle` must come from [`Shared::into_raw`] (or be a reference taken
    /// on such an object with [`increment`](crate::increment)) for the same
    /// `T`, and that reference must not be released elsewhere.
    pub unsafe fn from_raw(handle: RawHandle) -> Result<Shared<T>> {
        let variant = lock::variant(handle)?;
        Ok(Shared {
            handle,
            variant,
            phantom: PhantomData,
        })
    }

    /// Takes another reference, failing with [`Error::RefCountOverflow`]
    /// instead of letting the count grow without bound.
    pub fn try_clone(&self) -> Result<Shared<T>> {
        unsafe { refcount::try_increment(self.handle, refcount::MAX_REFCOUNT)? };

        Ok(Shared {
            handle: self.handle,
            variant: self.variant,
            phantom: PhantomData,
        })
    }

    fn payload(&self) -> *mut T {
        self.handle.as_ptr() as *mut T
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        // A leaked clone loop must not wrap the count and free a live value.
        match self.try_clone() {
            Ok(shared) => shared,
            Err(_) => std::process::abort(),
        }
    }
}

impl<T> Drop for Shared<T> {
    fn drop(&mut self) {
        let result = unsafe { refcount::decrement(self.handle) };
        debug_assert!(result.is_ok());
    }
}

impl<T> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shared")
            .field("handle", &self.handle)
            .field("variant", &self.variant)
            .finish()
    }
}

/// Shared access to a [`Shared`] value; released on drop.
///
/// The embedded lock must be released by the thread that took it, so guards
/// cannot be sent to another thread.
pub struct ReadGuard<'a, T> {
    shared: &'a Shared<T>,
    marker: PhantomData<GuardNoSend>,
}

unsafe impl<T: Sync> Sync for ReadGuard<'_, T> {}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.shared.payload() }
    }
}

impl<T> Drop for ReadGuard<'_, T> {
    fn drop(&mut self) {
        let result = unsafe { lock::read_unlock(self.shared.handle) };
        debug_assert!(result.is_ok());
    }
}

/// Exclusive access to a [`Shared`] value; released on drop.
pub struct WriteGuard<'a, T> {
    shared: &'a Shared<T>,
    marker: PhantomData<GuardNoSend>,
}

unsafe impl<T: Sync> Sync for WriteGuard<'_, T> {}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.shared.payload() }
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.shared.payload() }
    }
}

impl<T> Drop for WriteGuard<'_, T> {
    fn drop(&mut self) {
        let result = unsafe { lock::unlock(self.shared.handle) };
        debug_assert!(result.is_ok());
    }
}

#[test]
fn test() {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Test(Arc<AtomicUsize>);

    impl Drop for Test {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::Relaxed);
        }
    }

    let counter = Arc::new(AtomicUsize::new(0));

    let shared = Shared::new(Test(counter.clone()), Variant::Unlocked).unwrap();
    let mut copies = Vec::new();
    for _ in 0..10 {
        copies.push(shared.clone());
    }

    assert_eq!(shared.ref_count(), 11);
    assert_eq!(counter.load(Ordering::Relaxed), 0);

    core::mem::drop(shared);
    assert_eq!(counter.load(Ordering::Relaxed), 0);
    core::mem::drop(copies);

    assert_eq!(counter.load(Ordering::Relaxed), 1);
}

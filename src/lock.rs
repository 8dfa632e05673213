#![allow(clippy::missing_safety_doc)]

use parking_lot::lock_api::{RawMutex as _, RawRwLock as _};

use crate::block::{EmbeddedLock, Variant};
use crate::header::{resolve_live, RawHandle};
use crate::{Error, Result};

// The embedded lock guards the payload only. The reference counter never
// takes it, so release it before dropping what may be the last reference.

/// Acquires the object's lock exclusively, blocking until it is available.
///
/// On a [`Variant::Unlocked`] object this returns immediately.
///
/// # Safety
/// Every function in this module has the requirements of
/// [`adjust`](crate::adjust). The unlocking functions must also be called
/// from the context that acquired the lock.
pub unsafe fn lock(handle: RawHandle) -> Result<()> {
    let object = resolve_live(handle)?;
    match object.embedded_lock() {
        EmbeddedLock::Mutex(mutex) => mutex.lock(),
        EmbeddedLock::RwLock(rwlock) => rwlock.lock_exclusive(),
        EmbeddedLock::None => {}
    }
    Ok(())
}

/// Attempts to acquire the object's lock exclusively without blocking.
/// Returns [`Error::Busy`] if it is held.
pub unsafe fn try_lock(handle: RawHandle) -> Result<()> {
    let object = resolve_live(handle)?;
    let acquired = match object.embedded_lock() {
        EmbeddedLock::Mutex(mutex) => mutex.try_lock(),
        EmbeddedLock::RwLock(rwlock) => rwlock.try_lock_exclusive(),
        EmbeddedLock::None => true,
    };
    if acquired {
        Ok(())
    } else {
        Err(Error::Busy)
    }
}

/// Releases an exclusive hold taken by this thread. Returns
/// [`Error::NotLocked`] if the lock is not held exclusively.
pub unsafe fn unlock(handle: RawHandle) -> Result<()> {
    let object = resolve_live(handle)?;
    match object.embedded_lock() {
        EmbeddedLock::Mutex(mutex) => {
            if !mutex.is_locked() {
                return Err(Error::NotLocked);
            }
            mutex.unlock();
        }
        EmbeddedLock::RwLock(rwlock) => {
            if !rwlock.is_locked_exclusive() {
                return Err(Error::NotLocked);
            }
            rwlock.unlock_exclusive();
        }
        EmbeddedLock::None => {}
    }
    Ok(())
}

/// Shared-mode [`lock`]. Only [`Variant::SharedLock`] objects admit several
/// holders at once; a locked object takes its mutex.
pub unsafe fn read_lock(handle: RawHandle) -> Result<()> {
    let object = resolve_live(handle)?;
    match object.embedded_lock() {
        EmbeddedLock::Mutex(mutex) => mutex.lock(),
        EmbeddedLock::RwLock(rwlock) => rwlock.lock_shared(),
        EmbeddedLock::None => {}
    }
    Ok(())
}

pub unsafe fn try_read_lock(handle: RawHandle) -> Result<()> {
    let object = resolve_live(handle)?;
    let acquired = match object.embedded_lock() {
        EmbeddedLock::Mutex(mutex) => mutex.try_lock(),
        EmbeddedLock::RwLock(rwlock) => rwlock.try_lock_shared(),
        EmbeddedLock::None => true,
    };
    if acquired {
        Ok(())
    } else {
        Err(Error::Busy)
    }
}

/// Releases a shared hold taken by this thread. Returns
/// [`Error::NotLocked`] if the lock is not held in shared mode.
pub unsafe fn read_unlock(handle: RawHandle) -> Result<()> {
    let object = resolve_live(handle)?;
    match object.embedded_lock() {
        EmbeddedLock::Mutex(mutex) => {
            if !mutex.is_locked() {
                return Err(Error::NotLocked);
            }
            mutex.unlock();
        }
        EmbeddedLock::RwLock(rwlock) => {
            if !rwlock.is_locked() || rwlock.is_locked_exclusive() {
                return Err(Error::NotLocked);
            }
            rwlock.unlock_shared();
        }
        EmbeddedLock::None => {}
    }
    Ok(())
}

/// Reports the variant the object was allocated with.
pub unsafe fn variant(handle: RawHandle) -> Result<Variant> {
    resolve_live(handle).map(|object| object.variant())
}

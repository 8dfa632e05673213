//! C ABI for the raw object facility.
//!
//! Handles cross the boundary as `void *` payload pointers. Status codes
//! follow the pthread convention: `0` on success, [`REFBLOCK_EBUSY`] when a
//! try-lock finds the lock held, and `-1` for every other failure.
//!
//! Every pointer argument must be null or meet the requirements of
//! [`adjust`](crate::adjust); a lock must be released by the thread that
//! took it.

#![allow(clippy::missing_safety_doc)]

use core::ffi::c_void;
use core::ptr;
use std::os::raw::{c_int, c_uint};

use crate::block::alloc_block;
use crate::header::{Finalizer, RawHandle};
use crate::{lock, refcount, Error, Result, Variant};

pub use crate::header::ForeignDestructor;

/// Returned by [`refblock_trylock`] when the lock is held elsewhere.
pub const REFBLOCK_EBUSY: c_int = 16;

fn handle(obj: *mut c_void) -> Option<RawHandle> {
    RawHandle::from_ptr(obj as *mut u8)
}

fn status(result: Result<()>) -> c_int {
    match result {
        Ok(()) => 0,
        Err(Error::Busy) => REFBLOCK_EBUSY,
        Err(_) => -1,
    }
}

/// Allocates an object with a zeroed payload of `size` bytes and returns the
/// payload, or null on failure. `options` selects the variant: `0` locked,
/// `1` shared-lock, `2` unlocked.
#[no_mangle]
pub extern "C" fn refblock_alloc(
    size: usize,
    destructor: Option<ForeignDestructor>,
    options: c_uint,
) -> *mut c_void {
    let variant = match Variant::from_options(options) {
        Some(variant) => variant,
        None => return ptr::null_mut(),
    };

    match alloc_block(size, destructor.map(Finalizer::Foreign), variant) {
        Ok(handle) => handle.as_ptr() as *mut c_void,
        Err(_) => ptr::null_mut(),
    }
}

/// Adds `delta` to the reference count. Returns the previous count, or `-1`
/// if `obj` is not a live object or the count went below zero.
#[no_mangle]
pub unsafe extern "C" fn refblock_ref(obj: *mut c_void, delta: c_int) -> c_int {
    match handle(obj) {
        Some(handle) => refcount::adjust(handle, delta).unwrap_or(-1),
        None => -1,
    }
}

/// Releases one reference; null is ignored.
#[no_mangle]
pub unsafe extern "C" fn refblock_cleanup(obj: *mut c_void) {
    refcount::cleanup(handle(obj));
}

#[no_mangle]
pub unsafe extern "C" fn refblock_lock(obj: *mut c_void) -> c_int {
    match handle(obj) {
        Some(handle) => status(lock::lock(handle)),
        None => -1,
    }
}

#[no_mangle]
pub unsafe extern "C" fn refblock_unlock(obj: *mut c_void) -> c_int {
    match handle(obj) {
        Some(handle) => status(lock::unlock(handle)),
        None => -1,
    }
}

#[no_mangle]
pub unsafe extern "C" fn refblock_trylock(obj: *mut c_void) -> c_int {
    match handle(obj) {
        Some(handle) => status(lock::try_lock(handle)),
        None => -1,
    }
}

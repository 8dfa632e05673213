//! Reference-counted heap blocks with an optional embedded lock.
//!
//! Each object is one allocation holding, in order, an optional lock, a
//! private header and the caller's payload. The caller receives a
//! [`RawHandle`] pointing at the payload. The header keeps a destructor, an
//! atomic reference count starting at one, the object's [`Variant`] and a
//! validity tag, which every operation checks before doing anything else.
//!
//! When a release brings the count to zero, the destructor runs on the
//! releasing thread, the tag is cleared and the block is freed, all before
//! the release returns. Nothing is deferred and cycles are never collected.
//!
//! [`Shared`] wraps the raw facility in a safe, typed smart pointer.
//!
//! # Examples
//! ```
//! use refblock::{alloc, decrement, increment, lock, unlock, RawHandle, Variant};
//! use std::sync::atomic::{AtomicBool, Ordering};
//!
//! static DESTROYED: AtomicBool = AtomicBool::new(false);
//!
//! unsafe fn on_destroy(_: RawHandle) {
//!     DESTROYED.store(true, Ordering::Relaxed);
//! }
//!
//! let handle = alloc(16, Some(on_destroy), Variant::Locked).unwrap();
//! unsafe {
//!     assert_eq!(increment(handle), Ok(1));
//!
//!     lock(handle).unwrap();
//!     *(handle.as_ptr() as *mut u64) = 100;
//!     unlock(handle).unwrap();
//!
//!     assert_eq!(decrement(handle), Ok(2));
//!     assert!(!DESTROYED.load(Ordering::Relaxed));
//!     assert_eq!(decrement(handle), Ok(1));
//! }
//! assert!(DESTROYED.load(Ordering::Relaxed));
//! ```

mod block;
mod error;
mod header;
mod lock;
mod refcount;
mod shared;

#[cfg(feature = "ffi")]
pub mod ffi;

pub use block::{alloc, alloc_with_options, Variant, PAYLOAD_ALIGN, VARIANT_MASK};
pub use error::{Error, Result};
pub use header::{Destructor, RawHandle};
pub use lock::{lock, read_lock, read_unlock, try_lock, try_read_lock, unlock, variant};
pub use refcount::{adjust, cleanup, decrement, increment, ref_count};
pub use shared::{ReadGuard, Shared, WriteGuard};

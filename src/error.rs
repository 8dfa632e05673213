use thiserror::Error;

/// Errors reported by every operation in this crate.
///
/// All failures are returned synchronously; nothing is retried internally.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Error {
    /// The handle does not point at a live object: it is foreign, already
    /// destroyed, or the count was released more times than it was taken.
    #[error("handle does not refer to a live object")]
    InvalidObject,

    /// Memory could not be obtained, the block size overflowed, or the
    /// requested variant has no storage layout.
    #[error("object allocation failed")]
    AllocationFailure,

    /// A non-blocking lock attempt found the lock held.
    #[error("lock is held elsewhere")]
    Busy,

    /// An unlock was issued for a lock not held in that mode.
    #[error("lock is not held")]
    NotLocked,

    /// Exclusive access was requested on an object without an embedded lock.
    #[error("object has no embedded lock")]
    Unsynchronized,

    /// Taking another reference would push the count past its ceiling.
    #[error("reference count limit reached")]
    RefCountOverflow,
}

/// Shorthand for results carrying [`Error`].
pub type Result<T> = core::result::Result<T, Error>;

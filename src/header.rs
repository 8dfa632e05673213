use core::fmt;
use core::ptr::{self, NonNull};
use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use tracing::debug;

use crate::block::{Variant, PAYLOAD_ALIGN};
use crate::{Error, Result};

/// Bit pattern stored in the header of every live object.
pub(crate) const MAGIC: u32 = 0x0a70_b123;

/// Callback run exactly once, with the object's handle, when its reference
/// count reaches zero. The payload is still fully valid while it runs.
pub type Destructor = unsafe fn(RawHandle);

/// C-ABI destructor, used by the `ffi` entry points.
#[cfg(feature = "ffi")]
pub type ForeignDestructor = unsafe extern "C" fn(*mut core::ffi::c_void);

#[derive(Clone, Copy)]
pub(crate) enum Finalizer {
    Rust(Destructor),
    #[cfg(feature = "ffi")]
    Foreign(ForeignDestructor),
}

impl Finalizer {
    pub(crate) unsafe fn run(self, handle: RawHandle) {
        match self {
            Finalizer::Rust(destructor) => destructor(handle),
            #[cfg(feature = "ffi")]
            Finalizer::Foreign(destructor) => destructor(handle.as_ptr() as *mut core::ffi::c_void),
        }
    }
}

/// Address of an object's payload.
///
/// `RawHandle` is what [`alloc`] returns and what every other raw operation
/// takes. It is a plain address: copying it does not take a reference, and
/// it may outlive the object it points at. Operations on a handle first
/// check the object's header, so a handle to a destroyed object, or to memory
/// this crate never allocated, is reported as [`Error::InvalidObject`] rather
/// than acted upon.
///
/// [`alloc`]: crate::alloc
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RawHandle {
    ptr: NonNull<u8>,
}

unsafe impl Send for RawHandle {}
unsafe impl Sync for RawHandle {}

impl RawHandle {
    pub(crate) fn new(ptr: NonNull<u8>) -> RawHandle {
        RawHandle { ptr }
    }

    /// Wraps an arbitrary address. Returns `None` for a null pointer.
    ///
    /// The result is not checked here; it is checked by each operation it is
    /// passed to.
    pub fn from_ptr(ptr: *mut u8) -> Option<RawHandle> {
        NonNull::new(ptr).map(RawHandle::new)
    }

    /// Returns the payload address.
    pub fn as_ptr(self) -> *mut u8 {
        self.ptr.as_ptr()
    }
}

impl fmt::Debug for RawHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RawHandle").field(&self.ptr).finish()
    }
}

/// Metadata stored immediately before every payload.
#[repr(C, align(16))]
pub(crate) struct Header {
    pub(crate) destructor: Option<Finalizer>,
    pub(crate) size: usize,
    pub(crate) count: AtomicI32,
    pub(crate) magic: AtomicU32,
    pub(crate) variant: u8,
}

/// Distance from a header to its payload. Identical for every variant.
pub(crate) const HEADER_SIZE: usize = core::mem::size_of::<Header>();

/// A resolved, live object.
///
/// Holding an `Object` proves nothing beyond the moment it was resolved;
/// it must not be kept across public calls.
#[derive(Clone, Copy)]
pub(crate) struct Object {
    header: NonNull<Header>,
    variant: Variant,
}

impl Object {
    pub(crate) fn header(&self) -> &Header {
        unsafe { self.header.as_ref() }
    }

    pub(crate) fn variant(&self) -> Variant {
        self.variant
    }

    /// Start of the block: the lock prefix if there is one, else the header.
    pub(crate) fn base(&self) -> *mut u8 {
        unsafe { (self.header.as_ptr() as *mut u8).sub(self.variant.prefix_size()) }
    }
}

/// Recovers the header behind `handle` and checks that it belongs to a live
/// object.
///
/// # Safety
/// The `HEADER_SIZE` bytes preceding `handle` must be readable.
pub(crate) unsafe fn resolve(handle: RawHandle) -> Option<Object> {
    let addr = handle.as_ptr() as usize;
    if addr % PAYLOAD_ALIGN != 0 || addr < HEADER_SIZE {
        return None;
    }

    let header = handle.as_ptr().sub(HEADER_SIZE) as *mut Header;
    let magic = &*ptr::addr_of!((*header).magic);
    if magic.load(Ordering::Relaxed) != MAGIC {
        return None;
    }

    let variant = Variant::from_tag(ptr::read(ptr::addr_of!((*header).variant)))?;
    Some(Object {
        header: NonNull::new_unchecked(header),
        variant,
    })
}

/// [`resolve`], reporting a failed lookup as [`Error::InvalidObject`].
pub(crate) unsafe fn resolve_live(handle: RawHandle) -> Result<Object> {
    match resolve(handle) {
        Some(object) => Ok(object),
        None => {
            debug!(handle = ?handle.as_ptr(), "rejected handle without a live header");
            Err(Error::InvalidObject)
        }
    }
}

use core::alloc::Layout;
use core::mem;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicI32, AtomicU32};

use parking_lot::lock_api::{RawMutex as _, RawRwLock as _};
use parking_lot::{RawMutex, RawRwLock};
use tracing::{trace, warn};

use crate::header::{Finalizer, Header, Object, RawHandle, HEADER_SIZE, MAGIC};
use crate::{Destructor, Error, Result};

/// Alignment of every payload, matching what `malloc` guarantees.
pub const PAYLOAD_ALIGN: usize = 16;

/// Bits of an option word that select the [`Variant`].
pub const VARIANT_MASK: u32 = 0b11;

/// Storage and locking strategy of an object, fixed at allocation.
///
/// Each variant owns the region in front of the header: its size, how it is
/// constructed and how it is torn down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Variant {
    /// A mutex is embedded in front of the header.
    Locked = 0,
    /// A reader-writer lock is embedded in front of the header.
    SharedLock = 1,
    /// No lock; lock operations succeed without doing anything.
    Unlocked = 2,
}

impl Default for Variant {
    fn default() -> Variant {
        Variant::Locked
    }
}

#[repr(C, align(16))]
struct Slot<L>(L);

fn slot_size<L>() -> usize {
    mem::size_of::<Slot<L>>()
}

impl Variant {
    /// Decodes the variant from an option word. Only the bits in
    /// [`VARIANT_MASK`] are considered; a masked value with no storage layout
    /// yields `None`.
    ///
    /// # Examples
    /// ```
    /// use refblock::Variant;
    ///
    /// assert_eq!(Variant::from_options(0), Some(Variant::Locked));
    /// assert_eq!(Variant::from_options(0b110), Some(Variant::Unlocked));
    /// assert_eq!(Variant::from_options(3), None);
    /// ```
    pub fn from_options(options: u32) -> Option<Variant> {
        Variant::from_tag((options & VARIANT_MASK) as u8)
    }

    pub(crate) fn from_tag(tag: u8) -> Option<Variant> {
        match tag {
            0 => Some(Variant::Locked),
            1 => Some(Variant::SharedLock),
            2 => Some(Variant::Unlocked),
            _ => None,
        }
    }

    pub(crate) fn tag(self) -> u8 {
        self as u8
    }

    /// Whether objects of this variant carry an embedded lock.
    pub fn has_lock(self) -> bool {
        self != Variant::Unlocked
    }

    pub(crate) fn prefix_size(self) -> usize {
        match self {
            Variant::Locked => slot_size::<RawMutex>(),
            Variant::SharedLock => slot_size::<RawRwLock>(),
            Variant::Unlocked => 0,
        }
    }

    unsafe fn init_prefix(self, base: *mut u8) {
        match self {
            Variant::Locked => (base as *mut RawMutex).write(RawMutex::INIT),
            Variant::SharedLock => (base as *mut RawRwLock).write(RawRwLock::INIT),
            Variant::Unlocked => {}
        }
    }

    unsafe fn drop_prefix(self, base: *mut u8) {
        match self {
            Variant::Locked => (base as *mut RawMutex).drop_in_place(),
            Variant::SharedLock => (base as *mut RawRwLock).drop_in_place(),
            Variant::Unlocked => {}
        }
    }
}

/// The lock stored in an object's prefix.
pub(crate) enum EmbeddedLock<'a> {
    Mutex(&'a RawMutex),
    RwLock(&'a RawRwLock),
    None,
}

impl Object {
    pub(crate) fn embedded_lock(&self) -> EmbeddedLock<'_> {
        let base = self.base();
        unsafe {
            match self.variant() {
                Variant::Locked => EmbeddedLock::Mutex(&*(base as *const RawMutex)),
                Variant::SharedLock => EmbeddedLock::RwLock(&*(base as *const RawRwLock)),
                Variant::Unlocked => EmbeddedLock::None,
            }
        }
    }
}

pub(crate) fn block_layout(variant: Variant, size: usize) -> Option<Layout> {
    let total = variant
        .prefix_size()
        .checked_add(HEADER_SIZE)?
        .checked_add(size)?;
    Layout::from_size_align(total, PAYLOAD_ALIGN).ok()
}

/// Allocates a zeroed payload of `size` bytes with a reference count of one.
///
/// The caller owns the first reference. `destructor`, if any, runs when the
/// count later reaches zero.
///
/// # Examples
/// ```
/// use refblock::{alloc, decrement, ref_count, Variant};
///
/// let handle = alloc(16, None, Variant::Locked).unwrap();
/// unsafe {
///     assert_eq!(ref_count(handle), Ok(1));
///     assert_eq!(*handle.as_ptr(), 0);
///     assert_eq!(decrement(handle), Ok(1));
/// }
/// ```
pub fn alloc(size: usize, destructor: Option<Destructor>, variant: Variant) -> Result<RawHandle> {
    alloc_block(size, destructor.map(Finalizer::Rust), variant)
}

/// [`alloc`] with the variant taken from an option word (see
/// [`Variant::from_options`]). Undefined variants fail with
/// [`Error::AllocationFailure`].
pub fn alloc_with_options(
    size: usize,
    destructor: Option<Destructor>,
    options: u32,
) -> Result<RawHandle> {
    match Variant::from_options(options) {
        Some(variant) => alloc(size, destructor, variant),
        None => {
            warn!(options, "no storage layout for requested variant");
            Err(Error::AllocationFailure)
        }
    }
}

pub(crate) fn alloc_block(
    size: usize,
    destructor: Option<Finalizer>,
    variant: Variant,
) -> Result<RawHandle> {
    let layout = match block_layout(variant, size) {
        Some(layout) => layout,
        None => {
            warn!(size, ?variant, "object size overflows a block layout");
            return Err(Error::AllocationFailure);
        }
    };

    unsafe {
        let base = match NonNull::new(std::alloc::alloc_zeroed(layout)) {
            Some(base) => base.as_ptr(),
            None => {
                warn!(size, ?variant, "out of memory allocating object");
                return Err(Error::AllocationFailure);
            }
        };

        variant.init_prefix(base);

        let header = base.add(variant.prefix_size()) as *mut Header;
        header.write(Header {
            destructor,
            size,
            count: AtomicI32::new(1),
            magic: AtomicU32::new(MAGIC),
            variant: variant.tag(),
        });

        let payload = (header as *mut u8).add(HEADER_SIZE);
        trace!(payload = ?payload, size, ?variant, "allocated object");
        Ok(RawHandle::new(NonNull::new_unchecked(payload)))
    }
}

/// Tears down the lock prefix and returns the block to the allocator.
///
/// # Safety
/// `object` must have been resolved from a live handle whose count has just
/// reached zero, and its header must already be marked dead.
pub(crate) unsafe fn free_block(object: Object) {
    let variant = object.variant();
    let size = object.header().size;
    let base = object.base();

    variant.drop_prefix(base);
    let layout = Layout::from_size_align_unchecked(
        variant.prefix_size() + HEADER_SIZE + size,
        PAYLOAD_ALIGN,
    );
    std::alloc::dealloc(base, layout);
    trace!(base = ?base, size, ?variant, "released object");
}

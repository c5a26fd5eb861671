//! Caller-supplied memory resources
//!
//! All payload bytes moving through the stack are allocated from one of four
//! caller-supplied categories and released through the same resource they came from.
//! A buffer carries a handle to its originating resource, so ownership can cross
//! component and crate boundaries and still be released correctly from anywhere,
//! including mid-failure unwinding paths.
//!
//! Categories (any of which may alias `general`):
//! * `general`: scratch allocations, e.g. flattening scattered TX payloads
//! * `session`: per-port reassembly storage, bounded by the port extent
//! * `fragment`: queued TX datagrams
//! * `payload`: received datagrams, allocated by the media driver

use alloc::alloc::{alloc_zeroed, dealloc};
use alloc::rc::Rc;
use core::alloc::Layout;
use core::ptr::NonNull;

use crate::error::MemoryError;

/// A caller-supplied allocator.
///
/// Returned memory must be zero-initialized; [`MemoryBuffer`] exposes it as an
/// initialized byte slice immediately.
pub trait MemoryResource {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must originate from a prior `allocate` on the same resource with the
    /// same `layout`, and must not be released twice.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);
}

/// The default resource, backed by the global allocator.
#[derive(Debug, Default)]
pub struct HeapMemory;

impl MemoryResource for HeapMemory {
    fn allocate(&self, layout: Layout) -> Option<NonNull<u8>> {
        NonNull::new(unsafe { alloc_zeroed(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { dealloc(ptr.as_ptr(), layout) };
    }
}

/// The four allocation categories of a transport.
#[derive(Clone)]
pub struct MemoryResources {
    pub general: Rc<dyn MemoryResource>,
    pub session: Rc<dyn MemoryResource>,
    pub fragment: Rc<dyn MemoryResource>,
    pub payload: Rc<dyn MemoryResource>,
}

impl MemoryResources {
    /// Aliases every category to the one given resource.
    pub fn all_general(general: Rc<dyn MemoryResource>) -> Self {
        Self {
            session: general.clone(),
            fragment: general.clone(),
            payload: general.clone(),
            general,
        }
    }
}

impl Default for MemoryResources {
    fn default() -> Self {
        Self::all_general(Rc::new(HeapMemory))
    }
}

/// An owned byte buffer bundled with its deleter.
///
/// The buffer starts zero-initialized at its full capacity; `truncate` narrows the
/// visible slice without releasing storage. Dropping the buffer returns the storage
/// to the resource it was allocated from. Destruction never allocates.
pub struct MemoryBuffer {
    ptr: NonNull<u8>,
    len: usize,
    capacity: usize,
    resource: Rc<dyn MemoryResource>,
}

impl MemoryBuffer {
    /// Allocates a zero-initialized buffer of `len` bytes from `resource`.
    pub fn allocate(resource: &Rc<dyn MemoryResource>, len: usize) -> Result<Self, MemoryError> {
        let layout = Self::layout(len).ok_or(MemoryError)?;
        let ptr = resource.allocate(layout).ok_or(MemoryError)?;
        Ok(Self {
            ptr,
            len,
            capacity: len,
            resource: resource.clone(),
        })
    }

    /// Allocates a buffer holding a copy of `bytes`.
    pub fn from_slice(
        resource: &Rc<dyn MemoryResource>,
        bytes: &[u8],
    ) -> Result<Self, MemoryError> {
        let mut buffer = Self::allocate(resource, bytes.len())?;
        buffer.copy_from_slice(bytes);
        Ok(buffer)
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Narrows the visible slice. A `len` beyond the current length is ignored.
    pub fn truncate(&mut self, len: usize) {
        if len < self.len {
            self.len = len;
        }
    }

    /// Restores the visible slice up to `len`, bounded by capacity.
    ///
    /// Every byte up to capacity is initialized (zeroed at allocation or written
    /// since), so widening is safe.
    pub fn resize_within_capacity(&mut self, len: usize) {
        self.len = len.min(self.capacity);
    }

    // Zero-size layouts are routed around the resource: allocators are not required
    // to support them.
    fn layout(size: usize) -> Option<Layout> {
        Layout::from_size_align(size.max(1), 1).ok()
    }
}

impl core::ops::Deref for MemoryBuffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        unsafe { core::slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }
}

impl core::ops::DerefMut for MemoryBuffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        unsafe { core::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for MemoryBuffer {
    fn drop(&mut self) {
        let layout = unwrap!(Self::layout(self.capacity));
        unsafe { self.resource.deallocate(self.ptr, layout) };
    }
}

impl core::fmt::Debug for MemoryBuffer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MemoryBuffer")
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .finish()
    }
}

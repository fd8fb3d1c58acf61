//! A bump allocator over a fixed, caller-owned buffer.
//!
//! [`StackStorage<N>`] is `N` bytes that can live anywhere, including on the
//! stack. [`StackAllocator`] hands out aligned slices of it front to back and
//! never reuses memory: deallocation is a no-op, and the whole buffer is
//! reclaimed when the storage itself goes away. The borrow in
//! `StackAllocator<'s, N>` makes every [`Shared`][crate::Shared] built from
//! it a `Shared<'s, _>`, so no pointer can outlive the storage.
use core::{
    alloc::Layout,
    cell::{Cell, UnsafeCell},
    fmt,
    mem::MaybeUninit,
    ptr::{self, NonNull},
};

use crate::{allocator::Allocator, error::AllocError};

/// Backing memory for a [`StackAllocator`].
pub struct StackStorage<const N: usize> {
    buffer: UnsafeCell<[MaybeUninit<u8>; N]>,
    offset: Cell<usize>,
}

impl<const N: usize> StackStorage<N> {
    pub const fn new() -> Self {
        StackStorage {
            buffer: UnsafeCell::new([MaybeUninit::uninit(); N]),
            offset: Cell::new(0),
        }
    }

    /// Bytes handed out so far, including alignment padding.
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    pub fn remaining(&self) -> usize {
        N - self.offset.get()
    }

    pub const fn capacity(&self) -> usize {
        N
    }
}

impl<const N: usize> Default for StackStorage<N> {
    fn default() -> Self {
        StackStorage::new()
    }
}

impl<const N: usize> fmt::Debug for StackStorage<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackStorage")
            .field("capacity", &N)
            .field("used", &self.used())
            .finish()
    }
}

/// Allocates from a borrowed [`StackStorage`]. Copies share the storage.
pub struct StackAllocator<'s, const N: usize> {
    storage: &'s StackStorage<N>,
}

impl<'s, const N: usize> StackAllocator<'s, N> {
    pub fn new(storage: &'s StackStorage<N>) -> Self {
        StackAllocator { storage }
    }
}

impl<const N: usize> Clone for StackAllocator<'_, N> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<const N: usize> Copy for StackAllocator<'_, N> {}

/// Two allocators are equal when they draw from the same storage.
impl<const N: usize, const M: usize> PartialEq<StackAllocator<'_, M>> for StackAllocator<'_, N> {
    fn eq(&self, other: &StackAllocator<'_, M>) -> bool {
        ptr::eq(
            self.storage as *const StackStorage<N> as *const u8,
            other.storage as *const StackStorage<M> as *const u8,
        )
    }
}

impl<const N: usize> fmt::Debug for StackAllocator<'_, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StackAllocator").field(self.storage).finish()
    }
}

unsafe impl<const N: usize> Allocator for StackAllocator<'_, N> {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        let base = self.storage.buffer.get() as *mut u8;
        let offset = self.storage.offset.get();
        // Safety: offset <= N, so this stays within (or one past) the buffer
        let pad = unsafe { base.add(offset) }.align_offset(layout.align());
        let start = offset.checked_add(pad).ok_or(AllocError)?;
        let end = start.checked_add(layout.size()).ok_or(AllocError)?;
        if end > N {
            log::trace!(
                "stack storage exhausted: {} of {} bytes used, {} requested",
                offset,
                N,
                layout.size()
            );
            return Err(AllocError);
        }
        self.storage.offset.set(end);
        // Safety: start <= end <= N
        Ok(unsafe { NonNull::new_unchecked(base.add(start)) })
    }

    unsafe fn deallocate(&self, _ptr: NonNull<u8>, _layout: Layout) {}
}

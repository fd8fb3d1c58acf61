//! Allocation and destruction strategies a control block can be built with.
//!
//! An [`Allocator`] provides raw memory for a [`Layout`] and knows how to
//! construct and destroy values in memory it handed out. There is no separate
//! "rebind" step: [`Allocator::allocate_for`] derives the layout of whatever
//! type is being allocated, so one allocator value serves the control block
//! and the owned value alike.
//!
//! A [`Deleter`] is the callable that disposes of a value adopted from a raw
//! pointer. Any `FnOnce(NonNull<T>)` closure is a deleter.
use alloc::boxed::Box;
use core::{
    alloc::Layout,
    ptr::{self, NonNull},
};

use crate::error::AllocError;

/// Memory source for control blocks and co-located values.
///
/// # Safety
///
/// Memory returned by `allocate` must be valid for reads and writes of
/// `layout.size()` bytes, aligned to `layout.align()`, and must stay valid
/// until it is passed to `deallocate` on this allocator (or a copy of it).
pub unsafe trait Allocator {
    /// Allocates a block of memory described by `layout`.
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Returns memory obtained from [`allocate`][Allocator::allocate].
    ///
    /// # Safety
    ///
    /// `ptr` must have been returned by `allocate` on this allocator with the
    /// same `layout`, and must not have been deallocated already.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout);

    /// Moves `value` into the uninitialized slot at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for writes and properly aligned for `T`.
    unsafe fn construct<T>(&self, ptr: NonNull<T>, value: T) {
        unsafe { ptr.as_ptr().write(value) }
    }

    /// Runs the destructor of the value at `ptr` without freeing its memory.
    ///
    /// # Safety
    ///
    /// `ptr` must point to an initialized value that is not used again.
    unsafe fn destroy<T: ?Sized>(&self, ptr: NonNull<T>) {
        unsafe { ptr::drop_in_place(ptr.as_ptr()) }
    }

    /// Allocates uninitialized storage for one `U`.
    fn allocate_for<U>(&self) -> Result<NonNull<U>, AllocError> {
        self.allocate(Layout::new::<U>()).map(NonNull::cast)
    }

    /// Frees storage obtained from [`allocate_for`][Allocator::allocate_for].
    ///
    /// # Safety
    ///
    /// Same as [`deallocate`][Allocator::deallocate], with the layout of `U`.
    unsafe fn deallocate_for<U>(&self, ptr: NonNull<U>) {
        unsafe { self.deallocate(ptr.cast(), Layout::new::<U>()) }
    }
}

unsafe impl<A: Allocator + ?Sized> Allocator for &A {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        (**self).allocate(layout)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        unsafe { (**self).deallocate(ptr, layout) }
    }

    unsafe fn construct<T>(&self, ptr: NonNull<T>, value: T) {
        unsafe { (**self).construct(ptr, value) }
    }

    unsafe fn destroy<T: ?Sized>(&self, ptr: NonNull<T>) {
        unsafe { (**self).destroy(ptr) }
    }
}

/// The global Rust allocator. This is what [`SharedPtr::new`] and the raw
/// pointer constructors use when no allocator is given.
///
/// [`SharedPtr::new`]: crate::SharedPtr::new
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Global;

unsafe impl Allocator for Global {
    fn allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        if layout.size() == 0 {
            // Zero-sized requests get a well-aligned dangling address.
            return NonNull::new(layout.align() as *mut u8).ok_or(AllocError);
        }
        // Safety: layout has non-zero size
        NonNull::new(unsafe { alloc::alloc::alloc(layout) }).ok_or(AllocError)
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
        if layout.size() != 0 {
            unsafe { alloc::alloc::dealloc(ptr.as_ptr(), layout) }
        }
    }
}

/// Disposes of a value that a [`SharedPtr`][crate::SharedPtr] adopted from a
/// raw pointer. Called exactly once, when the last owner goes away.
pub trait Deleter<T: ?Sized> {
    /// # Safety
    ///
    /// `ptr` must be the pointer this deleter was paired with when ownership
    /// was adopted, and it must not be used afterwards.
    unsafe fn delete(self, ptr: NonNull<T>);
}

impl<T: ?Sized, F: FnOnce(NonNull<T>)> Deleter<T> for F {
    unsafe fn delete(self, ptr: NonNull<T>) {
        self(ptr)
    }
}

/// Deleter for pointers that came from [`Box::into_raw`]: rebuilds the box
/// and drops it.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DefaultDelete;

impl<T: ?Sized> Deleter<T> for DefaultDelete {
    unsafe fn delete(self, ptr: NonNull<T>) {
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

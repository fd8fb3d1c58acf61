//! Control blocks: the shared, type-erased bookkeeping behind every
//! [`Shared`][crate::Shared] and [`Weak`][crate::Weak].
//!
//! Every block starts with a [`Header`] holding the two counts and two
//! function pointers, so pointers only ever see `NonNull<Header>` and never
//! the concrete block type. Two concrete layouts exist:
//!
//! * [`SeparateBlock`] adopts a value that was allocated elsewhere, and owns
//!   the deleter that disposes of it plus the allocator the block itself came
//!   from.
//! * [`InlineBlock`] stores the value inside the block, so one allocation
//!   covers both.
use core::{
    cell::Cell,
    mem::{self, ManuallyDrop, MaybeUninit},
    ptr::{self, NonNull},
};

use crate::{
    allocator::{Allocator, Deleter},
    error::AllocError,
};

// Counts and destructors for one owned value. `destroy_value` and
// `release_block` each run exactly once; the count transitions below are what
// guarantee it.
pub(crate) struct Header {
    shared: Cell<usize>,
    weak: Cell<usize>,
    // Set while `decrease_shared` holds its own weak reference.
    pinned: Cell<bool>,
    destroy_value: unsafe fn(NonNull<Header>),
    release_block: unsafe fn(NonNull<Header>),
}

impl Header {
    fn new(
        destroy_value: unsafe fn(NonNull<Header>),
        release_block: unsafe fn(NonNull<Header>),
    ) -> Header {
        Header {
            shared: Cell::new(1),
            weak: Cell::new(0),
            pinned: Cell::new(false),
            destroy_value,
            release_block,
        }
    }

    pub(crate) fn shared_count(&self) -> usize {
        self.shared.get()
    }

    /// Live weak pointers, not counting the reference held internally while
    /// the value is being destroyed.
    pub(crate) fn weak_count(&self) -> usize {
        self.weak.get() - usize::from(self.pinned.get())
    }

    /// Only valid while some handle keeps the value alive.
    pub(crate) fn add_shared(&self) {
        debug_assert_ne!(self.shared.get(), 0, "revived an expired control block");
        self.shared.set(increment(self.shared.get()));
    }

    pub(crate) fn add_weak(&self) {
        self.weak.set(increment(self.weak.get()));
    }

    /// Drops one shared reference, destroying the value and possibly releasing
    /// the block when it was the last one.
    ///
    /// # Safety
    ///
    /// `this` must be a live block and the caller must own one of its shared
    /// references, which is consumed.
    pub(crate) unsafe fn decrease_shared(this: NonNull<Header>) {
        let h = unsafe { this.as_ref() };
        let n = h.shared.get() - 1;
        h.shared.set(n);
        if n != 0 {
            return;
        }

        // The value may own weak pointers into its own block (see
        // `EnableSharedFromThis`). Hold one weak reference across the
        // destructor so those can't release the block underneath us. The
        // guard also releases the block if the destructor unwinds.
        h.add_weak();
        h.pinned.set(true);
        let pin = WeakPin(this);
        log::trace!("destroying value owned by control block {:p}", this);
        let destroy_value = h.destroy_value;
        unsafe { destroy_value(this) };
        drop(pin);
    }

    /// Drops one weak reference, releasing the block when no references of
    /// either kind remain.
    ///
    /// # Safety
    ///
    /// `this` must be a live block and the caller must own one of its weak
    /// references, which is consumed.
    pub(crate) unsafe fn decrease_weak(this: NonNull<Header>) {
        let h = unsafe { this.as_ref() };
        let n = h.weak.get() - 1;
        h.weak.set(n);
        if n == 0 && h.shared.get() == 0 {
            log::trace!("releasing control block {:p}", this);
            let release_block = h.release_block;
            unsafe { release_block(this) };
        }
    }
}

struct WeakPin(NonNull<Header>);

impl Drop for WeakPin {
    fn drop(&mut self) {
        unsafe {
            self.0.as_ref().pinned.set(false);
            Header::decrease_weak(self.0)
        }
    }
}

// Leaking enough handles can wrap a count back to zero, which would free a
// value that is still referenced. There is no `abort()` in `no_std`, so panic
// before the count changes.
fn increment(count: usize) -> usize {
    match count.checked_add(1) {
        Some(n) => n,
        None => panic!("reference count overflow"),
    }
}

// Frees a block's raw memory if construction doesn't finish.
struct FreeOnUnwind<'g, U, A: Allocator> {
    block: NonNull<U>,
    alloc: &'g A,
}

impl<U, A: Allocator> Drop for FreeOnUnwind<'_, U, A> {
    fn drop(&mut self) {
        unsafe { self.alloc.deallocate_for(self.block) }
    }
}

/// Control block for a value allocated independently of the block.
#[repr(C)]
pub(crate) struct SeparateBlock<T: ?Sized, D, A> {
    header: Header,
    value: NonNull<T>,
    deleter: ManuallyDrop<D>,
    alloc: ManuallyDrop<A>,
}

impl<T: ?Sized, D: Deleter<T>, A: Allocator> SeparateBlock<T, D, A> {
    /// Allocates a block from `alloc` that takes ownership of `value`.
    ///
    /// If the block can't be allocated, `deleter` is applied to `value` before
    /// the error is returned, so the adopted value is never leaked.
    ///
    /// # Safety
    ///
    /// `deleter` must be a correct way to dispose of `value`, and nothing else
    /// may dispose of it.
    pub(crate) unsafe fn create(
        value: NonNull<T>,
        deleter: D,
        alloc: A,
    ) -> Result<NonNull<Header>, AllocError> {
        let block = match alloc.allocate_for::<Self>() {
            Ok(block) => block,
            Err(e) => {
                unsafe { deleter.delete(value) };
                return Err(e);
            }
        };
        unsafe {
            block.as_ptr().write(SeparateBlock {
                header: Header::new(Self::destroy_value, Self::release_block),
                value,
                deleter: ManuallyDrop::new(deleter),
                alloc: ManuallyDrop::new(alloc),
            });
        }
        log::trace!("adopted {:p} into separate control block {:p}", value, block);
        Ok(block.cast())
    }

    unsafe fn destroy_value(header: NonNull<Header>) {
        let block = header.cast::<Self>().as_ptr();
        unsafe {
            let value = (*block).value;
            let deleter = ManuallyDrop::take(&mut (*block).deleter);
            deleter.delete(value);
        }
    }

    unsafe fn release_block(header: NonNull<Header>) {
        let block = header.cast::<Self>();
        unsafe {
            let alloc = ManuallyDrop::take(&mut (*block.as_ptr()).alloc);
            alloc.deallocate_for(block);
        }
    }
}

/// Control block with the value stored in place after the allocator.
#[repr(C)]
pub(crate) struct InlineBlock<T, A> {
    header: Header,
    alloc: ManuallyDrop<A>,
    value: MaybeUninit<T>,
}

impl<T, A: Allocator> InlineBlock<T, A> {
    /// Allocates one block from `alloc`, then builds the value with `init`
    /// and moves it into the block through [`Allocator::construct`].
    ///
    /// Returns the type-erased block and the address of the embedded value.
    /// If `init` panics the block memory is returned to `alloc`.
    pub(crate) fn create<F>(alloc: A, init: F) -> Result<(NonNull<Header>, NonNull<T>), AllocError>
    where
        F: FnOnce() -> T,
    {
        let block = alloc.allocate_for::<Self>()?;
        let guard = FreeOnUnwind {
            block,
            alloc: &alloc,
        };
        let value = init();
        let b = block.as_ptr();
        let slot = unsafe {
            ptr::addr_of_mut!((*b).header)
                .write(Header::new(Self::destroy_value, Self::release_block));
            let slot = NonNull::new_unchecked(ptr::addr_of_mut!((*b).value) as *mut T);
            alloc.construct(slot, value);
            slot
        };
        mem::forget(guard);
        unsafe { ptr::addr_of_mut!((*b).alloc).write(ManuallyDrop::new(alloc)) };
        log::trace!("constructed value in control block {:p}", block);
        Ok((block.cast(), slot))
    }

    unsafe fn destroy_value(header: NonNull<Header>) {
        let block = header.cast::<Self>().as_ptr();
        unsafe {
            let slot = NonNull::new_unchecked(ptr::addr_of_mut!((*block).value) as *mut T);
            let alloc: &A = &(*block).alloc;
            alloc.destroy(slot);
        }
    }

    unsafe fn release_block(header: NonNull<Header>) {
        let block = header.cast::<Self>();
        unsafe {
            let alloc = ManuallyDrop::take(&mut (*block.as_ptr()).alloc);
            alloc.deallocate_for(block);
        }
    }
}

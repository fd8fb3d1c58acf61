//! `Shared<'a, T>`: the owning half of the pointer pair.
//!
//! A `Shared` is a value address plus a control block address. All ownership
//! bookkeeping goes through the block; the value address is only used for
//! dereferencing, which is what makes aliasing (pointing at a sub-object, or
//! at something the block doesn't own at all) possible.
//!
//! The lifetime `'a` bounds everything the pointer has type-erased: the
//! deleter, the allocator, and whatever the original value borrowed. Most code
//! uses [`SharedPtr<T>`], which is `Shared<'static, T>`.
use alloc::{alloc::handle_alloc_error, boxed::Box};
use core::{
    alloc::Layout,
    borrow, cmp, fmt,
    marker::PhantomData,
    mem,
    ops::Deref,
    ptr::{self, NonNull},
};

use crate::{
    allocator::{Allocator, DefaultDelete, Deleter, Global},
    block::{Header, InlineBlock, SeparateBlock},
    error::AllocError,
    weak::Weak,
};

/// Reference-counted owning pointer whose type-erased parts live at least
/// as long as `'a`.
pub struct Shared<'a, T: ?Sized> {
    pub(crate) ptr: Option<NonNull<T>>,
    pub(crate) block: Option<NonNull<Header>>,
    phantom: PhantomData<(&'a (), T)>,
}

/// A [`Shared`] whose deleter and allocator are `'static`.
pub type SharedPtr<T> = Shared<'static, T>;

impl<'a, T> Shared<'a, T> {
    /// Constructs a new `Shared<T>` holding `value`, with the value and its
    /// control block in a single allocation from [`Global`].
    pub fn new(value: T) -> Self {
        match Shared::new_in(value, Global) {
            Ok(p) => p,
            Err(AllocError) => handle_alloc_error(Layout::new::<InlineBlock<T, Global>>()),
        }
    }

    /// Like [`new`][Shared::new], but the combined block comes from `alloc`,
    /// which is also used to construct and destroy the value.
    pub fn new_in<A>(value: T, alloc: A) -> Result<Self, AllocError>
    where
        A: Allocator + 'a,
    {
        Shared::new_in_with(alloc, move || value)
    }

    /// Allocates the combined block from `alloc` first, and only then calls
    /// `init` to produce the value. If `init` panics, the block is returned to
    /// `alloc` before the panic continues.
    pub fn new_in_with<A, F>(alloc: A, init: F) -> Result<Self, AllocError>
    where
        A: Allocator + 'a,
        F: FnOnce() -> T,
    {
        let (block, ptr) = InlineBlock::create(alloc, init)?;
        Ok(Shared::from_parts(Some(ptr), Some(block)))
    }
}

impl<'a, T: ?Sized> Shared<'a, T> {
    /// Returns a pointer that owns nothing and points at nothing.
    pub const fn empty() -> Self {
        Shared::from_parts(None, None)
    }

    const fn from_parts(ptr: Option<NonNull<T>>, block: Option<NonNull<Header>>) -> Self {
        Shared {
            ptr,
            block,
            phantom: PhantomData,
        }
    }

    /// Takes ownership of a boxed value. Unlike [`new`][Shared::new], the
    /// value stays in its original allocation and the control block is
    /// allocated separately.
    pub fn from_box(value: Box<T>) -> Self
    where
        T: 'a,
    {
        // Safety: the pointer comes straight from `Box::into_raw`
        unsafe { Shared::from_raw(NonNull::new_unchecked(Box::into_raw(value))) }
    }

    /// Takes ownership of a value allocated by `Box`, releasing it with
    /// [`DefaultDelete`] when the last owner is dropped.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from [`Box::into_raw`] (or `Box::leak`) and must
    /// not be owned by anything else.
    pub unsafe fn from_raw(ptr: NonNull<T>) -> Self
    where
        T: 'a,
    {
        unsafe { Shared::from_raw_with_deleter(ptr, DefaultDelete) }
    }

    /// Takes ownership of `ptr`, calling `deleter` on it when the last owner
    /// is dropped. The control block comes from [`Global`].
    ///
    /// # Safety
    ///
    /// `ptr` must be valid until `deleter` runs, and `deleter` must be the
    /// only thing that disposes of it.
    pub unsafe fn from_raw_with_deleter<D>(ptr: NonNull<T>, deleter: D) -> Self
    where
        D: Deleter<T> + 'a,
    {
        match unsafe { Shared::from_raw_in(ptr, deleter, Global) } {
            Ok(p) => p,
            Err(AllocError) => {
                handle_alloc_error(Layout::new::<SeparateBlock<T, D, Global>>())
            }
        }
    }

    /// Takes ownership of `ptr` with a control block allocated from `alloc`.
    /// The block is later freed through the same allocator.
    ///
    /// If the block can't be allocated, `deleter` is called on `ptr` before
    /// the error is returned.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_with_deleter`][Shared::from_raw_with_deleter].
    pub unsafe fn from_raw_in<D, A>(ptr: NonNull<T>, deleter: D, alloc: A) -> Result<Self, AllocError>
    where
        D: Deleter<T> + 'a,
        A: Allocator + 'a,
    {
        let block = unsafe { SeparateBlock::create(ptr, deleter, alloc)? };
        Ok(Shared::from_parts(Some(ptr), Some(block)))
    }

    /// Shares `origin`'s control block but points at `ptr`.
    ///
    /// `origin` keeps whatever it owns alive for as long as the result lives.
    /// Aliasing an empty pointer yields a pointer that dereferences to `ptr`
    /// but owns nothing.
    ///
    /// # Safety
    ///
    /// `ptr` must stay valid for as long as any pointer sharing `origin`'s
    /// block exists, typically because it points into the value `origin` owns.
    pub unsafe fn aliasing<U: ?Sized>(origin: &Shared<'a, U>, ptr: NonNull<T>) -> Self {
        if let Some(block) = origin.block {
            unsafe { block.as_ref() }.add_shared();
        }
        Shared::from_parts(Some(ptr), origin.block)
    }

    /// Moving form of [`aliasing`][Shared::aliasing]: takes over `origin`'s
    /// reference instead of adding one.
    ///
    /// # Safety
    ///
    /// Same as [`aliasing`][Shared::aliasing].
    pub unsafe fn aliasing_from<U: ?Sized>(origin: Shared<'a, U>, ptr: NonNull<T>) -> Self {
        let block = origin.block;
        // `origin`'s reference now belongs to the result.
        mem::forget(origin);
        Shared::from_parts(Some(ptr), block)
    }

    /// Return a `Shared<U>` for any `U` reachable from `T`, e.g. a field, an
    /// element of a slice, or a `&dyn` view of the object. The result shares
    /// `this`'s control block.
    ///
    /// Projecting an empty pointer yields an empty pointer without calling `f`.
    pub fn project<U: ?Sized + 'a, F: FnOnce(&T) -> &U>(this: Self, f: F) -> Shared<'a, U>
    where
        T: 'a,
    {
        match this.ptr {
            Some(p) => {
                // Safety: a non-empty pointer always refers to a live value
                let u = NonNull::from(f(unsafe { p.as_ref() }));
                Shared::projected(this, u)
            }
            None => Shared::empty(),
        }
    }

    /// Fallible version of [`project`][Shared::project]. `this` is dropped
    /// when `f` returns `None`.
    pub fn try_project<U: ?Sized + 'a, F: FnOnce(&T) -> Option<&U>>(
        this: Self,
        f: F,
    ) -> Option<Shared<'a, U>>
    where
        T: 'a,
    {
        let p = this.ptr?;
        match f(unsafe { p.as_ref() }) {
            None => None,
            Some(u) => {
                let u = NonNull::from(u);
                Some(Shared::projected(this, u))
            }
        }
    }

    fn projected<U: ?Sized>(this: Self, ptr: NonNull<U>) -> Shared<'a, U> {
        // Safety: `ptr` was derived from a reference into the owned value
        unsafe { Shared::aliasing_from(this, ptr) }
    }

    /// Convert `Shared<T>` to `Shared<U>`, as long as `&T` converts to `&U`.
    ///
    /// This should be spelled `from()`, but that conflicts with the blanket
    /// impl converting T->T.
    pub fn cast<U: ?Sized + 'a>(this: Self) -> Shared<'a, U>
    where
        T: 'a,
        for<'u> &'u U: From<&'u T>,
    {
        Shared::project(this, |x| From::from(x))
    }

    /// Return a [`Weak`] pointer to this object.
    pub fn downgrade(this: &Self) -> Weak<'a, T> {
        if let Some(block) = this.block {
            unsafe { block.as_ref() }.add_weak();
        }
        Weak::from_parts(this.ptr, this.block)
    }

    /// Revives ownership from a weak pointer. The caller checks expiry first:
    /// this increments the shared count unconditionally.
    pub(crate) fn from_weak(weak: &Weak<'a, T>) -> Self {
        if let Some(block) = weak.block {
            unsafe { block.as_ref() }.add_shared();
        }
        Shared::from_parts(weak.ptr, weak.block)
    }

    /// Returns the value, or `None` for an empty pointer.
    pub fn get(this: &Self) -> Option<&T> {
        // Safety: the value outlives every `Shared` that points to it
        this.ptr.map(|p| unsafe { &*p.as_ptr() })
    }

    /// Returns the stored value address without any ownership check.
    pub fn as_ptr(this: &Self) -> Option<NonNull<T>> {
        this.ptr
    }

    pub fn is_empty(this: &Self) -> bool {
        this.ptr.is_none()
    }

    /// Number of `Shared` pointers sharing this control block, or 0 when
    /// there is no block.
    pub fn use_count(this: &Self) -> usize {
        this.header().map_or(0, Header::shared_count)
    }

    /// Number of [`Weak`] pointers to this control block.
    pub fn weak_count(this: &Self) -> usize {
        this.header().map_or(0, Header::weak_count)
    }

    /// Returns true if two `Shared` pointers point to the same object. Note
    /// that this is not the same as sharing the same control block: e.g. both
    /// might point to the same static object due to `project()`, or to
    /// different subobjects of the same owned value.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.ptr == other.ptr
    }

    /// Returns true if two pointers share a control block, i.e. they share
    /// reference counts. They may point to different subobjects.
    pub fn root_ptr_eq<U: ?Sized>(this: &Self, other: &Shared<'a, U>) -> bool {
        this.block.is_some() && this.block == other.block
    }

    /// Exchanges the contents of two pointers without touching any counts.
    pub fn swap(this: &mut Self, other: &mut Self) {
        mem::swap(&mut this.ptr, &mut other.ptr);
        mem::swap(&mut this.block, &mut other.block);
    }

    /// Leaves `this` empty and returns what it held.
    pub fn take(this: &mut Self) -> Self {
        mem::take(this)
    }

    /// Makes `this` share `source`'s value.
    ///
    /// The copy is built first and swapped in, so the previous value is
    /// released exactly once, after `this` already holds the new one.
    pub fn assign(this: &mut Self, source: &Self) {
        Shared::replace(this, source.clone());
    }

    fn replace(this: &mut Self, mut temp: Self) {
        Shared::swap(this, &mut temp);
    }

    /// Releases ownership, leaving `this` empty.
    pub fn reset(this: &mut Self) {
        Shared::replace(this, Shared::empty());
    }

    /// Replaces the owned value with a boxed one.
    pub fn reset_box(this: &mut Self, value: Box<T>)
    where
        T: 'a,
    {
        Shared::replace(this, Shared::from_box(value));
    }

    /// # Safety
    ///
    /// Same as [`from_raw`][Shared::from_raw].
    pub unsafe fn reset_raw(this: &mut Self, ptr: NonNull<T>)
    where
        T: 'a,
    {
        Shared::replace(this, unsafe { Shared::from_raw(ptr) });
    }

    /// # Safety
    ///
    /// Same as [`from_raw_with_deleter`][Shared::from_raw_with_deleter].
    pub unsafe fn reset_raw_with_deleter<D>(this: &mut Self, ptr: NonNull<T>, deleter: D)
    where
        D: Deleter<T> + 'a,
    {
        Shared::replace(this, unsafe { Shared::from_raw_with_deleter(ptr, deleter) });
    }

    /// On allocation failure `this` is left untouched and `deleter` has been
    /// applied to `ptr`.
    ///
    /// # Safety
    ///
    /// Same as [`from_raw_in`][Shared::from_raw_in].
    pub unsafe fn reset_raw_in<D, A>(
        this: &mut Self,
        ptr: NonNull<T>,
        deleter: D,
        alloc: A,
    ) -> Result<(), AllocError>
    where
        D: Deleter<T> + 'a,
        A: Allocator + 'a,
    {
        let temp = unsafe { Shared::from_raw_in(ptr, deleter, alloc)? };
        Shared::replace(this, temp);
        Ok(())
    }

    fn header(&self) -> Option<&Header> {
        // Safety: the block outlives every pointer that refers to it
        self.block.map(|b| unsafe { &*b.as_ptr() })
    }
}

/// Constructs a [`SharedPtr`] with the value and its control block in one
/// allocation.
pub fn make_shared<T>(value: T) -> SharedPtr<T> {
    Shared::new(value)
}

/// Constructs a [`Shared`] with the value and its control block in one
/// allocation from `alloc`.
pub fn allocate_shared<'a, T, A>(alloc: A, value: T) -> Result<Shared<'a, T>, AllocError>
where
    A: Allocator + 'a,
{
    Shared::new_in(value, alloc)
}

impl<'a, T: ?Sized> AsRef<T> for Shared<'a, T> {
    fn as_ref(&self) -> &T {
        self
    }
}

impl<'a, T: ?Sized> borrow::Borrow<T> for Shared<'a, T> {
    fn borrow(&self) -> &T {
        self
    }
}

impl<'a, T: ?Sized> Clone for Shared<'a, T> {
    fn clone(&self) -> Self {
        if let Some(h) = self.header() {
            h.add_shared();
        }
        Shared::from_parts(self.ptr, self.block)
    }
}

impl<'a, T: ?Sized> Default for Shared<'a, T> {
    fn default() -> Self {
        Shared::empty()
    }
}

/// Dereferencing an empty pointer panics.
impl<'a, T: ?Sized> Deref for Shared<'a, T> {
    type Target = T;

    fn deref(&self) -> &T {
        match Shared::get(self) {
            Some(v) => v,
            None => panic!("dereferenced an empty SharedPtr"),
        }
    }
}

impl<'a, T: ?Sized> Drop for Shared<'a, T> {
    fn drop(&mut self) {
        if let Some(block) = self.block {
            unsafe { Header::decrease_shared(block) }
        }
    }
}

impl<'a, T: ?Sized + 'a> From<Box<T>> for Shared<'a, T> {
    fn from(value: Box<T>) -> Self {
        Shared::from_box(value)
    }
}

impl<'a, T: ?Sized + PartialEq> PartialEq for Shared<'a, T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Shared::get(self) == Shared::get(other)
    }
}

impl<'a, T: ?Sized + Eq> Eq for Shared<'a, T> {}

impl<'a, T: ?Sized + PartialOrd> PartialOrd for Shared<'a, T> {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Shared::get(self).partial_cmp(&Shared::get(other))
    }
}

impl<'a, T: ?Sized + Ord> Ord for Shared<'a, T> {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        Shared::get(self).cmp(&Shared::get(other))
    }
}

impl<'a, T: ?Sized + fmt::Display> fmt::Display for Shared<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Shared::get(self) {
            Some(v) => fmt::Display::fmt(v, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<'a, T: ?Sized + fmt::Debug> fmt::Debug for Shared<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match Shared::get(self) {
            Some(v) => fmt::Debug::fmt(v, f),
            None => f.write_str("(empty)"),
        }
    }
}

impl<'a, T: ?Sized> fmt::Pointer for Shared<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ptr {
            Some(p) => fmt::Pointer::fmt(&p, f),
            None => fmt::Pointer::fmt(&ptr::null::<u8>(), f),
        }
    }
}

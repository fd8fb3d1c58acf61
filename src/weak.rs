//! `Weak<'a, T>`: an observer of a [`Shared`] value that never keeps it alive.
use core::{fmt, marker::PhantomData, mem, ptr::NonNull};

use crate::{block::Header, shared::Shared};

/// Non-owning pointer to a value managed by [`Shared`]. It keeps the control
/// block alive, but not the value.
pub struct Weak<'a, T: ?Sized> {
    pub(crate) ptr: Option<NonNull<T>>,
    pub(crate) block: Option<NonNull<Header>>,
    phantom: PhantomData<(&'a (), T)>,
}

/// A [`Weak`] matching [`SharedPtr`][crate::SharedPtr].
pub type WeakPtr<T> = Weak<'static, T>;

impl<'a, T: ?Sized> Weak<'a, T> {
    /// Returns a weak pointer with no control block. It is always expired.
    pub const fn new() -> Self {
        Weak::from_parts(None, None)
    }

    pub(crate) const fn from_parts(ptr: Option<NonNull<T>>, block: Option<NonNull<Header>>) -> Self {
        Weak {
            ptr,
            block,
            phantom: PhantomData,
        }
    }

    /// Returns a [`Shared`] pointer to the value, or an empty one if the
    /// value has already been destroyed.
    pub fn lock(&self) -> Shared<'a, T> {
        if self.expired() {
            Shared::empty()
        } else {
            Shared::from_weak(self)
        }
    }

    /// Like [`lock`][Weak::lock], but `None` instead of an empty pointer.
    pub fn upgrade(&self) -> Option<Shared<'a, T>> {
        if self.expired() {
            None
        } else {
            Some(Shared::from_weak(self))
        }
    }

    // Get the current shared count of the control block. A weak pointer
    // without a block reports 0.
    pub fn use_count(&self) -> usize {
        self.header().map_or(0, Header::shared_count)
    }

    // Get the current weak count of the control block.
    pub fn weak_count(&self) -> usize {
        self.header().map_or(0, Header::weak_count)
    }

    // Returns true if all shared pointers have been dropped, so `lock` will
    // return an empty pointer. Also true for a pointer made by `new()`.
    pub fn expired(&self) -> bool {
        self.use_count() == 0
    }

    /// Returns true if both point at the same address. Like
    /// [`Shared::ptr_eq`], this says nothing about sharing a control block.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.ptr == other.ptr
    }

    /// Exchanges the contents of two weak pointers.
    pub fn swap(&mut self, other: &mut Self) {
        mem::swap(&mut self.ptr, &mut other.ptr);
        mem::swap(&mut self.block, &mut other.block);
    }

    /// Leaves `self` empty and returns what it held.
    pub fn take(&mut self) -> Self {
        mem::take(self)
    }

    /// Makes `self` observe what `source` observes. The previous block is
    /// released after the new one is in place.
    pub fn assign(&mut self, source: &Self) {
        let mut temp = source.clone();
        self.swap(&mut temp);
    }

    /// Return a `Weak<U>` for any `U` reachable from `T`.
    ///
    /// `f` runs on a temporarily upgraded pointer, so the value stays alive
    /// for the whole call even if `f` drops every other owner. Projecting an
    /// expired pointer keeps its control block but drops the value address,
    /// which could never be dereferenced again anyway.
    pub fn project<U: ?Sized + 'a, F: FnOnce(&T) -> &U>(this: Self, f: F) -> Weak<'a, U>
    where
        T: 'a,
    {
        let ptr = match this.upgrade().filter(|s| !Shared::is_empty(s)) {
            Some(owner) => {
                let u = NonNull::from(f(&*owner));
                drop(owner);
                Some(u)
            }
            None => None,
        };
        let block = this.block;
        // Our weak reference now belongs to the result.
        mem::forget(this);
        Weak::from_parts(ptr, block)
    }

    /// Convert `Weak<T>` to `Weak<U>`, as long as `&T` converts to `&U`.
    pub fn cast<U: ?Sized + 'a>(this: Self) -> Weak<'a, U>
    where
        T: 'a,
        for<'u> &'u U: From<&'u T>,
    {
        Weak::project(this, |x| From::from(x))
    }

    fn header(&self) -> Option<&Header> {
        // Safety: we hold a weak reference, so the block is alive
        self.block.map(|b| unsafe { &*b.as_ptr() })
    }
}

impl<'a, T: ?Sized> Clone for Weak<'a, T> {
    fn clone(&self) -> Self {
        if let Some(h) = self.header() {
            h.add_weak();
        }
        Weak::from_parts(self.ptr, self.block)
    }
}

impl<'a, T: ?Sized> Default for Weak<'a, T> {
    fn default() -> Self {
        Weak::new()
    }
}

impl<'a, T: ?Sized> Drop for Weak<'a, T> {
    fn drop(&mut self) {
        if let Some(block) = self.block {
            unsafe { Header::decrease_weak(block) }
        }
    }
}

impl<'a, T: ?Sized> From<&Shared<'a, T>> for Weak<'a, T> {
    fn from(shared: &Shared<'a, T>) -> Self {
        Shared::downgrade(shared)
    }
}

impl<'a, T: ?Sized> fmt::Debug for Weak<'a, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(Weak)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        allocator::testing::{Event, Recording},
        shared::SharedPtr,
    };
    use std::{cell::Cell, rc::Rc};

    fn wcounts<T: ?Sized>(x: &WeakPtr<T>) -> (usize, usize) {
        (x.use_count(), x.weak_count())
    }

    struct DropCounter<T>(T, Rc<Cell<usize>>);

    impl<T> Drop for DropCounter<T> {
        fn drop(&mut self) {
            self.1.set(self.1.get() + 1);
        }
    }

    #[test]
    fn test_weak() {
        let x = SharedPtr::new(2);
        let y = Shared::downgrade(&x);
        assert_eq!(wcounts(&y), (1, 1));
        assert_eq!(Shared::weak_count(&x), 1);
        drop(x);
        assert_eq!(wcounts(&y), (0, 1));
        drop(y);
    }

    #[test]
    fn test_new_is_expired() {
        let w: WeakPtr<i32> = Weak::new();
        assert!(w.expired());
        assert_eq!(wcounts(&w), (0, 0));
        assert!(Shared::is_empty(&w.lock()));
        assert!(w.upgrade().is_none());
        assert!(WeakPtr::<i32>::default().expired());
    }

    #[test]
    fn test_lifecycle() {
        let n = Rc::new(Cell::new(0));
        let alloc = Recording::default();

        let a = Shared::new_in(DropCounter(5, n.clone()), alloc.clone()).unwrap();
        assert_eq!(Shared::use_count(&a), 1);
        let b = a.clone();
        assert_eq!(Shared::use_count(&a), 2);
        let w = Shared::downgrade(&a);
        drop(a);
        drop(b);

        assert_eq!(n.get(), 1);
        assert_eq!(w.use_count(), 0);
        assert!(w.expired());
        assert!(Shared::is_empty(&w.lock()));
        assert!(!matches!(alloc.events().last(), Some(Event::Deallocate(_))));

        drop(w);
        assert!(matches!(alloc.events().last(), Some(Event::Deallocate(_))));
        assert_eq!(n.get(), 1);
    }

    #[test]
    fn test_lock_increments() {
        let a = SharedPtr::new(1);
        let w = Shared::downgrade(&a);
        let before = Shared::use_count(&a);
        let b = w.lock();
        assert_eq!(Shared::use_count(&b), before + 1);
        assert!(Shared::ptr_eq(&a, &b));
        let c = w.upgrade().unwrap();
        assert_eq!(Shared::use_count(&c), before + 2);
    }

    #[test]
    fn test_clone_and_drop() {
        let a = SharedPtr::new(1);
        let w1 = Weak::from(&a);
        let w2 = w1.clone();
        assert_eq!(Shared::weak_count(&a), 2);
        drop(w1);
        assert_eq!(w2.weak_count(), 1);
        drop(w2);
        assert_eq!(Shared::weak_count(&a), 0);
    }

    #[test]
    fn test_take_and_assign() {
        let a = SharedPtr::new(1);
        let b = SharedPtr::new(2);
        let mut w1 = Shared::downgrade(&a);
        let w2 = Shared::downgrade(&b);

        w1.assign(&w2);
        assert_eq!(Shared::weak_count(&a), 0);
        assert_eq!(Shared::weak_count(&b), 2);
        assert_eq!(*w1.lock(), 2);

        let w3 = w1.take();
        assert!(w1.expired());
        assert_eq!(Shared::weak_count(&b), 2);
        assert_eq!(*w3.lock(), 2);
    }

    #[test]
    fn test_swap_exchanges_both_fields() {
        let a = SharedPtr::new((1, 2));
        let b = SharedPtr::new((3, 4));
        let mut wa = Shared::downgrade(&Shared::project(a.clone(), |p| &p.1));
        let mut wb = Shared::downgrade(&Shared::project(b.clone(), |p| &p.0));
        wa.swap(&mut wb);
        assert_eq!(*wa.lock(), 3);
        assert_eq!(*wb.lock(), 2);
        assert_eq!(Shared::weak_count(&a), 1);
    }

    #[test]
    fn test_element_keeps_array_alive() {
        let n = Rc::new(Cell::new(0));
        let a = SharedPtr::new(DropCounter([10, 20, 30], n.clone()));
        let whole = Shared::downgrade(&a);

        let elem: SharedPtr<i32> = Shared::project(a, |x| &x.0[2]);
        // moved, not copied: still one owner, and `whole` sees it
        assert_eq!((whole.use_count(), whole.weak_count()), (1, 1));

        let elem_weak = Shared::downgrade(&elem);
        assert_eq!(whole.weak_count(), 2);
        let again = elem_weak.lock();
        assert_eq!(*again, 30);
        assert_eq!(whole.use_count(), 2);

        drop(elem);
        assert_eq!(n.get(), 0);
        drop(again);
        assert_eq!(n.get(), 1);
        assert!(whole.expired() && elem_weak.expired());
        assert_eq!(elem_weak.weak_count(), 2);
    }

    #[test]
    fn test_project_keeps_value_alive_during_call() {
        struct Flag {
            alive: Cell<bool>,
        }
        impl Drop for Flag {
            fn drop(&mut self) {
                self.alive.set(false);
            }
        }

        let a = SharedPtr::new(Flag {
            alive: Cell::new(true),
        });
        let w = Shared::downgrade(&a);
        let seen = Rc::new(Cell::new(false));
        let s = seen.clone();
        let w1 = Weak::project(w, move |p| {
            // dropping the last outside owner must not destroy `p`
            drop(a);
            s.set(p.alive.get());
            &p.alive
        });
        assert!(seen.get());
        // the temporary owner went away after the call
        assert!(w1.expired());
        assert_eq!(w1.weak_count(), 1);
    }

    #[test]
    fn test_project_live() {
        let a = SharedPtr::new((1, 2));
        let w = Shared::downgrade(&a);
        let w1 = Weak::project(w, |p| &p.1);
        assert_eq!(Shared::weak_count(&a), 1);
        assert_eq!(*w1.lock(), 2);
    }

    #[test]
    fn test_project_expired() {
        let a = SharedPtr::new((1, 2));
        let w = Shared::downgrade(&a);
        drop(a);
        let w1: WeakPtr<i32> = Weak::project(w, |_| unreachable!());
        assert!(w1.expired());
        assert_eq!(w1.weak_count(), 1);
        assert!(w1.upgrade().is_none());
    }

    #[test]
    fn test_cast() {
        struct Wrapper(i32);
        impl<'u> From<&'u Wrapper> for &'u i32 {
            fn from(w: &'u Wrapper) -> &'u i32 {
                &w.0
            }
        }
        let a = SharedPtr::new(Wrapper(3));
        let w: WeakPtr<i32> = Weak::cast(Shared::downgrade(&a));
        assert_eq!(*w.lock(), 3);
        assert_eq!(Shared::weak_count(&a), 1);
    }

    #[test]
    fn test_weak_of_empty() {
        let e: SharedPtr<i32> = Shared::empty();
        let w = Shared::downgrade(&e);
        assert!(w.expired());
        assert_eq!(format!("{:?}", w), "(Weak)");
    }
}

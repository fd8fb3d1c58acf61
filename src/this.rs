//! Letting a value hand out owning pointers to itself.
//!
//! A type opts in by embedding an [`EnableSharedFromThis`] slot and
//! implementing [`SharedFromThis`]. Once a [`SharedPtr`] owning the value has
//! been attached to the slot, `shared_from_this()` returns new owners that
//! share the existing control block.
//!
//! ```
//! use sharedptr::{EnableSharedFromThis, SharedFromThis, SharedPtr};
//!
//! struct Node {
//!     name: &'static str,
//!     this: EnableSharedFromThis<Node>,
//! }
//!
//! impl SharedFromThis for Node {
//!     fn self_ref(&self) -> &EnableSharedFromThis<Node> {
//!         &self.this
//!     }
//! }
//!
//! let node = SharedPtr::new_self_ref(Node { name: "root", this: Default::default() });
//! let again = node.shared_from_this().unwrap();
//! assert_eq!(again.name, "root");
//! assert_eq!(SharedPtr::use_count(&node), 2);
//! ```
use alloc::boxed::Box;
use core::{cell::Cell, fmt, ptr::NonNull};

use crate::{
    allocator::{Allocator, Deleter},
    error::{AllocError, BadWeakPtr},
    shared::{Shared, SharedPtr},
    weak::WeakPtr,
};

/// Slot holding a weak back-reference to the value that contains it. It
/// never contributes to the shared count.
pub struct EnableSharedFromThis<T: ?Sized> {
    this: Cell<WeakPtr<T>>,
}

impl<T: ?Sized> EnableSharedFromThis<T> {
    /// An unattached slot.
    pub const fn new() -> Self {
        EnableSharedFromThis {
            this: Cell::new(WeakPtr::new()),
        }
    }

    /// Records `owner` unless the slot already refers to a live owner.
    fn attach(&self, owner: &SharedPtr<T>) {
        let current = self.this.take();
        if current.expired() {
            self.this.set(Shared::downgrade(owner));
        } else {
            self.this.set(current);
        }
    }

    /// A new owner sharing the control block this slot was attached to.
    pub fn shared(&self) -> Result<SharedPtr<T>, BadWeakPtr> {
        let weak = self.this.take();
        let shared = weak.upgrade();
        self.this.set(weak);
        shared.ok_or_else(|| {
            log::debug!("shared_from_this called on a value with no owner");
            BadWeakPtr
        })
    }

    /// A weak pointer to the value; expired if the slot was never attached.
    pub fn weak(&self) -> WeakPtr<T> {
        let weak = self.this.take();
        let copy = weak.clone();
        self.this.set(weak);
        copy
    }
}

impl<T: ?Sized> Default for EnableSharedFromThis<T> {
    fn default() -> Self {
        EnableSharedFromThis::new()
    }
}

/// A copied value is a different object, so the copy starts unattached.
impl<T: ?Sized> Clone for EnableSharedFromThis<T> {
    fn clone(&self) -> Self {
        EnableSharedFromThis::new()
    }
}

impl<T: ?Sized> fmt::Debug for EnableSharedFromThis<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EnableSharedFromThis")
    }
}

/// Implemented by types that embed an [`EnableSharedFromThis`] slot.
///
/// Only the `*_self_ref` constructors attach the slot. A value built with
/// [`Shared::new`], [`Shared::new_in`], [`allocate_shared`][crate::allocate_shared]
/// or a raw pointer constructor stays unattached until
/// [`Shared::attach_self_ref`] is called on it, and `shared_from_this` fails
/// until then.
pub trait SharedFromThis {
    fn self_ref(&self) -> &EnableSharedFromThis<Self>;

    /// Returns a new owner of `self`.
    ///
    /// Fails with [`BadWeakPtr`] if `self` is not currently owned through an
    /// attached [`SharedPtr`], e.g. it lives on the stack, it was never
    /// attached, or its owners are all gone.
    fn shared_from_this(&self) -> Result<SharedPtr<Self>, BadWeakPtr> {
        self.self_ref().shared()
    }

    fn weak_from_this(&self) -> WeakPtr<Self> {
        self.self_ref().weak()
    }
}

impl<T: SharedFromThis> Shared<'static, T> {
    /// [`Shared::new`] followed by [`attach_self_ref`][Shared::attach_self_ref].
    pub fn new_self_ref(value: T) -> Self {
        let this = Shared::new(value);
        Shared::attach_self_ref(&this);
        this
    }

    /// [`Shared::new_in`] followed by [`attach_self_ref`][Shared::attach_self_ref].
    pub fn new_in_self_ref<A>(value: T, alloc: A) -> Result<Self, AllocError>
    where
        A: Allocator + 'static,
    {
        let this = Shared::new_in(value, alloc)?;
        Shared::attach_self_ref(&this);
        Ok(this)
    }
}

impl<T: SharedFromThis + ?Sized> Shared<'static, T> {
    /// [`Shared::from_box`] followed by [`attach_self_ref`][Shared::attach_self_ref].
    pub fn from_box_self_ref(value: Box<T>) -> Self
    where
        T: 'static,
    {
        let this = Shared::from_box(value);
        Shared::attach_self_ref(&this);
        this
    }

    /// [`Shared::from_raw_in`] followed by [`attach_self_ref`][Shared::attach_self_ref].
    ///
    /// # Safety
    ///
    /// Same as [`Shared::from_raw_in`].
    pub unsafe fn from_raw_in_self_ref<D, A>(
        ptr: NonNull<T>,
        deleter: D,
        alloc: A,
    ) -> Result<Self, AllocError>
    where
        D: Deleter<T> + 'static,
        A: Allocator + 'static,
    {
        let this = unsafe { Shared::from_raw_in(ptr, deleter, alloc)? };
        Shared::attach_self_ref(&this);
        Ok(this)
    }

    /// Points the value's self-reference slot at `this`'s control block,
    /// unless it already refers to a live owner. Doesn't change the shared
    /// count. Does nothing for an empty pointer.
    pub fn attach_self_ref(this: &Self) {
        if let Some(value) = Shared::get(this) {
            value.self_ref().attach(this);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator::testing::{Event, Recording};
    use std::{rc::Rc, string::String, vec::Vec};

    struct Node {
        name: String,
        children: Vec<SharedPtr<Node>>,
        this: EnableSharedFromThis<Node>,
    }

    impl SharedFromThis for Node {
        fn self_ref(&self) -> &EnableSharedFromThis<Node> {
            &self.this
        }
    }

    fn node(name: &str) -> Node {
        Node {
            name: String::from(name),
            children: Vec::new(),
            this: EnableSharedFromThis::new(),
        }
    }

    #[test]
    fn test_shared_from_this() {
        let a = SharedPtr::new_self_ref(node("a"));
        assert_eq!(Shared::use_count(&a), 1);
        // the slot is a weak reference
        assert_eq!(Shared::weak_count(&a), 1);

        let b = a.shared_from_this().unwrap();
        assert!(Shared::root_ptr_eq(&a, &b));
        assert!(Shared::ptr_eq(&a, &b));
        assert_eq!(Shared::use_count(&a), 2);
        assert_eq!(b.name, "a");
    }

    #[test]
    fn test_not_owned() {
        let n = node("stack");
        assert_eq!(n.shared_from_this().err(), Some(BadWeakPtr));
        assert!(n.weak_from_this().expired());
    }

    #[test]
    fn test_not_attached() {
        let a = SharedPtr::new(node("plain"));
        assert_eq!(a.shared_from_this().err(), Some(BadWeakPtr));
        Shared::attach_self_ref(&a);
        assert!(a.shared_from_this().is_ok());
    }

    #[test]
    fn test_attach_does_not_add_shared() {
        let a = SharedPtr::new(node("a"));
        Shared::attach_self_ref(&a);
        Shared::attach_self_ref(&a);
        let b = a.clone();
        Shared::attach_self_ref(&b);
        assert_eq!(Shared::use_count(&a), 2);
        assert_eq!(Shared::weak_count(&a), 1);
    }

    #[test]
    fn test_owner_gone() {
        let a = SharedPtr::new_self_ref(node("a"));
        let w = a.weak_from_this();
        assert_eq!(Shared::weak_count(&a), 2);
        drop(a);
        assert!(w.expired());
        // the value and its slot are gone, but the block is still alive for `w`
        assert_eq!(w.weak_count(), 1);
    }

    #[test]
    fn test_self_ref_released_with_value() {
        let alloc = Recording::default();
        let a = Shared::new_in(node("a"), alloc.clone()).unwrap();
        let a: SharedPtr<Node> = a;
        Shared::attach_self_ref(&a);
        drop(a);
        let events = alloc.events();
        assert_eq!(events.len(), 4);
        assert_eq!(events[2], Event::Destroy);
        assert!(matches!(events[3], Event::Deallocate(_)));
    }

    #[test]
    fn test_new_in_self_ref() {
        let alloc = Recording::default();
        let a = SharedPtr::new_in_self_ref(node("a"), alloc.clone()).unwrap();
        assert_eq!(alloc.allocations(), 1);
        let b = a.shared_from_this().unwrap();
        assert!(Shared::root_ptr_eq(&a, &b));
        assert_eq!(Shared::use_count(&a), 2);
    }

    #[test]
    fn test_from_raw_in_self_ref() {
        let alloc = Recording::default();
        let raw = NonNull::from(Box::leak(Box::new(node("raw"))));
        let a = unsafe {
            SharedPtr::from_raw_in_self_ref(raw, crate::allocator::DefaultDelete, alloc.clone())
        }
        .unwrap();
        assert_eq!(a.shared_from_this().unwrap().name, "raw");
        drop(a);
        assert!(matches!(alloc.events().last(), Some(Event::Deallocate(_))));
    }

    #[test]
    fn test_weak_count_during_drop() {
        struct Watched {
            this: EnableSharedFromThis<Watched>,
            seen: Rc<Cell<usize>>,
        }
        impl SharedFromThis for Watched {
            fn self_ref(&self) -> &EnableSharedFromThis<Watched> {
                &self.this
            }
        }
        impl Drop for Watched {
            fn drop(&mut self) {
                // the slot plus the copy made here
                self.seen.set(self.weak_from_this().weak_count());
            }
        }

        let seen = Rc::new(Cell::new(0));
        let a = SharedPtr::new_self_ref(Watched {
            this: EnableSharedFromThis::new(),
            seen: seen.clone(),
        });
        drop(a);
        assert_eq!(seen.get(), 2);
    }

    #[test]
    fn test_children_keep_parent_handle() {
        let mut root = node("root");
        root.children.push(SharedPtr::new_self_ref(node("leaf")));
        let root = SharedPtr::new_self_ref(root);
        let leaf = root.children[0].shared_from_this().unwrap();
        assert_eq!(leaf.name, "leaf");
        assert_eq!(Shared::use_count(&root.children[0]), 2);
        let again = root.shared_from_this().unwrap();
        assert_eq!(again.children.len(), 1);
    }

    #[test]
    fn test_from_box_self_ref() {
        let a = SharedPtr::from_box_self_ref(Box::new(node("boxed")));
        assert_eq!(a.shared_from_this().unwrap().name, "boxed");
    }

    #[test]
    fn test_clone_starts_unattached() {
        let slot: EnableSharedFromThis<Node> = EnableSharedFromThis::new();
        let a = SharedPtr::new_self_ref(node("a"));
        let copy = a.this.clone();
        assert!(copy.weak().expired());
        assert!(slot.shared().is_err());
        assert!(a.this.shared().is_ok());
    }

    #[test]
    fn test_aliased_owner() {
        struct Outer {
            inner: Node,
            _tag: Rc<()>,
        }
        let tag = Rc::new(());
        let outer = SharedPtr::new(Outer {
            inner: node("inner"),
            _tag: tag.clone(),
        });
        let inner = Shared::project(outer, |o| &o.inner);
        Shared::attach_self_ref(&inner);
        let again = inner.shared_from_this().unwrap();
        assert_eq!(Shared::use_count(&again), 2);
        drop(inner);
        drop(again);
        assert_eq!(Rc::strong_count(&tag), 1);
    }
}

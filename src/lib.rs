/*!
This crate provides [`SharedPtr<T>`] and [`WeakPtr<T>`], single-threaded
reference-counted pointers modelled on C++'s
[`shared_ptr`](https://en.cppreference.com/w/cpp/memory/shared_ptr) and
`weak_ptr`. They go further than [`std::rc::Rc`] in a few ways:

* The value can be adopted from a raw pointer together with a custom
  [`Deleter`], and the control block can come from a custom [`Allocator`].
* A pointer can alias: it can point at a field of the owned value (or at
  anything else) while sharing the owner's reference counts.
* A value can hand out owning pointers to itself through
  [`SharedFromThis`].

```rust
    use sharedptr::{SharedPtr, WeakPtr};

    let a: SharedPtr<(String, u32)> = SharedPtr::new((String::from("a"), 1));
    let b = a.clone();
    assert_eq!(SharedPtr::use_count(&a), 2);

    // a pointer to one field, sharing `a`'s counts
    let name: SharedPtr<String> = SharedPtr::project(b, |p| &p.0);
    assert_eq!(*name, "a");

    let w: WeakPtr<(String, u32)> = SharedPtr::downgrade(&a);
    drop(a);
    // `name` still keeps the whole tuple alive
    assert!(!w.expired());
    drop(name);
    assert!(w.expired());
    assert!(w.upgrade().is_none());
```

# Control blocks

Every owned value is governed by one control block holding two counts:
the number of live [`Shared`] pointers and the number of live [`Weak`]
pointers. When the first count reaches zero the value is destroyed; when
both are zero the block itself is freed. Each happens exactly once.

There are two ways to get a block:

* [`SharedPtr::new`] (or [`make_shared`]) and [`Shared::new_in`] (or
  [`allocate_shared`]) put the value inside the block, so one allocation
  covers both.
* [`SharedPtr::from_box`], [`SharedPtr::from_raw_with_deleter`] and
  [`Shared::from_raw_in`] adopt a value that already lives elsewhere, and
  allocate only the block.

```rust
    use sharedptr::{Shared, StackAllocator, StackStorage};

    let storage = StackStorage::<256>::new();
    let alloc = StackAllocator::new(&storage);

    // one allocation out of `storage` for the block and the value together
    let p: Shared<'_, [u32; 4]> = Shared::new_in([1, 2, 3, 4], alloc).unwrap();
    assert_eq!(p[2], 3);
    assert!(storage.used() > 0);
```

# Lifetimes

A control block erases the types of its deleter and allocator, so the
pointer type has to remember how long those may live. `Shared<'a, T>`
([`Shared`]) carries that lifetime, as does `Weak<'a, T>` ([`Weak`]). [`SharedPtr<T>`] is an
alias for `Shared<'static, T>`, and is what most code uses; a pointer
built from a borrowed allocator like [`StackAllocator`] gets a shorter
lifetime and cannot outlive it.

The same lifetime keeps [`Shared::project`] sound: projecting a
`Shared<'a, &'b T>` onto the `T` behind the reference requires `'b: 'a`.

# Empty pointers

[`Shared::empty()`] owns nothing. [`Shared::get`] returns `None` for it,
[`Shared::use_count`] returns 0, and dereferencing it panics. A weak
pointer made by [`Weak::new()`] is always expired, and `lock()` on an
expired weak pointer returns an empty `Shared` rather than failing.

# Threads

The counts are plain [`Cell`](core::cell::Cell)s. `SharedPtr` and
`WeakPtr` are neither `Send` nor `Sync`, so the compiler enforces the
single-threaded contract.

## Differences from [`std::rc::Rc`]

`Rc::ptr_eq(a,b)` returns true if a and b share the same allocation,
which is the same as asking if they're equal pointers. Here those are
two different questions: you can have pointers to two different subobjects
of the same value, or pointers with different blocks pointing to the same
static object. So [`Shared::ptr_eq`] is equivalent to comparing addresses,
and [`Shared::root_ptr_eq`] checks whether the counts are shared.

`Shared::weak_count` counts only real weak pointers. An attached
[`EnableSharedFromThis`] slot is one of them. The block keeps an extra weak
reference of its own while the value's destructor runs, but the counts never
include it.

Leaking enough pointers to overflow a count panics instead of wrapping.
*/
#![no_std]
#[cfg(test)]
#[macro_use]
extern crate std;

extern crate alloc;

pub mod allocator;
mod block;
pub mod error;
pub mod shared;
pub mod stack;
pub mod this;
pub mod weak;

pub use self::allocator::{Allocator, DefaultDelete, Deleter, Global};
pub use self::error::{AllocError, BadWeakPtr};
pub use self::shared::{allocate_shared, make_shared, Shared, SharedPtr};
pub use self::stack::{StackAllocator, StackStorage};
pub use self::this::{EnableSharedFromThis, SharedFromThis};
pub use self::weak::{Weak, WeakPtr};

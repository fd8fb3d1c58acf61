//! Error types returned by fallible constructors and by
//! [`shared_from_this`][crate::SharedFromThis::shared_from_this].
use thiserror::Error;

/// Returned when an [`Allocator`][crate::Allocator] cannot satisfy a request,
/// or when a requested layout cannot be represented.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("memory allocation failed")]
pub struct AllocError;

/// Returned by `shared_from_this` when the value is not owned by any
/// [`SharedPtr`][crate::SharedPtr], either because ownership was never
/// attached or because every owner has been dropped.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
#[error("bad weak pointer: no shared ownership has been established")]
pub struct BadWeakPtr;

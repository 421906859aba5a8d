//! Value handles exchanged between host and guest.
//!
//! One handle type, [`V8Value`], covers every guest value. Its [`ValueKind`]
//! tag is fixed at creation and decides which operations apply. Primitives
//! can also be copied out as [`Primitive`] values, and passed back in through
//! [`Arg`].

mod handle;
mod kind;
mod primitive;

pub use handle::V8Value;
pub use kind::ValueKind;
pub use primitive::{Arg, Primitive};

pub(crate) use primitive::WireArg;

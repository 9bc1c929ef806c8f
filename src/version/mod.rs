//! Reference model and version resolution.
//!
//! A [`Versions`] set is built once per request from an upstream advertisement and answers
//! "which reference does this constraint mean": exact short names first, then the highest
//! semantic version with the constraint as prefix, then the `v0` default-branch fallback.
pub mod reference;
pub mod versions;

pub use reference::{RefKind, Reference, ResolvedVersion};
pub use versions::{ReferenceSet, Versions};

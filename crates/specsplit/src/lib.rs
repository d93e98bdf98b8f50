//! Public facade crate for `specsplit`.
//!
//! This crate intentionally contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `specsplit-core`.

pub use specsplit_core::*;

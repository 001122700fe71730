//! Typed Redis cache client for the aicarpool gateway (spec §2 step 1, §6).
//!
//! Every higher layer treats a single [`CacheClient`] as a shared
//! dependency; key naming goes through [`keys::KeySpace`] so the
//! structured families of spec §6 are never hand-built with `format!` at
//! the call site.

pub mod client;
pub mod keys;

pub use client::{CacheClient, CacheError, Result};
pub use keys::KeySpace;

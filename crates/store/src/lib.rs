//! The primary relational store (spec §2 step 3, §6): groups, members,
//! client API keys, upstream accounts, resource bindings, usage
//! statistics, and account health checks. The core issues narrow queries
//! and batch writes only — no ORM, no ad-hoc SQL at the call site beyond
//! this crate.

mod postgres;

pub use postgres::{PostgresStore, StoreError};

pub type Result<T> = std::result::Result<T, StoreError>;

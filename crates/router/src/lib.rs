//! The resource-binding-aware router (spec §4.2): selects an eligible
//! upstream account and dispatches through a provider adapter.

mod router;

pub use router::Router;

//! Read queries against the persistent store.

pub mod calls;

//! Query routing models shared by the router and its callers.

pub mod model;

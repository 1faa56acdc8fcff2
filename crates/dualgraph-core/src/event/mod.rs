//! Graph mutation events carried by the CDC log.

pub mod model;

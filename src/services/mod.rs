//! Request pipelines built on top of the `ObjectStore` boundary.

pub mod listing;
pub mod sink;
pub mod transfer;

//! Core data models for the gateway.
//!
//! `Entity` is what the listing endpoint emits, `SinkOperation` what the sink
//! endpoint accepts, and `StoredObject` the metadata row kept by the local
//! store.

pub mod entity;
pub mod object;
pub mod sink;

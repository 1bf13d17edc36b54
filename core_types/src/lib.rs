//! # Core Types
//!
//! This crate defines the identifiers shared by the remote-call layers.
//!
//! ## Key Types
//!
//! - [`ConnectionId`]: Unique identifier for a connection
//! - [`Tag`]: Correlation identifier for an outstanding call
//! - [`TagAllocator`]: Monotonic, thread-safe tag source

pub mod ids;

pub use ids::{ConnectionId, Tag, TagAllocator};

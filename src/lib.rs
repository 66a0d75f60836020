//! Ephemeral append-only log relay.
//!
//! A producer publishes one byte stream per opaque stream id over chunked
//! HTTP; subscribers tail it live or replay it from any byte offset,
//! optionally as Server-Sent Events. Streams expire after a TTL, with an
//! optional cold-storage origin for finished artifacts.

pub mod broker;
pub mod config;
pub mod error;
pub mod report;
pub mod server;
pub mod sse;
pub mod store;
pub mod util;

pub use error::{Error, Result};

//! Typed CDP domain payloads.
//!
//! Only the shapes the measurement core actually reads are typed; everything
//! else flows through as raw JSON. Event payloads tolerate unknown fields so
//! protocol additions in newer browsers never break parsing.

pub mod network;
pub mod page;
pub mod runtime;
pub mod tracing;

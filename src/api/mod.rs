//! Operation registry, response model, and the request façade built on the queue engine.

/// Activity operation registrations and the endpoint seam.
pub mod activity;
/// Optimistic caller flow over a local activity index.
pub mod optimistic;
/// Operation id to callable mapping.
pub mod registry;
/// Online/offline request façade with cache read-through and write-back.
pub mod request;
/// Response-like value returned by operations.
pub mod response;
/// Operation trait and cache path metadata.
pub mod traits;

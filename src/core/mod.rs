//! Request queue engine and its in-memory side queues.

/// Per-resource retry and dead-letter lists.
pub mod lanes;
/// Run-or-queue engine with drain and retry-chain handling.
pub mod queue;

//! Single-owner async runtime around the queue engine, and its event stream.

/// Event stream types emitted by the runtime.
pub mod events;
/// Handle and command loop implementation.
pub mod handle;

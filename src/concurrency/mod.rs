//! Thread-level machinery: the worker pool that drains the delay queue, and the
//! interrupt token it shares with running payloads.
pub mod interrupt;
pub mod pool;

//! Batched I/O against size-limited remote APIs.
//!
//! Splits arbitrarily large item lists into chunks that respect a per-call
//! item count (and optionally a payload byte cap), retries transient
//! failures with jittered exponential backoff, and narrows every retry to
//! the subset of items the remote side reported as unprocessed.

pub mod backoff;
pub mod chunk;
pub mod error;
pub mod executor;

pub use backoff::{Backoff, BackoffPolicy};
pub use chunk::{chunk_items, ChunkLimits};
pub use error::{BatchError, CallError};
pub use executor::{execute, execute_with, BatchOperation, ChunkResponse};

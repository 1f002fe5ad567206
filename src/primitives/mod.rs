//! Low-level primitives for building the storage engine.
//!
//! Includes byte utilities, I/O operations and the paging abstraction the
//! checker reads stores through.

/// Byte-level utilities and encoding/decoding.
pub mod bytes;

/// I/O abstractions and utilities.
///
/// Interfaces for reading/writing data and file operations.
pub mod io;

/// Page cache with fault and eviction tracing.
pub mod pager;

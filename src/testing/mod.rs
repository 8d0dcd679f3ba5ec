//! Testing utilities and mock implementations
//!
//! In-memory transport, scripted broker and a manually driven clock, so the
//! session can be exercised without sockets or real time.

pub mod mocks;

pub use mocks::*;

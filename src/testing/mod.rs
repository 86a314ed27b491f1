//! Testing utilities and mock implementations
//!
//! In-memory transport sessions for exercising the client without a
//! broker or a real socket.

pub mod mocks;

pub use mocks::*;

//! Testing utilities and mock implementations
//!
//! Provides a mock transport so the client and its telemetry can be
//! exercised without a running broker.

pub mod mocks;

pub use mocks::*;

//! Testing utilities and mock implementations
//!
//! Mocks for the sheet source, the stores and the queue so the pipeline can
//! be exercised without Google Sheets, a database or a broker.

pub mod mocks;

pub use mocks::*;

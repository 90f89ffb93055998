//! Request and response types for the typed convenience calls.

pub mod common;

pub use common::*;

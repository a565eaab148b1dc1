//! Application layer: page rendering and error reporting.

pub mod error;
pub mod render;

//! Presto: a filesystem page cache for rendered HTML, served through axum.

pub mod application;
pub mod cache;
pub mod config;
pub mod infra;
pub mod transform;

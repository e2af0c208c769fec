//! Common utilities and types shared across the mesh meeting components.

#![warn(clippy::pedantic)]

/// Module for common error types
pub mod error;

/// Module for common identifier types
pub mod types;

/// Module for common configuration
pub mod config;

/// Module for tracing subscriber setup
pub mod observability;

/// Module for secret types that prevent accidental logging
pub mod secret;

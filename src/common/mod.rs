//! Common types and utilities shared across refstore.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and config types
//! - Error types

pub mod config;
pub mod error;

pub use config::{ByteBufferPoolConfig, StoreConfig};
pub use error::{Error, Result};

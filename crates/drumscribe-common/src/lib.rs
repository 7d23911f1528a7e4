//! Common types and utilities for drumscribe checkpoint migration
//!
//! This crate provides the foundational pieces shared by the checkpoint
//! reader, the migration engine and the command-line converter: the error
//! taxonomy, migration configuration, and tensor dtype primitives.

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::*;
pub use types::*;

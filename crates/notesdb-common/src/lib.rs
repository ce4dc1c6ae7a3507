//! notesdb Common - Shared types and utilities
//!
//! This crate provides the error type, notesfile naming, caller identity
//! and configuration shared by the storage engine and its tools.

pub mod config;
pub mod error;
pub mod types;

pub use config::{DEFAULT_MAX_NOTE_LEN, HARD_MAX_TEXT_LEN, StoreConfig};
pub use error::{Error, Result};
pub use types::*;

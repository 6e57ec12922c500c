//! # clipdeck-core
//!
//! Core types and error handling for the Clipdeck soundboard engine.

pub mod error;
pub mod types;

pub use error::{Error, Result};
pub use types::*;

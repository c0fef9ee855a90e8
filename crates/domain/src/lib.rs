//! Shared domain types for the tether runtime: messages, tool calls,
//! streaming events, configuration, and the common error type.

pub mod config;
pub mod error;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};

//! Shared domain types for coderelay: the error taxonomy, configuration,
//! human-typed tokens, structured trace events and the atomic JSON file
//! helpers every persisted index is written through.

pub mod config;
pub mod error;
pub mod persist;
pub mod token;
pub mod trace;

pub use error::{Error, Result};
pub use token::Token;

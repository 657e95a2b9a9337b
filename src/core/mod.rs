/// Core Module for dbpeek
///
/// This module contains the database access layer and the shared error type.
/// Everything the shell does goes through the connector defined here.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{DbPeekError, Result};

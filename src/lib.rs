// Core infrastructure modules
pub mod core;

// Feature-specific modules
pub mod config;
pub mod executor;
pub mod export;
pub mod repl;
pub mod storage;

#[cfg(test)]
mod test_utils;

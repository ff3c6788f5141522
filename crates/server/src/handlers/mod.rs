//! HTTP request handlers.

pub mod encounters;
pub mod health;

pub use encounters::*;
pub use health::*;

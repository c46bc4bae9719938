//! Wire models for the Exobase control-plane API.

pub mod models;

pub use models::*;

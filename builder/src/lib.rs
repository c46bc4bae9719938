//! Stack builder library
//!
//! Core modules for the Exobase stack builder.

pub mod app;
pub mod deploy;
pub mod errors;
pub mod filesys;
pub mod http;
pub mod logs;
pub mod models;
pub mod server;
pub mod storage;
pub mod utils;

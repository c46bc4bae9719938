//! File system wrappers

pub mod dir;
pub mod file;

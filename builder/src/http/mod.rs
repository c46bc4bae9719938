//! Control-plane API client

pub mod client;
pub mod deployments;

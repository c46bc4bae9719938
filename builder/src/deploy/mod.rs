//! Deployment module

pub mod credentials;
pub mod defer;
pub mod executor;
pub mod fsm;
pub mod functions;
pub mod logbook;
pub mod outcome;
pub mod runner;
pub mod source;
pub mod template;
pub mod tool;
pub mod variables;
pub mod workspace;

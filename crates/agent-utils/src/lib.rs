//! Shared utilities for the stock analysis workspace
//!
//! This crate provides the pieces every other crate leans on: tracing setup
//! and typed access to environment configuration.

pub mod config;
pub mod logging;

pub use config::{EnvError, env_or, env_parse, env_var};
pub use logging::{LogFormat, init_tracing};

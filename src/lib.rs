//! Real-time chat session engine - library exports for the shell and tests
//!
//! (c) Softlandia 2025

pub mod config;
pub mod core;
pub mod error;
pub mod infrastructure;

pub use crate::config::ClientConfig;
pub use crate::core::client::ChatClient;
pub use crate::error::{Error, Result};

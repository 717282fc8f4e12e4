#![deny(unused)]
//! Core types, settings, and error definitions for Agentbox.
//!
//! This crate provides the foundational building blocks shared across the
//! sandbox subsystem.

pub mod config;
pub mod error;
pub mod fs_policy;

pub use config::SandboxSettings;
pub use error::{Error, Result};

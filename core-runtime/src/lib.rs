//! # Core Runtime Module
//!
//! Provides foundational runtime infrastructure for the relay dashboard engine:
//! - Logging and tracing infrastructure
//! - Configuration management
//! - Event bus system
//!
//! ## Overview
//!
//! This crate contains the runtime utilities that the sync engine and service
//! façade depend on. It establishes the logging conventions, the validated
//! configuration object and the event broadcasting used throughout the system.

pub mod config;
pub mod error;
pub mod events;
pub mod logging;

pub use config::EngineConfig;
pub use error::{Error, Result};

//! # Relay Provider
//!
//! Implements [`RemoteFileService`](bridge_traits::RemoteFileService) for the
//! relay storage API.
//!
//! ## Overview
//!
//! This crate provides:
//! - Bearer-authenticated, cache-busting requests for every call
//! - File listing with server-side filters (`files` or `results` payloads)
//! - Multipart uploads carrying an idempotency key
//! - Delete, pin/unpin and health probes
//! - A fixed deadline per call type; nothing is retried

pub mod connector;
pub mod error;
pub mod types;

pub use connector::RelayConnector;
pub use error::{RelayError, Result};

//! Relay dashboard engine.
//!
//! Re-exports the service façade so hosts can depend on a single crate and
//! pick bridges through features. With `desktop-shims` enabled the reqwest
//! client and the SQLite store are wired in by [`bootstrap_desktop`].

#[cfg(feature = "desktop-shims")]
pub use core_service::{bootstrap_desktop, CoreError, DashboardService, Result};

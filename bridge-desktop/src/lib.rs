//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest` (single attempt, per-request deadline, multipart)
//! - `KeyValueStore` using a SQLite file under the platform data directory
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{ReqwestHttpClient, SqliteKeyValueStore};
//!
//! #[tokio::main]
//! async fn main() -> bridge_traits::error::Result<()> {
//!     let http_client = ReqwestHttpClient::new()?;
//!     let store = SqliteKeyValueStore::open_default().await?;
//!
//!     // Hand both to EngineConfig::builder()
//!     Ok(())
//! }
//! ```

mod http;
mod kv_store;

pub use http::ReqwestHttpClient;
pub use kv_store::SqliteKeyValueStore;

//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for hosts running on a regular
//! operating system (servers, desktops, CI).
//!
//! ## Overview
//!
//! - `HttpClient` using `reqwest`
//! - `StagingStore` on the local filesystem using `tokio::fs`
//! - `Timer` using the Tokio timer wheel
//!
//! The system clock lives in `bridge_traits::time::SystemClock`.
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{LocalStagingStore, ReqwestHttpClient, TokioTimer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let http_client = ReqwestHttpClient::new();
//!     let staging = LocalStagingStore::new("/var/lib/device-sync/staging");
//!     let timer = TokioTimer;
//!
//!     // Hand them to the sync coordinator
//! }
//! ```

mod http;
mod staging;
mod timer;

pub use http::ReqwestHttpClient;
pub use staging::LocalStagingStore;
pub use timer::TokioTimer;

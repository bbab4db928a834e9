//! # Authentication Module
//!
//! Process-scoped credential caching for registry adapters.
//!
//! ## Overview
//!
//! Registry adapters authenticate with short-lived bearer tokens obtained
//! through the OAuth 2.0 client-credentials grant. [`TokenCache`] keeps one
//! token per endpoint and makes sure concurrent workflows never issue more
//! than one upstream request for the same endpoint at a time.
//!
//! ## Components
//!
//! - [`TokenCache`] - Single-flight, TTL-based cache keyed by endpoint
//! - [`TokenSource`] - Upstream token acquisition capability
//! - [`ClientCredentialsSource`] - Client-credentials grant over `HttpClient`

pub mod client_credentials;
pub mod error;
pub mod token_cache;
pub mod types;

pub use client_credentials::{ClientCredentialsSource, TokenSource};
pub use error::{AuthError, Result};
pub use token_cache::TokenCache;
pub use types::{AccessToken, ClientCredentials, TokenCacheEntry};

//! Test utilities for sbgate
//!
//! Provides utilities for end-to-end testing:
//! - Start/stop sbgate in-process on a random port
//! - Wait for the server to be ready
//! - A client for the HTTP surface
//!
//! ## Usage
//!
//! ```rust,no_run
//! use sbgate_test::TestServer;
//!
//! #[tokio::test]
//! async fn test_queue() {
//!     let server = TestServer::start().await.unwrap();
//!     let client = server.client();
//!
//!     client.create_queue("orders").await.unwrap();
//!     client.send_to_queue("orders", "hello").await.unwrap();
//! }
//! ```

pub mod client;
pub mod server;

pub use client::{ClientError, ReceivedPayload, SbgateClient};
pub use server::{TestError, TestServer};

/// Timeout for waiting on the server
pub const STARTUP_TIMEOUT_SECS: u64 = 10;

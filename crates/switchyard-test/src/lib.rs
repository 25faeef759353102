//! # Switchyard Test
//!
//! Test utilities for Switchyard: a WebSocket client that plays the browser's
//! role, over TCP or over in-memory streams wired straight into a
//! [`WsServer`](switchyard_ws::WsServer).
//!
//! ## Key Features
//!
//! - **In-Memory Testing**: `tokio::io::duplex` streams, no port binding
//! - **Request Builder**: valid upgrade requests by default, with knobs to
//!   break every header the engine checks
//! - **Masked Frames**: every frame is masked the way real clients mask them
//! - **Raw Access**: send arbitrary bytes to provoke protocol errors
//!
//! ## Example
//!
//! ```ignore
//! use switchyard_test::{UpgradeRequestBuilder, WsTestClient};
//!
//! #[tokio::test]
//! async fn test_echo() {
//!     let server = echo_server();
//!     let mut client = WsTestClient::in_memory(&server, &UpgradeRequestBuilder::new("/echo"))
//!         .await
//!         .unwrap();
//!
//!     client.send_text("ping").await.unwrap();
//!     assert_eq!(client.recv_text().await.unwrap(), "ping");
//!
//!     let status = client.close_and_wait(1000, "bye").await.unwrap();
//!     assert_eq!(status.map(|(code, _)| code), Some(1000));
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/switchyard-test/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod client;
mod error;
mod request;
mod response;

pub use client::{read_response, WsTestClient, DEFAULT_TIMEOUT};
pub use error::{TestClientError, TestResult};
pub use request::{generate_key, UpgradeRequestBuilder};
pub use response::HandshakeResponse;

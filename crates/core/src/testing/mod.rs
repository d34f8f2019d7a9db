//! Testing utilities and mock implementations.
//!
//! Provides a mock transfer client so orchestrator behavior can be
//! tested end to end without a running download client.
//!
//! # Example
//!
//! ```rust,ignore
//! use slskq_core::testing::MockTransferClient;
//!
//! let client = MockTransferClient::new();
//!
//! // Drive a transfer from the test
//! client.set_progress("peer@song.flac", 512, 2048).await;
//! client.complete_transfer("peer@song.flac").await;
//! ```

mod mock_transfer_client;

pub use mock_transfer_client::{MockTransferClient, RecordedStart};

//! Shared test utilities for eoforge integration tests.
//!
//! This crate provides:
//! - [`JobFixture`]: a job wired to in-memory collaborators and a scratch
//!   output directory
//! - [`TracingMemoryBackend`]: in-memory object storage with operation
//!   recording and failure injection
//! - Small builders for bands and configuration documents
//!
//! # Example
//!
//! ```rust,ignore
//! use eoforge_test_utils::JobFixture;
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let fixture = JobFixture::new(&["ga_ls8c_ard_3"]);
//!     let dataset = fixture.add_dataset("ga_ls8c_ard_3", 1);
//!     let outcome = fixture.runner().run_one(dataset.id, false).await.unwrap();
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod storage;

pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("eoforge=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}

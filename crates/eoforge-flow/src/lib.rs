//! # eoforge-flow
//!
//! Task generation, transform execution, publishing and queue mediation for
//! Earth-observation derivative products.
//!
//! A job pairs one configuration with a catalog. Every source dataset the job
//! selects becomes a [`Task`], which is given a deterministic output identity,
//! run through a registered transform, assembled into a package with EO3
//! metadata, and published to its output location. Tasks run directly
//! ([`Runner::run_one`], [`Runner::run_many`]) or through a work queue
//! ([`QueueMediator`], [`Runner::run_from_queue`]).
//!
//! ## Guarantees
//!
//! - **Deterministic**: the same source, transform version and tags always
//!   produce the same output id, so re-running a task overwrites rather than
//!   duplicates
//! - **At-least-once**: queue messages are acknowledged only after the output
//!   has been published
//! - **Isolated**: each task owns its scratch directory; a failure in one task
//!   never affects another
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use eoforge_core::{Configuration, DatasetId};
//! use eoforge_flow::catalog::InMemoryCatalog;
//! use eoforge_flow::{JobContext, Runner};
//!
//! # async fn run() -> eoforge_flow::Result<()> {
//! let config = Configuration::from_yaml_str(
//!     "specification:\n  product: ga_ls8c_ard_3\n  measurements: [red]\n  transform: passthrough\noutput:\n  location: /tmp/out\n",
//! )?;
//! let ctx = JobContext::new(Arc::new(config), Arc::new(InMemoryCatalog::new()));
//! let outcome = Runner::new(ctx).run_one(DatasetId::generate(), false).await?;
//! println!("wrote {}", outcome.published.metadata);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod assembler;
#[cfg(feature = "aws")]
pub mod aws;
pub mod catalog;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod geotiff;
pub mod invoker;
pub mod locator;
pub mod mediator;
pub mod metrics;
pub mod publish;
pub mod raster;
pub mod resample;
pub mod runner;
pub mod source;
pub mod stac;
pub mod task;
pub mod transform;

pub use context::JobContext;
pub use error::{Error, Result};
pub use locator::DatasetLocator;
pub use mediator::QueueMediator;
pub use runner::{BatchReport, Runner, TaskOutcome};
pub use task::Task;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::catalog::{Catalog, DatasetRecord, SearchFilter};
    pub use crate::context::JobContext;
    pub use crate::dispatch::{QueueProvider, WorkQueue};
    pub use crate::error::{Error, Result};
    pub use crate::locator::DatasetLocator;
    pub use crate::mediator::QueueMediator;
    pub use crate::metrics::FlowMetrics;
    pub use crate::runner::{BatchReport, Runner};
    pub use crate::task::{Task, TaskIdentity};
    pub use crate::transform::{Transform, TransformRegistry};
}

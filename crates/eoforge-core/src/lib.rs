//! # eoforge-core
//!
//! Core abstractions shared by every eoforge component.
//!
//! - **Identifiers**: strongly-typed dataset ids
//! - **Identity**: deterministic output ids from transform and source inputs
//! - **Configuration**: the typed job document and its loader
//! - **Locations**: filesystem paths versus object-storage URLs
//! - **Storage**: the object storage contract used to publish outputs
//! - **Errors**: shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `eoforge-core` holds no orchestration logic. Catalog access, transforms,
//! queues and publishing live in `eoforge-flow` and build on the primitives
//! defined here.
//!
//! ## Example
//!
//! ```rust
//! use std::collections::BTreeMap;
//! use eoforge_core::prelude::*;
//!
//! let source = DatasetId::generate();
//! let a = identity("ndvi", "1.0", &[source], &BTreeMap::new()).unwrap();
//! let b = identity("ndvi", "1.0", &[source], &BTreeMap::new()).unwrap();
//! assert_eq!(a, b);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod canonical_json;
pub mod config;
pub mod error;
pub mod id;
pub mod identity;
pub mod loader;
pub mod location;
pub mod observability;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use eoforge_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{
        Configuration, OutputSettings, ProcessingSettings, Resampling, ResamplingPolicy,
        Specification,
    };
    pub use crate::error::{Error, Result};
    pub use crate::id::DatasetId;
    pub use crate::identity::{identity, major_minor};
    pub use crate::loader::{lookup, lookup_path, ConfigLoader};
    pub use crate::location::{Location, ObjectUrl};
    pub use crate::storage::{MemoryBackend, ObjectMeta, PutOptions, StorageBackend};
}

pub use config::Configuration;
pub use error::{Error, Result};
pub use id::DatasetId;
pub use loader::ConfigLoader;
pub use location::{Location, ObjectUrl};
pub use observability::{init_logging, LogFormat};
pub use storage::{CannedAcl, MemoryBackend, ObjectMeta, PutOptions, StorageBackend};

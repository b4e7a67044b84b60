//! # indexio
//!
//! Tagged binary serialization for similarity-search index structures.
//!
//! An in-memory index graph (flat, IVF, product-quantized, HNSW, composite and
//! binary variants) is written to any byte medium and read back into an
//! equivalent graph. Load flags select what is materialized on read: code
//! payloads and inverted lists can be skipped or memory-mapped, and derived
//! lookup tables can be left unbuilt.
//!
//! ## Layout
//!
//! - [`storage`]: medium adapters and the little-endian primitive codec
//! - [`registry`]: four-character tags for every concrete variant
//! - [`flags`]: load flags and their validation
//! - [`index`], [`invlists`], [`pq`], [`transform`]: the object graph
//! - [`io`]: the entry points, re-exported here

pub mod cli;
pub mod config;
pub mod error;
pub mod flags;
pub mod index;
pub mod invlists;
pub mod io;
pub mod pq;
pub mod registry;
pub mod storage;
pub mod transform;

pub use config::IoConfig;
pub use error::{ErrorKind, IndexIoError, Result};
pub use flags::{IoFlags, LoadPolicy};
pub use index::{CodeStorage, Index, IndexBinary, IndexHeader, IndexKind, MetricType};
pub use invlists::InvertedLists;
pub use io::*;
pub use pq::ProductQuantizer;
pub use registry::Tag;
pub use storage::{IoReader, IoWriter, MappingScope};
pub use transform::VectorTransform;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Medium abstraction and primitive codec.
//!
//! Every encoder and decoder talks to an [`IoReader`] or [`IoWriter`]; which
//! concrete medium sits behind it (named file, caller-owned handle, arbitrary
//! stream, in-memory buffer) is invisible to the codecs.
//!
//! # Media
//!
//! - [`file::FileReader`] / [`file::FileWriter`]: open a path, release it on drop
//! - [`file::HandleReader`] / [`file::HandleWriter`]: borrow a caller-owned file
//! - [`memory::StreamReader`] / [`memory::StreamWriter`]: wrap any `Read`/`Write`
//! - [`memory::MemoryReader`] / [`memory::MemoryWriter`]: in-memory buffers
//!
//! [`structured`] holds the little-endian primitive codec built on top of
//! them, and [`mmap`] the mapping scope used by the mapped load flags.
//!
//! # Example
//!
//! ```
//! use indexio::config::IoConfig;
//! use indexio::storage::{MemoryReader, MemoryWriter, StructReader, StructWriter};
//!
//! # fn main() -> indexio::error::Result<()> {
//! let mut sink = MemoryWriter::new();
//! StructWriter::new(&mut sink).write_u32_vec(&[1, 2, 3])?;
//!
//! let mut source = MemoryReader::new(sink.into_inner());
//! let mut reader = StructReader::new(&mut source, &IoConfig::default());
//! assert_eq!(reader.read_u32_vec("values")?, vec![1, 2, 3]);
//! # Ok(())
//! # }
//! ```

pub mod file;
pub mod memory;
pub mod mmap;
pub mod structured;
pub mod traits;

pub use file::{FileReader, FileWriter, HandleReader, HandleWriter};
pub use memory::{MemoryReader, MemoryWriter, StreamReader, StreamWriter};
pub use mmap::{MappedBytes, MappingScope, MmapMapper, RegionMapper, VecMapper};
pub use structured::{StructReader, StructWriter};
pub use traits::{IoReader, IoWriter};

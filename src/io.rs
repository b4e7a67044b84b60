//! Top-level entry points.
//!
//! Every entry point comes in a medium-generic form taking `&mut dyn IoReader`
//! or `&mut dyn IoWriter`, plus convenience forms for a named path and an open
//! file handle. Load flags are validated once, here, before any byte is read.
//!
//! # Example
//!
//! ```
//! use indexio::{IoFlags, MetricType, Index, read_index, write_index};
//! use indexio::storage::{MemoryReader, MemoryWriter};
//!
//! # fn main() -> indexio::error::Result<()> {
//! let index = Index::flat_from_vectors(2, MetricType::L2, &[0.0, 1.0, 2.0, 3.0])?;
//!
//! let mut sink = MemoryWriter::new();
//! write_index(&index, &mut sink, IoFlags::NONE)?;
//!
//! let mut source = MemoryReader::new(sink.into_inner());
//! let loaded = read_index(&mut source, IoFlags::NONE)?;
//! assert_eq!(loaded, index);
//! # Ok(())
//! # }
//! ```

mod binary;
mod context;
mod index;
mod invlists;
mod pq;
mod transform;

use std::fs::File;
use std::path::Path;

use log::debug;

use crate::config::IoConfig;
use crate::error::{IndexIoError, Result};
use crate::flags::IoFlags;
use crate::index::{Index, IndexBinary};
use crate::invlists::InvertedLists;
use crate::pq::ProductQuantizer;
use crate::registry::{MV_MARKER, Tag};
use crate::storage::file::{FileReader, FileWriter, HandleReader, HandleWriter};
use crate::storage::mmap::MappingScope;
use crate::storage::structured::{StructReader, StructWriter};
use crate::storage::traits::{IoReader, IoWriter};
use crate::transform::VectorTransform;

use self::context::{ReadContext, check_mapping_prerequisites};
use self::index::WriteOptions;

fn write_options(flags: IoFlags, operation: &str) -> Result<WriteOptions> {
    flags.restrict_to(IoFlags::WRITE_SUBSET, operation)?;
    Ok(WriteOptions {
        skip_storage: flags.contains(IoFlags::SKIP_STORAGE),
    })
}

// ---------------------------------------------------------------------------
// Float indexes
// ---------------------------------------------------------------------------

/// Serialize `index` to `writer`.
///
/// Only [`IoFlags::SKIP_STORAGE`] is accepted; it writes HNSW storage as
/// `null`.
pub fn write_index(index: &Index, writer: &mut dyn IoWriter, flags: IoFlags) -> Result<()> {
    let options = write_options(flags, "write_index")?;
    debug!("write_index: {} d={} ntotal={}", index.tag(), index.d(), index.ntotal());

    let mut w = StructWriter::new(writer);
    index::write_index_root(&mut w, index, options)?;
    w.flush()
}

/// Serialize `index` to a new file at `path`.
pub fn write_index_to_path<P: AsRef<Path>>(index: &Index, path: P, flags: IoFlags) -> Result<()> {
    let mut writer = FileWriter::create(path, &IoConfig::default())?;
    write_index(index, &mut writer, flags)?;
    writer.flush_and_sync()
}

/// Serialize `index` at the current position of a caller-owned file.
pub fn write_index_to_file(index: &Index, file: &mut File, flags: IoFlags) -> Result<()> {
    let mut writer = HandleWriter::new(file, &IoConfig::default());
    write_index(index, &mut writer, flags)
}

/// Deserialize an index from `reader`.
pub fn read_index(reader: &mut dyn IoReader, flags: IoFlags) -> Result<Index> {
    read_index_with_config(reader, flags, &IoConfig::default(), None)
}

/// Deserialize an index, mapping storage through `scope`.
///
/// Required for [`IoFlags::MMAP`] and [`IoFlags::MMAP_IFC`]. The returned
/// graph only holds weak views; keep `scope` alive while using it.
pub fn read_index_mapped(
    reader: &mut dyn IoReader,
    flags: IoFlags,
    scope: &MappingScope,
) -> Result<Index> {
    read_index_with_config(reader, flags, &IoConfig::default(), Some(scope))
}

/// Deserialize an index from the file at `path`.
pub fn read_index_from_path<P: AsRef<Path>>(path: P, flags: IoFlags) -> Result<Index> {
    let config = IoConfig::default();
    let mut reader = FileReader::open(path, &config)?;
    read_index_with_config(&mut reader, flags, &config, None)
}

/// Deserialize an index from the file at `path`, mapping storage through `scope`.
pub fn read_index_from_path_mapped<P: AsRef<Path>>(
    path: P,
    flags: IoFlags,
    scope: &MappingScope,
) -> Result<Index> {
    let config = IoConfig::default();
    let mut reader = FileReader::open(path, &config)?;
    read_index_with_config(&mut reader, flags, &config, Some(scope))
}

/// Deserialize an index at the current position of a caller-owned file.
///
/// On success the handle is positioned right after the index.
pub fn read_index_from_file(file: &mut File, flags: IoFlags) -> Result<Index> {
    let mut reader = HandleReader::new(file)?;
    read_index(&mut reader, flags)
}

/// Deserialize an index with an explicit configuration and optional scope.
pub fn read_index_with_config(
    reader: &mut dyn IoReader,
    flags: IoFlags,
    config: &IoConfig,
    scope: Option<&MappingScope>,
) -> Result<Index> {
    let policy = flags.policy()?;
    debug!(
        "read_index: flags={flags:?} source={:?}",
        reader.source_path()
    );
    check_mapping_prerequisites(&policy, scope, reader.source_path())?;

    let mut ctx = ReadContext::new(policy, scope);
    let mut r = StructReader::new(reader, config);
    let mut index = index::read_index_root(&mut r, &mut ctx)?;

    if policy.with_norm && !ctx.norms_loaded {
        return Err(IndexIoError::policy(format!(
            "WITH_NORM is not supported by {} indexes",
            index.tag()
        )));
    }

    index.build_derived_tables(&policy)?;
    if policy.read_only {
        index.set_read_only();
    }
    debug!(
        "read_index: decoded {} d={} ntotal={}",
        index.tag(),
        index.d(),
        index.ntotal()
    );
    Ok(index)
}

// ---------------------------------------------------------------------------
// Binary indexes
// ---------------------------------------------------------------------------

/// Serialize a binary index to `writer`.
pub fn write_index_binary(
    index: &IndexBinary,
    writer: &mut dyn IoWriter,
    flags: IoFlags,
) -> Result<()> {
    let options = write_options(flags, "write_index_binary")?;
    debug!("write_index_binary: {} d={}", index.tag(), index.header.d);

    let mut w = StructWriter::new(writer);
    binary::write_binary_node(&mut w, index, options)?;
    w.flush()
}

/// Serialize a binary index to a new file at `path`.
pub fn write_index_binary_to_path<P: AsRef<Path>>(
    index: &IndexBinary,
    path: P,
    flags: IoFlags,
) -> Result<()> {
    let mut writer = FileWriter::create(path, &IoConfig::default())?;
    write_index_binary(index, &mut writer, flags)?;
    writer.flush_and_sync()
}

/// Serialize a binary index at the current position of a caller-owned file.
pub fn write_index_binary_to_file(
    index: &IndexBinary,
    file: &mut File,
    flags: IoFlags,
) -> Result<()> {
    let mut writer = HandleWriter::new(file, &IoConfig::default());
    write_index_binary(index, &mut writer, flags)
}

/// Deserialize a binary index from `reader`.
pub fn read_index_binary(reader: &mut dyn IoReader, flags: IoFlags) -> Result<IndexBinary> {
    read_index_binary_with_config(reader, flags, &IoConfig::default(), None)
}

/// Deserialize a binary index, mapping storage through `scope`.
pub fn read_index_binary_mapped(
    reader: &mut dyn IoReader,
    flags: IoFlags,
    scope: &MappingScope,
) -> Result<IndexBinary> {
    read_index_binary_with_config(reader, flags, &IoConfig::default(), Some(scope))
}

/// Deserialize a binary index from the file at `path`.
pub fn read_index_binary_from_path<P: AsRef<Path>>(path: P, flags: IoFlags) -> Result<IndexBinary> {
    let config = IoConfig::default();
    let mut reader = FileReader::open(path, &config)?;
    read_index_binary_with_config(&mut reader, flags, &config, None)
}

/// Deserialize a binary index from `path`, mapping storage through `scope`.
pub fn read_index_binary_from_path_mapped<P: AsRef<Path>>(
    path: P,
    flags: IoFlags,
    scope: &MappingScope,
) -> Result<IndexBinary> {
    let config = IoConfig::default();
    let mut reader = FileReader::open(path, &config)?;
    read_index_binary_with_config(&mut reader, flags, &config, Some(scope))
}

/// Deserialize a binary index at the current position of a caller-owned file.
pub fn read_index_binary_from_file(file: &mut File, flags: IoFlags) -> Result<IndexBinary> {
    let mut reader = HandleReader::new(file)?;
    read_index_binary(&mut reader, flags)
}

/// Deserialize a binary index with an explicit configuration and optional scope.
pub fn read_index_binary_with_config(
    reader: &mut dyn IoReader,
    flags: IoFlags,
    config: &IoConfig,
    scope: Option<&MappingScope>,
) -> Result<IndexBinary> {
    flags.restrict_to(IoFlags::BINARY_SUBSET, "read_index_binary")?;
    let policy = flags.policy()?;
    debug!(
        "read_index_binary: flags={flags:?} source={:?}",
        reader.source_path()
    );
    check_mapping_prerequisites(&policy, scope, reader.source_path())?;

    let mut ctx = ReadContext::new(policy, scope);
    let mut r = StructReader::new(reader, config);
    let mut index = binary::read_binary_node(&mut r, &mut ctx)?;
    if policy.read_only {
        index.set_read_only();
    }
    Ok(index)
}

// ---------------------------------------------------------------------------
// Transforms and quantizers
// ---------------------------------------------------------------------------

/// Serialize a vector transform.
pub fn write_vector_transform(vt: &VectorTransform, writer: &mut dyn IoWriter) -> Result<()> {
    let mut w = StructWriter::new(writer);
    transform::write_transform(&mut w, vt)?;
    w.flush()
}

/// Serialize a vector transform to a new file at `path`.
pub fn write_vector_transform_to_path<P: AsRef<Path>>(vt: &VectorTransform, path: P) -> Result<()> {
    let mut writer = FileWriter::create(path, &IoConfig::default())?;
    write_vector_transform(vt, &mut writer)?;
    writer.flush_and_sync()
}

/// Deserialize a vector transform.
pub fn read_vector_transform(reader: &mut dyn IoReader) -> Result<VectorTransform> {
    let mut r = StructReader::new(reader, &IoConfig::default());
    transform::read_transform(&mut r)
}

/// Deserialize a vector transform from the file at `path`.
pub fn read_vector_transform_from_path<P: AsRef<Path>>(path: P) -> Result<VectorTransform> {
    let mut reader = FileReader::open(path, &IoConfig::default())?;
    read_vector_transform(&mut reader)
}

/// Serialize a product quantizer.
pub fn write_product_quantizer(pq: &ProductQuantizer, writer: &mut dyn IoWriter) -> Result<()> {
    let mut w = StructWriter::new(writer);
    pq::write_pq(&mut w, pq)?;
    w.flush()
}

/// Serialize a product quantizer to a new file at `path`.
pub fn write_product_quantizer_to_path<P: AsRef<Path>>(pq: &ProductQuantizer, path: P) -> Result<()> {
    let mut writer = FileWriter::create(path, &IoConfig::default())?;
    write_product_quantizer(pq, &mut writer)?;
    writer.flush_and_sync()
}

/// Deserialize a product quantizer. The SDC table is not built.
pub fn read_product_quantizer(reader: &mut dyn IoReader) -> Result<ProductQuantizer> {
    let mut r = StructReader::new(reader, &IoConfig::default());
    pq::read_pq(&mut r)
}

/// Deserialize a product quantizer from the file at `path`.
pub fn read_product_quantizer_from_path<P: AsRef<Path>>(path: P) -> Result<ProductQuantizer> {
    let mut reader = FileReader::open(path, &IoConfig::default())?;
    read_product_quantizer(&mut reader)
}

// ---------------------------------------------------------------------------
// Inverted lists
// ---------------------------------------------------------------------------

/// Serialize inverted lists on their own.
pub fn write_inverted_lists(invlists: &InvertedLists, writer: &mut dyn IoWriter) -> Result<()> {
    let mut w = StructWriter::new(writer);
    invlists::write_invlists(&mut w, invlists)?;
    w.flush()
}

/// Deserialize inverted lists.
///
/// Accepts [`IoFlags::SKIP_IVF_DATA`] and [`IoFlags::ONDISK_SAME_DIR`];
/// [`IoFlags::MMAP`] needs [`read_inverted_lists_mapped`].
pub fn read_inverted_lists(reader: &mut dyn IoReader, flags: IoFlags) -> Result<InvertedLists> {
    read_inverted_lists_inner(reader, flags, None)
}

/// Deserialize inverted lists, mapping them through `scope`.
pub fn read_inverted_lists_mapped(
    reader: &mut dyn IoReader,
    flags: IoFlags,
    scope: &MappingScope,
) -> Result<InvertedLists> {
    read_inverted_lists_inner(reader, flags, Some(scope))
}

fn read_inverted_lists_inner(
    reader: &mut dyn IoReader,
    flags: IoFlags,
    scope: Option<&MappingScope>,
) -> Result<InvertedLists> {
    flags.restrict_to(IoFlags::INVLISTS_SUBSET, "read_inverted_lists")?;
    let policy = flags.policy()?;
    check_mapping_prerequisites(&policy, scope, reader.source_path())?;

    let ctx = ReadContext::new(policy, scope);
    let mut r = StructReader::new(reader, &IoConfig::default());
    invlists::read_invlists(&mut r, &ctx)
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Write one little-endian `u32`.
pub fn write_value(value: u32, writer: &mut dyn IoWriter) -> Result<()> {
    let mut w = StructWriter::new(writer);
    w.write_u32(value)?;
    w.flush()
}

/// Read one little-endian `u32`.
pub fn read_value(reader: &mut dyn IoReader) -> Result<u32> {
    StructReader::new(reader, &IoConfig::default()).read_u32("value")
}

/// Write a `u64` count followed by the values.
pub fn write_vector(values: &[u32], writer: &mut dyn IoWriter) -> Result<()> {
    let mut w = StructWriter::new(writer);
    w.write_u32_vec(values)?;
    w.flush()
}

/// Read a `u64` count followed by that many values.
pub fn read_vector(reader: &mut dyn IoReader) -> Result<Vec<u32>> {
    StructReader::new(reader, &IoConfig::default()).read_u32_vec("vector")
}

/// Write the multi-vector marker.
pub fn write_mv(writer: &mut dyn IoWriter) -> Result<()> {
    let mut w = StructWriter::new(writer);
    w.write_tag(MV_MARKER)?;
    w.flush()
}

/// Consume one `u32` and report whether it is the multi-vector marker.
pub fn read_is_mv(reader: &mut dyn IoReader) -> Result<bool> {
    let tag: Tag = StructReader::new(reader, &IoConfig::default()).read_tag("tag")?;
    Ok(tag == MV_MARKER)
}

/// Report whether the file at `path` starts with the multi-vector marker.
pub fn read_is_mv_path<P: AsRef<Path>>(path: P) -> Result<bool> {
    let mut reader = FileReader::open(path, &IoConfig::default())?;
    read_is_mv(&mut reader)
}

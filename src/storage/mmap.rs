//! Memory-mapped storage for loads with the `MMAP` / `MMAP_IFC` flags.
//!
//! # Ownership
//!
//! Mapped regions are owned by a caller-held [`MappingScope`]. Decoded objects
//! only keep [`MappedBytes`], a non-owning (`Weak`) view into a region. The
//! scope must stay alive for as long as the decoded graph reads its mapped
//! storage. Once the scope is released or dropped every view fails with a
//! lifetime error instead of touching unmapped memory.
//!
//! ```
//! use indexio::storage::mmap::{MappingScope, VecMapper};
//!
//! # fn main() -> indexio::error::Result<()> {
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("data.bin");
//! std::fs::write(&path, b"0123456789").unwrap();
//!
//! let scope = MappingScope::with_mapper(VecMapper::default());
//! let view = scope.map_file(&path)?.slice(2, 3, "example")?;
//! assert_eq!(&*view.bytes()?, b"234");
//!
//! scope.release();
//! assert!(view.bytes().is_err());
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::fmt::Debug;
use std::fs::File;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use memmap2::{Mmap, MmapOptions};
use parking_lot::Mutex;

use crate::error::{IndexIoError, Result};

/// A contiguous region of mapped bytes.
pub trait MappedRegion: Send + Sync + Debug {
    /// The mapped bytes.
    fn as_bytes(&self) -> &[u8];
}

/// Produces mapped regions for files.
pub trait RegionMapper: Send + Sync + Debug {
    /// Map the whole of `path`.
    fn map_file(&self, path: &Path) -> Result<Arc<dyn MappedRegion>>;
}

impl MappedRegion for Mmap {
    fn as_bytes(&self) -> &[u8] {
        self
    }
}

/// Mapper backed by `memmap2`.
#[derive(Debug, Default, Clone, Copy)]
pub struct MmapMapper;

impl RegionMapper for MmapMapper {
    fn map_file(&self, path: &Path) -> Result<Arc<dyn MappedRegion>> {
        let file = File::open(path)
            .map_err(|e| IndexIoError::io(format!("open {} for mapping", path.display()), e))?;

        // SAFETY: the mapping is read-only; callers must not truncate the file
        // while the scope is alive.
        let mmap = unsafe {
            MmapOptions::new()
                .map(&file)
                .map_err(|e| IndexIoError::io(format!("mmap {}", path.display()), e))?
        };

        Ok(Arc::new(mmap))
    }
}

/// An owned byte buffer standing in for a mapping.
#[derive(Debug, Clone)]
pub struct VecRegion(pub Vec<u8>);

impl MappedRegion for VecRegion {
    fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Mapper that copies the file into memory.
///
/// Behaves like a mapping from the decoder's point of view; useful where
/// `mmap` is not available and as a test double.
#[derive(Debug, Default, Clone, Copy)]
pub struct VecMapper;

impl RegionMapper for VecMapper {
    fn map_file(&self, path: &Path) -> Result<Arc<dyn MappedRegion>> {
        let data = std::fs::read(path)
            .map_err(|e| IndexIoError::io(format!("read {} for mapping", path.display()), e))?;
        Ok(Arc::new(VecRegion(data)))
    }
}

/// Owner of the mappings referenced by a decoded object graph.
#[derive(Debug)]
pub struct MappingScope {
    mapper: Box<dyn RegionMapper>,
    regions: Mutex<HashMap<PathBuf, Arc<dyn MappedRegion>>>,
}

impl Default for MappingScope {
    fn default() -> Self {
        Self::new()
    }
}

impl MappingScope {
    /// Create a scope that maps files with `mmap`.
    pub fn new() -> Self {
        Self::with_mapper(MmapMapper)
    }

    /// Create a scope using a custom mapper.
    pub fn with_mapper<M: RegionMapper + 'static>(mapper: M) -> Self {
        MappingScope {
            mapper: Box::new(mapper),
            regions: Mutex::new(HashMap::new()),
        }
    }

    /// Map `path` (once per scope) and return a view of the whole file.
    pub fn map_file(&self, path: &Path) -> Result<MappedBytes> {
        let mut regions = self.regions.lock();
        let region = match regions.get(path) {
            Some(region) => Arc::clone(region),
            None => {
                let region = self.mapper.map_file(path)?;
                log::debug!(
                    "mapped {} ({} bytes)",
                    path.display(),
                    region.as_bytes().len()
                );
                regions.insert(path.to_path_buf(), Arc::clone(&region));
                region
            }
        };

        Ok(MappedBytes {
            len: region.as_bytes().len(),
            region: Arc::downgrade(&region),
            path: path.to_path_buf(),
            offset: 0,
        })
    }

    /// Number of files currently mapped.
    pub fn len(&self) -> usize {
        self.regions.lock().len()
    }

    /// True when nothing is mapped.
    pub fn is_empty(&self) -> bool {
        self.regions.lock().is_empty()
    }

    /// Drop every mapping. Views created from this scope stop working.
    pub fn release(&self) {
        let mut regions = self.regions.lock();
        if !regions.is_empty() {
            log::debug!("releasing {} mapping(s)", regions.len());
        }
        regions.clear();
    }
}

/// A non-owning view of a byte range inside a mapped file.
#[derive(Debug, Clone)]
pub struct MappedBytes {
    region: Weak<dyn MappedRegion>,
    path: PathBuf,
    offset: usize,
    len: usize,
}

impl MappedBytes {
    /// The mapped file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Offset of the view inside the file.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Length of the view in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for an empty view.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// True while the owning scope still holds the mapping.
    pub fn is_alive(&self) -> bool {
        self.region.strong_count() > 0
    }

    /// A sub-view of `len` bytes starting `offset` bytes into this view.
    pub fn slice(&self, offset: usize, len: usize, field: &str) -> Result<MappedBytes> {
        let end = offset.checked_add(len);
        if end.is_none_or(|end| end > self.len) {
            return Err(IndexIoError::format(
                field,
                format!(
                    "range {offset}+{len} exceeds mapped view of {} bytes in {}",
                    self.len,
                    self.path.display()
                ),
            ));
        }

        Ok(MappedBytes {
            region: self.region.clone(),
            path: self.path.clone(),
            offset: self.offset + offset,
            len,
        })
    }

    /// Borrow the bytes. Fails once the mapping has been released.
    pub fn bytes(&self) -> Result<MappedGuard> {
        let region = self.region.upgrade().ok_or_else(|| {
            IndexIoError::lifetime(format!(
                "mapping of {} was released; bytes {}..{} are no longer accessible",
                self.path.display(),
                self.offset,
                self.offset + self.len
            ))
        })?;

        if self.offset + self.len > region.as_bytes().len() {
            return Err(IndexIoError::lifetime(format!(
                "mapping of {} shrank below {} bytes",
                self.path.display(),
                self.offset + self.len
            )));
        }

        Ok(MappedGuard {
            region,
            start: self.offset,
            end: self.offset + self.len,
        })
    }
}

impl PartialEq for MappedBytes {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.offset == other.offset && self.len == other.len
    }
}

/// Keeps a region alive while its bytes are borrowed.
#[derive(Debug)]
pub struct MappedGuard {
    region: Arc<dyn MappedRegion>,
    start: usize,
    end: usize,
}

impl Deref for MappedGuard {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.region.as_bytes()[self.start..self.end]
    }
}

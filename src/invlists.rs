//! Inverted list models.
//!
//! An inverted list set holds, per partition, the ids and codes of the
//! vectors assigned to it. Three backends are persisted:
//!
//! - [`InvertedLists::Null`]: no storage at all;
//! - [`InvertedLists::Array`]: lists held in memory. Loading with
//!   `SKIP_IVF_DATA` keeps only the sizes;
//! - [`InvertedLists::OnDisk`]: lists stored in a separate data file, read
//!   on demand or through a mapping.
//!
//! On-disk data layout per list: `capacity * code_size` code bytes followed by
//! `capacity` little-endian `i64` ids, starting at the list's `offset`.

use std::fs::File;
use std::io::{BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::{IndexIoError, Result};
use crate::registry::InvlistsTag;
use crate::storage::mmap::MappedBytes;

/// Bytes per stored id.
pub const ID_SIZE: usize = 8;

/// In-memory inverted lists.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayInvertedLists {
    pub code_size: usize,
    pub sizes: Vec<usize>,
    pub ids: Vec<Vec<i64>>,
    pub codes: Vec<Vec<u8>>,
    /// False when only the sizes were loaded.
    pub loaded: bool,
}

impl ArrayInvertedLists {
    /// Empty lists.
    pub fn new(nlist: usize, code_size: usize) -> Self {
        ArrayInvertedLists {
            code_size,
            sizes: vec![0; nlist],
            ids: vec![Vec::new(); nlist],
            codes: vec![Vec::new(); nlist],
            loaded: true,
        }
    }

    /// Lists whose contents were not loaded.
    pub fn sizes_only(code_size: usize, sizes: Vec<usize>) -> Self {
        ArrayInvertedLists {
            code_size,
            sizes,
            ids: Vec::new(),
            codes: Vec::new(),
            loaded: false,
        }
    }

    /// Append one entry to `list_no`.
    pub fn add_entry(&mut self, list_no: usize, id: i64, code: &[u8]) -> Result<()> {
        if !self.loaded {
            return Err(IndexIoError::policy(
                "cannot add to inverted lists loaded without their contents",
            ));
        }
        check_list(list_no, self.sizes.len())?;
        if code.len() != self.code_size {
            return Err(IndexIoError::format(
                "ilar.add_entry",
                format!("code has {} bytes, expected {}", code.len(), self.code_size),
            ));
        }

        self.ids[list_no].push(id);
        self.codes[list_no].extend_from_slice(code);
        self.sizes[list_no] += 1;
        Ok(())
    }
}

/// Placement of one list inside an on-disk data file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OnDiskList {
    pub size: usize,
    pub capacity: usize,
    pub offset: u64,
}

/// Lists stored in a separate data file.
#[derive(Debug, Clone, PartialEq)]
pub struct OnDiskInvertedLists {
    pub code_size: usize,
    pub lists: Vec<OnDiskList>,
    pub filename: PathBuf,
    pub totsize: u64,
    /// Mapping of `filename` when loaded with `MMAP`.
    pub mapping: Option<MappedBytes>,
}

impl OnDiskInvertedLists {
    /// Write `array` to a new data file at `path`, one list after the other
    /// with `capacity == size`.
    pub fn create_from_array<P: AsRef<Path>>(array: &ArrayInvertedLists, path: P) -> Result<Self> {
        if !array.loaded {
            return Err(IndexIoError::policy(
                "cannot copy inverted lists loaded without their contents",
            ));
        }

        let path = path.as_ref();
        let context = || format!("write {}", path.display());
        let file = File::create(path).map_err(|e| IndexIoError::io(context(), e))?;
        let mut writer = BufWriter::new(file);

        let mut lists = Vec::with_capacity(array.sizes.len());
        let mut offset = 0u64;
        for (list_no, &size) in array.sizes.iter().enumerate() {
            writer
                .write_all(&array.codes[list_no])
                .map_err(|e| IndexIoError::io(context(), e))?;
            for &id in &array.ids[list_no] {
                writer
                    .write_i64::<LittleEndian>(id)
                    .map_err(|e| IndexIoError::io(context(), e))?;
            }
            lists.push(OnDiskList {
                size,
                capacity: size,
                offset,
            });
            offset += (size * (array.code_size + ID_SIZE)) as u64;
        }
        writer.flush().map_err(|e| IndexIoError::io(context(), e))?;

        Ok(OnDiskInvertedLists {
            code_size: array.code_size,
            lists,
            filename: path.to_path_buf(),
            totsize: offset,
            mapping: None,
        })
    }

    /// Check every list against `totsize`.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let entry_size = self
            .code_size
            .checked_add(ID_SIZE)
            .ok_or_else(|| format!("code_size {} overflows an entry", self.code_size))?;
        for (list_no, list) in self.lists.iter().enumerate() {
            if list.size > list.capacity {
                return Err(format!(
                    "list {list_no}: size {} exceeds capacity {}",
                    list.size, list.capacity
                ));
            }
            let end = (list.capacity as u64)
                .checked_mul(entry_size as u64)
                .and_then(|len| len.checked_add(list.offset));
            if end.is_none_or(|end| end > self.totsize) {
                return Err(format!(
                    "list {list_no}: offset {} + capacity {} overruns totsize {}",
                    list.offset, list.capacity, self.totsize
                ));
            }
        }
        Ok(())
    }

    fn read_range(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        if let Some(mapping) = &self.mapping {
            let start = usize::try_from(offset).map_err(|_| {
                IndexIoError::format("ilod", format!("offset {offset} does not fit in memory"))
            })?;
            let view = mapping.slice(start, len, "ilod.list")?;
            return Ok(view.bytes()?.to_vec());
        }

        let context = || format!("ilod data file {}", self.filename.display());
        let mut file = File::open(&self.filename).map_err(|e| IndexIoError::io(context(), e))?;
        file.seek(SeekFrom::Start(offset))
            .map_err(|e| IndexIoError::io(context(), e))?;
        let mut buffer = vec![0u8; len];
        file.read_exact(&mut buffer)
            .map_err(|e| IndexIoError::io(context(), e))?;
        Ok(buffer)
    }

    fn list_codes(&self, list_no: usize) -> Result<Vec<u8>> {
        let list = self.lists[list_no];
        self.read_range(list.offset, list.size * self.code_size)
    }

    fn list_ids(&self, list_no: usize) -> Result<Vec<i64>> {
        let list = self.lists[list_no];
        let ids_offset = list.offset + (list.capacity * self.code_size) as u64;
        let bytes = self.read_range(ids_offset, list.size * ID_SIZE)?;
        let mut ids = vec![0i64; list.size];
        LittleEndian::read_i64_into(&bytes, &mut ids);
        Ok(ids)
    }
}

/// Inverted lists of any persisted backend.
#[derive(Debug, Clone, PartialEq)]
pub enum InvertedLists {
    Null,
    Array(ArrayInvertedLists),
    OnDisk(OnDiskInvertedLists),
}

fn check_list(list_no: usize, nlist: usize) -> Result<()> {
    if list_no >= nlist {
        return Err(IndexIoError::format(
            "invlists",
            format!("list {list_no} out of range (nlist {nlist})"),
        ));
    }
    Ok(())
}

impl InvertedLists {
    /// Registry tag of this backend.
    pub fn tag(&self) -> InvlistsTag {
        match self {
            InvertedLists::Null => InvlistsTag::Null,
            InvertedLists::Array(_) => InvlistsTag::Array,
            InvertedLists::OnDisk(_) => InvlistsTag::OnDisk,
        }
    }

    /// Number of lists.
    pub fn nlist(&self) -> usize {
        match self {
            InvertedLists::Null => 0,
            InvertedLists::Array(array) => array.sizes.len(),
            InvertedLists::OnDisk(ondisk) => ondisk.lists.len(),
        }
    }

    /// Bytes per code.
    pub fn code_size(&self) -> usize {
        match self {
            InvertedLists::Null => 0,
            InvertedLists::Array(array) => array.code_size,
            InvertedLists::OnDisk(ondisk) => ondisk.code_size,
        }
    }

    /// Number of entries in `list_no`.
    pub fn list_size(&self, list_no: usize) -> Result<usize> {
        check_list(list_no, self.nlist())?;
        Ok(match self {
            InvertedLists::Null => 0,
            InvertedLists::Array(array) => array.sizes[list_no],
            InvertedLists::OnDisk(ondisk) => ondisk.lists[list_no].size,
        })
    }

    /// Number of entries over all lists.
    pub fn total_size(&self) -> usize {
        match self {
            InvertedLists::Null => 0,
            InvertedLists::Array(array) => array.sizes.iter().sum(),
            InvertedLists::OnDisk(ondisk) => ondisk.lists.iter().map(|l| l.size).sum(),
        }
    }

    /// False when array contents were skipped at load time.
    pub fn is_loaded(&self) -> bool {
        match self {
            InvertedLists::Array(array) => array.loaded,
            _ => true,
        }
    }

    /// True when backed by a mapping.
    pub fn is_mapped(&self) -> bool {
        matches!(self, InvertedLists::OnDisk(ondisk) if ondisk.mapping.is_some())
    }

    /// Ids stored in `list_no`.
    pub fn list_ids(&self, list_no: usize) -> Result<Vec<i64>> {
        check_list(list_no, self.nlist())?;
        match self {
            InvertedLists::Null => Ok(Vec::new()),
            InvertedLists::Array(array) => {
                ensure_loaded(array)?;
                Ok(array.ids[list_no].clone())
            }
            InvertedLists::OnDisk(ondisk) => ondisk.list_ids(list_no),
        }
    }

    /// Codes stored in `list_no`, `list_size * code_size` bytes.
    pub fn list_codes(&self, list_no: usize) -> Result<Vec<u8>> {
        check_list(list_no, self.nlist())?;
        match self {
            InvertedLists::Null => Ok(Vec::new()),
            InvertedLists::Array(array) => {
                ensure_loaded(array)?;
                Ok(array.codes[list_no].clone())
            }
            InvertedLists::OnDisk(ondisk) => ondisk.list_codes(list_no),
        }
    }

    /// Append one entry. Only in-memory lists are mutable.
    pub fn add_entry(&mut self, list_no: usize, id: i64, code: &[u8]) -> Result<()> {
        match self {
            InvertedLists::Array(array) => array.add_entry(list_no, id, code),
            other => Err(IndexIoError::policy(format!(
                "{} inverted lists do not support adding entries",
                other.tag()
            ))),
        }
    }
}

fn ensure_loaded(array: &ArrayInvertedLists) -> Result<()> {
    if !array.loaded {
        return Err(IndexIoError::policy(
            "inverted list contents were not loaded (SKIP_IVF_DATA)",
        ));
    }
    Ok(())
}

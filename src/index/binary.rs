//! Binary index models.
//!
//! Binary indexes store `d`-bit codes (`d / 8` bytes per vector) compared
//! with Hamming distance.

use crate::error::{IndexIoError, Result};
use crate::invlists::InvertedLists;
use crate::registry::BinaryTag;

use super::{CodeStorage, DirectMap, HnswGraph, MetricType};

/// Fields common to every binary index.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryHeader {
    /// Dimensionality in bits, a multiple of 8.
    pub d: u32,
    /// Bytes per code, `d / 8`.
    pub code_size: u32,
    pub ntotal: u64,
    pub is_trained: bool,
    pub metric: MetricType,
}

impl BinaryHeader {
    /// An empty, trained header.
    pub fn new(d: u32) -> Result<Self> {
        if d % 8 != 0 {
            return Err(IndexIoError::format(
                "binary.d",
                format!("d={d} is not a multiple of 8"),
            ));
        }
        Ok(BinaryHeader {
            d,
            code_size: d / 8,
            ntotal: 0,
            is_trained: true,
            metric: MetricType::L2,
        })
    }
}

/// IVF binary index.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryIvf {
    pub nlist: usize,
    pub nprobe: usize,
    pub quantizer: Box<IndexBinary>,
    pub direct_map: DirectMap,
    pub invlists: InvertedLists,
}

/// HNSW binary index.
#[derive(Debug, Clone, PartialEq)]
pub struct BinaryHnsw {
    pub graph: HnswGraph,
    /// Absent when written without storage.
    pub storage: Option<Box<IndexBinary>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryKind {
    Flat(CodeStorage),
    Ivf(BinaryIvf),
    Hnsw(BinaryHnsw),
}

/// A binary index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexBinary {
    pub header: BinaryHeader,
    pub kind: BinaryKind,
    /// Set by the `READ_ONLY` load flag.
    pub read_only: bool,
}

impl IndexBinary {
    /// A flat binary index holding `codes` (`n * d / 8` bytes).
    pub fn flat_from_codes(d: u32, codes: Vec<u8>) -> Result<Self> {
        let mut header = BinaryHeader::new(d)?;
        let code_size = header.code_size as usize;
        if code_size == 0 || codes.len() % code_size != 0 {
            return Err(IndexIoError::format(
                "IBxF.codes",
                format!("{} bytes is not a multiple of code_size={code_size}", codes.len()),
            ));
        }
        header.ntotal = (codes.len() / code_size) as u64;

        Ok(IndexBinary {
            header,
            kind: BinaryKind::Flat(CodeStorage::Owned(codes)),
            read_only: false,
        })
    }

    /// Registry tag of this index.
    pub fn tag(&self) -> BinaryTag {
        match self.kind {
            BinaryKind::Flat(_) => BinaryTag::Flat,
            BinaryKind::Ivf(_) => BinaryTag::Ivf,
            BinaryKind::Hnsw(_) => BinaryTag::Hnsw,
        }
    }

    /// Owned sub-indexes, in serialization order.
    pub fn children(&self) -> Vec<&IndexBinary> {
        match &self.kind {
            BinaryKind::Flat(_) => Vec::new(),
            BinaryKind::Ivf(ivf) => vec![ivf.quantizer.as_ref()],
            BinaryKind::Hnsw(hnsw) => hnsw.storage.iter().map(|s| s.as_ref()).collect(),
        }
    }

    /// True when any node is read-only or backed by a mapping.
    pub fn is_read_only(&self) -> bool {
        let mapped = match &self.kind {
            BinaryKind::Flat(codes) => codes.is_mapped(),
            BinaryKind::Ivf(ivf) => ivf.invlists.is_mapped(),
            BinaryKind::Hnsw(_) => false,
        };
        self.read_only || mapped || self.children().iter().any(|c| c.is_read_only())
    }

    /// Mark every node read-only.
    pub fn set_read_only(&mut self) {
        self.read_only = true;
        match &mut self.kind {
            BinaryKind::Flat(_) => {}
            BinaryKind::Ivf(ivf) => ivf.quantizer.set_read_only(),
            BinaryKind::Hnsw(hnsw) => {
                if let Some(storage) = hnsw.storage.as_mut() {
                    storage.set_read_only();
                }
            }
        }
    }

    /// Append one code to an IVF list.
    pub fn add_ivf_entry(&mut self, list_no: usize, id: i64, code: &[u8]) -> Result<()> {
        let tag = self.tag();
        if self.is_read_only() {
            return Err(IndexIoError::policy(format!(
                "add_ivf_entry: {tag} index is read-only"
            )));
        }
        let BinaryKind::Ivf(ivf) = &mut self.kind else {
            return Err(IndexIoError::policy(format!(
                "add_ivf_entry is not supported on {tag} indexes"
            )));
        };
        ivf.invlists.add_entry(list_no, id, code)?;
        self.header.ntotal += 1;
        Ok(())
    }
}

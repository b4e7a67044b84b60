//! Index object graph.
//!
//! An [`Index`] is a header shared by every variant plus an [`IndexKind`]
//! payload. Composite variants own their children (`Box<Index>`), so a
//! decoded graph is always a tree. Code payloads are held in a
//! [`CodeStorage`], which records whether they were copied, mapped, or left
//! unloaded by the load flags.

pub mod binary;
pub mod hnsw;
pub mod ivf;

use byteorder::{ByteOrder, LittleEndian};

use crate::error::{IndexIoError, Result};
use crate::flags::LoadPolicy;
use crate::invlists::{ArrayInvertedLists, InvertedLists};
use crate::pq::ProductQuantizer;
use crate::registry::IndexTag;
use crate::storage::mmap::MappedBytes;
use crate::transform::VectorTransform;

pub use self::binary::{BinaryHeader, BinaryKind, IndexBinary};
pub use self::hnsw::{HnswGraph, HnswIndex};
pub use self::ivf::{DirectMap, IvfIndex, IvfPqIndex};

/// Distance metric of an index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricType {
    InnerProduct,
    L2,
    L1,
    Linf,
    Lp,
    Canberra,
    BrayCurtis,
    JensenShannon,
    Jaccard,
}

impl MetricType {
    /// On-disk code.
    pub fn code(self) -> u32 {
        match self {
            MetricType::InnerProduct => 0,
            MetricType::L2 => 1,
            MetricType::L1 => 2,
            MetricType::Linf => 3,
            MetricType::Lp => 4,
            MetricType::Canberra => 20,
            MetricType::BrayCurtis => 21,
            MetricType::JensenShannon => 22,
            MetricType::Jaccard => 23,
        }
    }

    /// Metric for an on-disk code.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(MetricType::InnerProduct),
            1 => Some(MetricType::L2),
            2 => Some(MetricType::L1),
            3 => Some(MetricType::Linf),
            4 => Some(MetricType::Lp),
            20 => Some(MetricType::Canberra),
            21 => Some(MetricType::BrayCurtis),
            22 => Some(MetricType::JensenShannon),
            23 => Some(MetricType::Jaccard),
            _ => None,
        }
    }
}

/// Fields common to every float index.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexHeader {
    pub d: u32,
    pub ntotal: u64,
    pub is_trained: bool,
    pub metric: MetricType,
    pub metric_arg: f32,
}

impl IndexHeader {
    /// An empty, trained header.
    pub fn new(d: u32, metric: MetricType) -> Self {
        IndexHeader {
            d,
            ntotal: 0,
            is_trained: true,
            metric,
            metric_arg: 0.0,
        }
    }
}

/// Backing of a code payload.
#[derive(Debug, Clone, PartialEq)]
pub enum CodeStorage {
    /// Copied into memory.
    Owned(Vec<u8>),
    /// Borrowed from a mapping owned by a `MappingScope`.
    Mapped(MappedBytes),
    /// Consumed from the stream but not kept (`SKIP_STORAGE`).
    NotLoaded { len: usize },
}

impl Default for CodeStorage {
    fn default() -> Self {
        CodeStorage::Owned(Vec::new())
    }
}

impl CodeStorage {
    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        match self {
            CodeStorage::Owned(bytes) => bytes.len(),
            CodeStorage::Mapped(view) => view.len(),
            CodeStorage::NotLoaded { len } => *len,
        }
    }

    /// True for an empty payload.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// False when the payload was skipped.
    pub fn is_loaded(&self) -> bool {
        !matches!(self, CodeStorage::NotLoaded { .. })
    }

    /// True when backed by a mapping.
    pub fn is_mapped(&self) -> bool {
        matches!(self, CodeStorage::Mapped(_))
    }

    /// Run `f` over the payload bytes.
    pub fn with_bytes<T>(&self, context: &str, f: impl FnOnce(&[u8]) -> T) -> Result<T> {
        match self {
            CodeStorage::Owned(bytes) => Ok(f(bytes)),
            CodeStorage::Mapped(view) => {
                let guard = view.bytes()?;
                Ok(f(&guard))
            }
            CodeStorage::NotLoaded { len } => Err(IndexIoError::policy(format!(
                "{context}: {len} code bytes were not loaded (SKIP_STORAGE)"
            ))),
        }
    }

    /// Copy the payload.
    pub fn to_vec(&self, context: &str) -> Result<Vec<u8>> {
        self.with_bytes(context, <[u8]>::to_vec)
    }
}

/// Raw float codes.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FlatCodes {
    pub code_size: usize,
    pub codes: CodeStorage,
    /// Per-element L2 norms, when loaded with `WITH_NORM`.
    pub norms: Option<Vec<f32>>,
}

impl FlatCodes {
    /// Compute the L2 norm of every stored vector.
    pub fn compute_norms(&mut self) -> Result<()> {
        let norms = self.codes.with_bytes("IxFl.norms", |bytes| {
            bytes
                .chunks_exact(self.code_size.max(4))
                .map(|code| {
                    let mut values = vec![0.0f32; code.len() / 4];
                    LittleEndian::read_f32_into(code, &mut values);
                    values.iter().map(|v| v * v).sum::<f32>().sqrt()
                })
                .collect()
        })?;
        self.norms = Some(norms);
        Ok(())
    }
}

/// Product-quantized codes.
#[derive(Debug, Clone, PartialEq)]
pub struct PqIndex {
    pub pq: ProductQuantizer,
    pub codes: CodeStorage,
    pub search_type: u32,
    pub encode_signs: bool,
    pub polysemous_ht: u32,
}

/// Chain of transforms applied before an inner index.
#[derive(Debug, Clone, PartialEq)]
pub struct PreTransformIndex {
    pub transforms: Vec<VectorTransform>,
    pub inner: Box<Index>,
}

/// Inner index addressed through external ids.
#[derive(Debug, Clone, PartialEq)]
pub struct IdMapIndex {
    pub inner: Box<Index>,
    pub id_map: Vec<i64>,
}

/// Variant payload of an [`Index`].
#[derive(Debug, Clone, PartialEq)]
pub enum IndexKind {
    Flat(FlatCodes),
    Pq(PqIndex),
    IvfFlat(IvfIndex),
    IvfPq(IvfPqIndex),
    HnswFlat(HnswIndex),
    HnswPq(HnswIndex),
    PreTransform(PreTransformIndex),
    IdMap(IdMapIndex),
}

impl IndexKind {
    /// Registry tag of this variant.
    pub fn tag(&self) -> IndexTag {
        match self {
            IndexKind::Flat(_) => IndexTag::Flat,
            IndexKind::Pq(_) => IndexTag::Pq,
            IndexKind::IvfFlat(_) => IndexTag::IvfFlat,
            IndexKind::IvfPq(_) => IndexTag::IvfPq,
            IndexKind::HnswFlat(_) => IndexTag::HnswFlat,
            IndexKind::HnswPq(_) => IndexTag::HnswPq,
            IndexKind::PreTransform(_) => IndexTag::PreTransform,
            IndexKind::IdMap(_) => IndexTag::IdMap,
        }
    }
}

/// A float index.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub header: IndexHeader,
    pub kind: IndexKind,
    /// Multi-vector offsets, written behind the `MvIx` marker.
    pub mv_lims: Option<Vec<u32>>,
    /// Set by the `READ_ONLY` load flag.
    pub read_only: bool,
}

impl Index {
    /// Wrap a header and payload.
    pub fn new(header: IndexHeader, kind: IndexKind) -> Self {
        Index {
            header,
            kind,
            mv_lims: None,
            read_only: false,
        }
    }

    /// An empty flat index.
    pub fn new_flat(d: u32, metric: MetricType) -> Self {
        Index::new(
            IndexHeader::new(d, metric),
            IndexKind::Flat(FlatCodes {
                code_size: 4 * d as usize,
                codes: CodeStorage::default(),
                norms: None,
            }),
        )
    }

    /// A flat index holding `vectors`.
    pub fn flat_from_vectors(d: u32, metric: MetricType, vectors: &[f32]) -> Result<Self> {
        let mut index = Index::new_flat(d, metric);
        index.add_vectors(vectors)?;
        Ok(index)
    }

    /// Registry tag of this index.
    pub fn tag(&self) -> IndexTag {
        self.kind.tag()
    }

    /// Dimensionality.
    pub fn d(&self) -> u32 {
        self.header.d
    }

    /// Number of stored vectors.
    pub fn ntotal(&self) -> u64 {
        self.header.ntotal
    }

    /// Owned sub-indexes, in serialization order.
    pub fn children(&self) -> Vec<&Index> {
        match &self.kind {
            IndexKind::Flat(_) | IndexKind::Pq(_) => Vec::new(),
            IndexKind::IvfFlat(ivf) => vec![ivf.quantizer.as_ref()],
            IndexKind::IvfPq(ivfpq) => vec![ivfpq.ivf.quantizer.as_ref()],
            IndexKind::HnswFlat(hnsw) | IndexKind::HnswPq(hnsw) => {
                hnsw.storage.iter().map(|s| s.as_ref()).collect()
            }
            IndexKind::PreTransform(pt) => vec![pt.inner.as_ref()],
            IndexKind::IdMap(idmap) => vec![idmap.inner.as_ref()],
        }
    }

    fn children_mut(&mut self) -> Vec<&mut Index> {
        match &mut self.kind {
            IndexKind::Flat(_) | IndexKind::Pq(_) => Vec::new(),
            IndexKind::IvfFlat(ivf) => vec![ivf.quantizer.as_mut()],
            IndexKind::IvfPq(ivfpq) => vec![ivfpq.ivf.quantizer.as_mut()],
            IndexKind::HnswFlat(hnsw) | IndexKind::HnswPq(hnsw) => {
                hnsw.storage.iter_mut().map(|s| s.as_mut()).collect()
            }
            IndexKind::PreTransform(pt) => vec![pt.inner.as_mut()],
            IndexKind::IdMap(idmap) => vec![idmap.inner.as_mut()],
        }
    }

    /// True when this node holds mapped bytes.
    fn has_mapped_storage(&self) -> bool {
        match &self.kind {
            IndexKind::Flat(flat) => flat.codes.is_mapped(),
            IndexKind::Pq(pq) => pq.codes.is_mapped(),
            IndexKind::IvfFlat(ivf) => ivf.invlists.is_mapped(),
            IndexKind::IvfPq(ivfpq) => ivfpq.ivf.invlists.is_mapped(),
            _ => false,
        }
    }

    /// True when any node of the graph is read-only or backed by a mapping.
    pub fn is_read_only(&self) -> bool {
        self.read_only
            || self.has_mapped_storage()
            || self.children().iter().any(|child| child.is_read_only())
    }

    /// Mark every node of the graph read-only.
    pub fn set_read_only(&mut self) {
        self.read_only = true;
        for child in self.children_mut() {
            child.set_read_only();
        }
    }

    /// Fail unless the graph may be modified.
    pub fn ensure_mutable(&self, operation: &str) -> Result<()> {
        if self.is_read_only() {
            return Err(IndexIoError::policy(format!(
                "{operation}: {} index is read-only",
                self.tag()
            )));
        }
        Ok(())
    }

    /// Decode the stored vectors of a flat index.
    pub fn flat_vectors(&self) -> Result<Vec<f32>> {
        match &self.kind {
            IndexKind::Flat(flat) => flat.codes.with_bytes("IxFl.codes", |bytes| {
                let mut values = vec![0.0f32; bytes.len() / 4];
                LittleEndian::read_f32_into(&bytes[..values.len() * 4], &mut values);
                values
            }),
            other => Err(IndexIoError::policy(format!(
                "{} index does not store flat vectors",
                other.tag()
            ))),
        }
    }

    /// Append vectors (`n * d` floats).
    ///
    /// Supported on flat indexes and on transform chains over them.
    pub fn add_vectors(&mut self, vectors: &[f32]) -> Result<()> {
        self.ensure_mutable("add_vectors")?;
        let d = self.header.d as usize;
        if d == 0 || vectors.len() % d != 0 {
            return Err(IndexIoError::format(
                format!("{}.add_vectors", self.tag()),
                format!("{} values is not a multiple of d={d}", vectors.len()),
            ));
        }
        let n = (vectors.len() / d) as u64;

        match &mut self.kind {
            IndexKind::Flat(flat) => {
                let CodeStorage::Owned(codes) = &mut flat.codes else {
                    return Err(IndexIoError::policy(
                        "add_vectors: IxFl codes are not held in memory",
                    ));
                };
                let start = codes.len();
                codes.resize(start + vectors.len() * 4, 0);
                LittleEndian::write_f32_into(vectors, &mut codes[start..]);
                if flat.norms.is_some() {
                    flat.compute_norms()?;
                }
            }
            IndexKind::PreTransform(pt) => {
                let mut transformed = vectors.to_vec();
                for transform in &pt.transforms {
                    transformed = transform.apply(&transformed)?;
                }
                pt.inner.add_vectors(&transformed)?;
            }
            other => {
                return Err(IndexIoError::policy(format!(
                    "add_vectors is not supported on {} indexes",
                    other.tag()
                )));
            }
        }

        self.header.ntotal += n;
        Ok(())
    }

    /// Append one encoded entry to an IVF list.
    pub fn add_ivf_entry(&mut self, list_no: usize, id: i64, code: &[u8]) -> Result<()> {
        self.ensure_mutable("add_ivf_entry")?;
        let invlists = match &mut self.kind {
            IndexKind::IvfFlat(ivf) => &mut ivf.invlists,
            IndexKind::IvfPq(ivfpq) => &mut ivfpq.ivf.invlists,
            other => {
                return Err(IndexIoError::policy(format!(
                    "add_ivf_entry is not supported on {} indexes",
                    other.tag()
                )));
            }
        };
        invlists.add_entry(list_no, id, code)?;
        self.header.ntotal += 1;
        Ok(())
    }

    /// Drop every stored vector.
    pub fn reset(&mut self) -> Result<()> {
        self.ensure_mutable("reset")?;
        let tag = self.tag();
        match &mut self.kind {
            IndexKind::Flat(flat) => {
                flat.codes = CodeStorage::default();
                flat.norms = flat.norms.as_ref().map(|_| Vec::new());
            }
            IndexKind::Pq(pq) => pq.codes = CodeStorage::default(),
            IndexKind::IvfFlat(ivf) => reset_lists(ivf)?,
            IndexKind::IvfPq(ivfpq) => reset_lists(&mut ivfpq.ivf)?,
            IndexKind::PreTransform(pt) => pt.inner.reset()?,
            IndexKind::IdMap(idmap) => {
                idmap.inner.reset()?;
                idmap.id_map.clear();
            }
            IndexKind::HnswFlat(_) | IndexKind::HnswPq(_) => {
                return Err(IndexIoError::policy(format!(
                    "reset is not supported on {tag} indexes"
                )));
            }
        }
        self.header.ntotal = 0;
        Ok(())
    }

    /// Rebuild the tables that are derived from persisted state.
    pub fn rebuild_derived_tables(&mut self) -> Result<()> {
        self.build_derived_tables(&LoadPolicy::default())
    }

    /// Build derived tables, honouring the skip flags of `policy`.
    pub(crate) fn build_derived_tables(&mut self, policy: &LoadPolicy) -> Result<()> {
        for child in self.children_mut() {
            child.build_derived_tables(policy)?;
        }

        let (metric, is_trained) = (self.header.metric, self.header.is_trained);
        match &mut self.kind {
            IndexKind::Pq(pq) if !policy.pq_skip_sdc_table => pq.pq.compute_sdc_table(),
            IndexKind::IvfPq(ivfpq) if !policy.skip_precompute_table => {
                ivfpq.precomputed_table = None;
                if ivfpq.by_residual && metric == MetricType::L2 && ivfpq.use_precomputed_table >= 0
                {
                    ivfpq.precomputed_table = precomputed_table_for(ivfpq, is_trained);
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// The precomputed table of a trained IVF-PQ index, or `None` with a warning.
fn precomputed_table_for(ivfpq: &IvfPqIndex, is_trained: bool) -> Option<Vec<f32>> {
    let quantizer_size = ivfpq.ivf.quantizer.ntotal();
    if !is_trained || quantizer_size != ivfpq.ivf.nlist as u64 {
        log::warn!(
            "IwPQ: precomputed table not built: trained={is_trained}, quantizer holds {quantizer_size} of {} centroids",
            ivfpq.ivf.nlist
        );
        return None;
    }

    let table = ivfpq
        .ivf
        .quantizer
        .flat_vectors()
        .and_then(|coarse| ivfpq.compute_precomputed_table(&coarse));
    match table {
        Ok(table) => Some(table),
        Err(e) => {
            log::warn!("IwPQ: precomputed table not built: {e}");
            None
        }
    }
}

fn reset_lists(ivf: &mut IvfIndex) -> Result<()> {
    let fresh = match &ivf.invlists {
        InvertedLists::Array(array) => ArrayInvertedLists::new(array.sizes.len(), array.code_size),
        other => {
            return Err(IndexIoError::policy(format!(
                "reset is not supported on {} inverted lists",
                other.tag()
            )));
        }
    };
    ivf.invlists = InvertedLists::Array(fresh);
    ivf.direct_map = DirectMap::None;
    Ok(())
}

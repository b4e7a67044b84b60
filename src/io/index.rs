//! Float index codecs.
//!
//! Every index starts with its tag and the common header
//! (`d:u32, ntotal:u64, is_trained:bool, metric:u32, metric_arg:f32`).
//! Composite variants recurse into their owned children, which are written
//! with their own tags.

use crate::error::{IndexIoError, Result};
use crate::index::{
    DirectMap, FlatCodes, HnswGraph, HnswIndex, IdMapIndex, Index, IndexHeader, IndexKind,
    IvfIndex, IvfPqIndex, MetricType, PqIndex, PreTransformIndex,
};
use crate::invlists::InvertedLists;
use crate::registry::{IndexTag, MV_MARKER, Tag};
use crate::storage::structured::{StructReader, StructWriter};

use super::context::{ReadContext, write_codes};
use super::invlists::{read_invlists, write_invlists};
use super::pq::{read_pq, write_pq};
use super::transform::{read_transform, write_transform};

/// Smallest encoded size of a transform, used to bound `IxPT.n`.
const MIN_TRANSFORM_BYTES: usize = 4 + 4 + 4 + 1;

/// Options honoured on the write path.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct WriteOptions {
    /// Write HNSW storage as `null`.
    pub skip_storage: bool,
}

pub(crate) fn write_index_root(
    w: &mut StructWriter,
    index: &Index,
    options: WriteOptions,
) -> Result<()> {
    if let Some(lims) = &index.mv_lims {
        w.write_tag(MV_MARKER)?;
        w.write_u32_vec(lims)?;
    }
    write_index_node(w, index, options)
}

pub(crate) fn write_index_node(
    w: &mut StructWriter,
    index: &Index,
    options: WriteOptions,
) -> Result<()> {
    let tag = index.tag();
    w.write_tag(tag.tag())?;
    w.scoped(tag, |w| {
        write_header(w, &index.header)?;
        match &index.kind {
            IndexKind::Flat(flat) => {
                w.write_u64(flat.code_size as u64)?;
                write_codes(w, &flat.codes, "codes")
            }
            IndexKind::Pq(pq) => {
                write_pq(w, &pq.pq)?;
                write_codes(w, &pq.codes, "codes")?;
                w.write_u32(pq.search_type)?;
                w.write_bool(pq.encode_signs)?;
                w.write_u32(pq.polysemous_ht)
            }
            IndexKind::IvfFlat(ivf) => {
                write_ivf_core(w, ivf, options)?;
                write_invlists(w, &ivf.invlists)
            }
            IndexKind::IvfPq(ivfpq) => {
                write_ivf_core(w, &ivfpq.ivf, options)?;
                w.write_bool(ivfpq.by_residual)?;
                w.write_u64(ivfpq.code_size as u64)?;
                w.write_i32(ivfpq.use_precomputed_table)?;
                write_pq(w, &ivfpq.pq)?;
                write_invlists(w, &ivfpq.ivf.invlists)
            }
            IndexKind::HnswFlat(hnsw) | IndexKind::HnswPq(hnsw) => {
                write_hnsw_graph(w, &hnsw.graph)?;
                match &hnsw.storage {
                    Some(storage) if !options.skip_storage => {
                        write_index_node(w, storage, options)
                    }
                    _ => w.write_tag(IndexTag::Null.tag()),
                }
            }
            IndexKind::PreTransform(pt) => {
                w.write_usize_u32(pt.transforms.len(), "n")?;
                for transform in &pt.transforms {
                    write_transform(w, transform)?;
                }
                write_index_node(w, &pt.inner, options)
            }
            IndexKind::IdMap(idmap) => {
                write_index_node(w, &idmap.inner, options)?;
                w.write_i64_vec(&idmap.id_map)
            }
        }
    })
}

fn write_header(w: &mut StructWriter, header: &IndexHeader) -> Result<()> {
    w.write_u32(header.d)?;
    w.write_u64(header.ntotal)?;
    w.write_bool(header.is_trained)?;
    w.write_u32(header.metric.code())?;
    w.write_f32(header.metric_arg)
}

fn write_ivf_core(w: &mut StructWriter, ivf: &IvfIndex, options: WriteOptions) -> Result<()> {
    w.write_u64(ivf.nlist as u64)?;
    w.write_u64(ivf.nprobe as u64)?;
    write_index_node(w, &ivf.quantizer, options)?;
    write_direct_map(w, &ivf.direct_map)
}

pub(crate) fn write_direct_map(w: &mut StructWriter, direct_map: &DirectMap) -> Result<()> {
    w.write_u8(direct_map.kind_code())?;
    match direct_map {
        DirectMap::None => w.write_i64_vec(&[]),
        DirectMap::Array(entries) => w.write_i64_vec(entries),
        DirectMap::Hashtable(entries) => {
            let flat: Vec<i64> = entries.iter().flat_map(|&(k, v)| [k, v]).collect();
            w.write_i64_vec(&flat)
        }
    }
}

pub(crate) fn write_hnsw_graph(w: &mut StructWriter, graph: &HnswGraph) -> Result<()> {
    w.scoped("hnsw", |w| {
        w.write_f64_vec(&graph.assign_probas)?;
        w.write_i32_vec(&graph.cum_nneighbor_per_level)?;
        w.write_i32_vec(&graph.levels)?;
        w.write_u64_vec(&graph.offsets)?;
        w.write_i32_vec(&graph.neighbors)?;
        w.write_i32(graph.entry_point)?;
        w.write_i32(graph.max_level)?;
        w.write_i32(graph.ef_construction)?;
        w.write_i32(graph.ef_search)?;
        w.write_i32(graph.upper_beam)
    })
}

/// Decode a top-level index, accepting a leading multi-vector marker.
pub(crate) fn read_index_root(r: &mut StructReader, ctx: &mut ReadContext) -> Result<Index> {
    let mut tag = r.read_tag("tag")?;
    let mut mv_lims = None;
    if tag == MV_MARKER {
        mv_lims = Some(r.scoped(MV_MARKER, |r| r.read_u32_vec("lims"))?);
        tag = r.read_tag("tag")?;
    }

    let mut index = match read_optional_body(r, ctx, tag)? {
        Some(index) => index,
        None => {
            return Err(r.format_error("tag", "null index at top level"));
        }
    };
    index.mv_lims = mv_lims;
    Ok(index)
}

/// Decode a tagged child index that must be present.
pub(crate) fn read_index_node(r: &mut StructReader, ctx: &mut ReadContext) -> Result<Index> {
    let tag = r.read_tag("tag")?;
    read_optional_body(r, ctx, tag)?
        .ok_or_else(|| r.format_error("tag", "null index where an index is required"))
}

/// Decode a tagged child index that may be `null`.
fn read_optional_node(r: &mut StructReader, ctx: &mut ReadContext) -> Result<Option<Index>> {
    let tag = r.read_tag("tag")?;
    read_optional_body(r, ctx, tag)
}

fn read_optional_body(
    r: &mut StructReader,
    ctx: &mut ReadContext,
    tag: Tag,
) -> Result<Option<Index>> {
    let Some(variant) = IndexTag::from_tag(tag) else {
        return Err(IndexIoError::unknown_tag(IndexTag::FAMILY, tag, r.context("")));
    };
    if variant == IndexTag::Null {
        return Ok(None);
    }
    log::trace!("decoding {variant} at offset {}", r.position());

    r.scoped(variant, |r| {
        let header = read_header(r)?;
        let kind = match variant {
            IndexTag::Flat => IndexKind::Flat(read_flat(r, ctx, &header)?),
            IndexTag::Pq => IndexKind::Pq(read_pq_index(r, ctx, &header)?),
            IndexTag::IvfFlat => {
                let mut ivf = read_ivf_core(r, ctx)?;
                ivf.invlists = read_ivf_lists(r, ctx, ivf.nlist, 4 * header.d as usize)?;
                IndexKind::IvfFlat(ivf)
            }
            IndexTag::IvfPq => IndexKind::IvfPq(read_ivfpq(r, ctx)?),
            IndexTag::HnswFlat => IndexKind::HnswFlat(read_hnsw(r, ctx, &header, IndexTag::Flat)?),
            IndexTag::HnswPq => IndexKind::HnswPq(read_hnsw(r, ctx, &header, IndexTag::Pq)?),
            IndexTag::PreTransform => {
                let n = r.read_u32("n")?;
                r.check_alloc(u64::from(n), MIN_TRANSFORM_BYTES, "n")?;
                let transforms = (0..n)
                    .map(|_| read_transform(r))
                    .collect::<Result<Vec<_>>>()?;
                let inner = Box::new(read_index_node(r, ctx)?);
                IndexKind::PreTransform(PreTransformIndex { transforms, inner })
            }
            IndexTag::IdMap => {
                let inner = Box::new(read_index_node(r, ctx)?);
                let id_map = r.read_i64_vec("id_map")?;
                if id_map.len() as u64 != header.ntotal {
                    return Err(r.format_error(
                        "id_map",
                        format!("{} ids for ntotal={}", id_map.len(), header.ntotal),
                    ));
                }
                IndexKind::IdMap(IdMapIndex { inner, id_map })
            }
            IndexTag::Null => unreachable!("null handled above"),
        };
        Ok(Some(Index::new(header, kind)))
    })
}

fn read_header(r: &mut StructReader) -> Result<IndexHeader> {
    let d = r.read_u32("d")?;
    let ntotal = r.read_u64("ntotal")?;
    let is_trained = r.read_bool("is_trained")?;
    let code = r.read_u32("metric")?;
    let metric = MetricType::from_code(code)
        .ok_or_else(|| r.format_error("metric", format!("unknown metric code {code}")))?;
    let metric_arg = r.read_f32("metric_arg")?;

    Ok(IndexHeader {
        d,
        ntotal,
        is_trained,
        metric,
        metric_arg,
    })
}

fn payload_len(r: &StructReader, ntotal: u64, code_size: usize) -> Result<u64> {
    ntotal.checked_mul(code_size as u64).ok_or_else(|| {
        r.format_error(
            "codes",
            format!("ntotal={ntotal} x code_size={code_size} overflows"),
        )
    })
}

fn read_flat(r: &mut StructReader, ctx: &mut ReadContext, header: &IndexHeader) -> Result<FlatCodes> {
    let code_size = r.read_u64("code_size")?;
    let expected = 4 * u64::from(header.d);
    if code_size != expected {
        return Err(r.format_error(
            "code_size",
            format!("expected {expected} (4 * d), got {code_size}"),
        ));
    }
    let code_size = code_size as usize;
    let len = payload_len(r, header.ntotal, code_size)?;
    let codes = ctx.read_codes(r, len, "codes")?;

    let mut flat = FlatCodes {
        code_size,
        codes,
        norms: None,
    };
    if ctx.policy.with_norm {
        flat.compute_norms()?;
        ctx.norms_loaded = true;
    }
    Ok(flat)
}

fn read_pq_index(
    r: &mut StructReader,
    ctx: &mut ReadContext,
    header: &IndexHeader,
) -> Result<PqIndex> {
    let pq = read_pq(r)?;
    if pq.d != header.d as usize {
        return Err(r.format_error(
            "PrQt",
            format!("quantizer d={} does not match index d={}", pq.d, header.d),
        ));
    }
    let len = payload_len(r, header.ntotal, pq.code_size())?;
    let codes = ctx.read_codes(r, len, "codes")?;

    Ok(PqIndex {
        pq,
        codes,
        search_type: r.read_u32("search_type")?,
        encode_signs: r.read_bool("encode_signs")?,
        polysemous_ht: r.read_u32("polysemous_ht")?,
    })
}

fn read_ivf_core(r: &mut StructReader, ctx: &mut ReadContext) -> Result<IvfIndex> {
    let nlist = read_nlist(r)?;
    let nprobe = r.read_usize("nprobe")?;
    let quantizer = Box::new(read_index_node(r, ctx)?);
    check_quantizer_size(r, quantizer.ntotal(), nlist)?;
    let direct_map = read_direct_map(r)?;

    Ok(IvfIndex {
        nlist,
        nprobe,
        quantizer,
        direct_map,
        invlists: InvertedLists::Null,
    })
}

/// Read `nlist`; every list costs at least its u64 size, so it is bounded like a length.
pub(crate) fn read_nlist(r: &mut StructReader) -> Result<usize> {
    let nlist = r.read_u64("nlist")?;
    r.check_alloc(nlist, 8, "nlist")
}

/// A populated coarse quantizer holds exactly one centroid per list.
pub(crate) fn check_quantizer_size(r: &StructReader, ntotal: u64, nlist: usize) -> Result<()> {
    if ntotal != 0 && ntotal != nlist as u64 {
        return Err(r.format_error(
            "quantizer",
            format!("{ntotal} centroids for nlist={nlist}"),
        ));
    }
    Ok(())
}

/// Read the lists of an IVF index and check them against its shape.
pub(crate) fn read_ivf_lists(
    r: &mut StructReader,
    ctx: &ReadContext,
    nlist: usize,
    code_size: usize,
) -> Result<InvertedLists> {
    let invlists = read_invlists(r, ctx)?;
    if invlists != InvertedLists::Null {
        if invlists.nlist() != nlist {
            return Err(r.format_error(
                "invlists",
                format!("{} lists for nlist={nlist}", invlists.nlist()),
            ));
        }
        if invlists.code_size() != code_size {
            return Err(r.format_error(
                "invlists",
                format!(
                    "list code size {} does not match index code size {code_size}",
                    invlists.code_size()
                ),
            ));
        }
    }
    Ok(invlists)
}

pub(crate) fn read_direct_map(r: &mut StructReader) -> Result<DirectMap> {
    let kind = r.read_u8("direct_map")?;
    let entries = r.read_i64_vec("direct_map")?;
    match kind {
        0 if entries.is_empty() => Ok(DirectMap::None),
        0 => Err(r.format_error("direct_map", "entries present for an empty direct map")),
        1 => Ok(DirectMap::Array(entries)),
        2 if entries.len() % 2 == 0 => Ok(DirectMap::Hashtable(
            entries.chunks_exact(2).map(|kv| (kv[0], kv[1])).collect(),
        )),
        2 => Err(r.format_error("direct_map", "odd number of hashtable values")),
        other => Err(r.format_error("direct_map", format!("unknown kind {other}"))),
    }
}

fn read_ivfpq(r: &mut StructReader, ctx: &mut ReadContext) -> Result<IvfPqIndex> {
    let mut ivf = read_ivf_core(r, ctx)?;
    let by_residual = r.read_bool("by_residual")?;
    let code_size = r.read_usize("code_size")?;
    let use_precomputed_table = r.read_i32("use_precomputed_table")?;
    let pq = read_pq(r)?;
    if pq.code_size() != code_size {
        return Err(r.format_error(
            "code_size",
            format!("{code_size} does not match quantizer code size {}", pq.code_size()),
        ));
    }
    ivf.invlists = read_ivf_lists(r, ctx, ivf.nlist, code_size)?;

    Ok(IvfPqIndex {
        ivf,
        by_residual,
        code_size,
        pq,
        use_precomputed_table,
        precomputed_table: None,
    })
}

pub(crate) fn read_hnsw_graph(r: &mut StructReader) -> Result<HnswGraph> {
    r.scoped("hnsw", |r| {
        let graph = HnswGraph {
            assign_probas: r.read_f64_vec("assign_probas")?,
            cum_nneighbor_per_level: r.read_i32_vec("cum_nneighbor_per_level")?,
            levels: r.read_i32_vec("levels")?,
            offsets: r.read_u64_vec("offsets")?,
            neighbors: r.read_i32_vec("neighbors")?,
            entry_point: r.read_i32("entry_point")?,
            max_level: r.read_i32("max_level")?,
            ef_construction: r.read_i32("ef_construction")?,
            ef_search: r.read_i32("ef_search")?,
            upper_beam: r.read_i32("upper_beam")?,
        };
        graph
            .validate()
            .map_err(|message| r.format_error("", message))?;
        Ok(graph)
    })
}

fn read_hnsw(
    r: &mut StructReader,
    ctx: &mut ReadContext,
    header: &IndexHeader,
    storage_tag: IndexTag,
) -> Result<HnswIndex> {
    let graph = read_hnsw_graph(r)?;
    if graph.ntotal() as u64 != header.ntotal {
        return Err(r.format_error(
            "hnsw.levels",
            format!("{} nodes for ntotal={}", graph.ntotal(), header.ntotal),
        ));
    }

    let storage = read_optional_node(r, ctx)?;
    if let Some(storage) = &storage
        && storage.tag() != storage_tag
    {
        return Err(r.format_error(
            "storage",
            format!("expected {storage_tag} storage, found {}", storage.tag()),
        ));
    }

    Ok(HnswIndex {
        graph,
        storage: storage.map(Box::new),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoConfig;
    use crate::error::ErrorKind;
    use crate::flags::LoadPolicy;
    use crate::storage::memory::{MemoryReader, MemoryWriter};

    fn encode(index: &Index) -> Vec<u8> {
        let mut sink = MemoryWriter::new();
        write_index_root(&mut StructWriter::new(&mut sink), index, WriteOptions::default())
            .unwrap();
        sink.into_inner()
    }

    fn decode(bytes: Vec<u8>, policy: LoadPolicy) -> Result<Index> {
        let mut source = MemoryReader::new(bytes);
        let mut r = StructReader::new(&mut source, &IoConfig::default());
        read_index_root(&mut r, &mut ReadContext::new(policy, None))
    }

    #[test]
    fn test_flat_layout() {
        let index = Index::flat_from_vectors(2, MetricType::L2, &[1.0, 2.0]).unwrap();
        let bytes = encode(&index);

        assert_eq!(&bytes[..4], b"IxFl");
        assert_eq!(&bytes[4..8], &2u32.to_le_bytes());
        assert_eq!(&bytes[8..16], &1u64.to_le_bytes());
        assert_eq!(bytes[16], 1);
        assert_eq!(&bytes[17..21], &1u32.to_le_bytes());
        // header (4+4+8+1+4+4) + code_size + codes count + 8 code bytes
        assert_eq!(bytes.len(), 25 + 8 + 8 + 8);

        assert_eq!(decode(bytes, LoadPolicy::default()).unwrap(), index);
    }

    #[test]
    fn test_flat_code_size_mismatch() {
        let index = Index::flat_from_vectors(2, MetricType::L2, &[1.0, 2.0]).unwrap();
        let mut bytes = encode(&index);
        bytes[25..33].copy_from_slice(&12u64.to_le_bytes());

        let err = decode(bytes, LoadPolicy::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("IxFl.code_size"));
    }

    #[test]
    fn test_unknown_metric() {
        let index = Index::new_flat(4, MetricType::InnerProduct);
        let mut bytes = encode(&index);
        bytes[17..21].copy_from_slice(&9u32.to_le_bytes());
        let err = decode(bytes, LoadPolicy::default()).unwrap_err();
        assert!(err.to_string().contains("IxFl.metric"));
    }

    #[test]
    fn test_null_at_top_level_is_rejected() {
        let err = decode(b"null".to_vec(), LoadPolicy::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
    }

    #[test]
    fn test_skip_storage_leaves_codes_unloaded() {
        let index = Index::flat_from_vectors(2, MetricType::L2, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let policy = LoadPolicy {
            skip_storage: true,
            ..LoadPolicy::default()
        };
        let decoded = decode(encode(&index), policy).unwrap();
        let IndexKind::Flat(flat) = &decoded.kind else {
            panic!("expected flat index");
        };
        assert_eq!(flat.codes, crate::index::CodeStorage::NotLoaded { len: 16 });
        assert_eq!(decoded.header, index.header);
    }

    #[test]
    fn test_direct_map_kinds() {
        for direct_map in [
            DirectMap::None,
            DirectMap::Array(vec![3, -1, 7]),
            DirectMap::Hashtable(vec![(1, 10), (2, 20)]),
        ] {
            let mut sink = MemoryWriter::new();
            write_direct_map(&mut StructWriter::new(&mut sink), &direct_map).unwrap();
            let mut source = MemoryReader::new(sink.into_inner());
            let mut r = StructReader::new(&mut source, &IoConfig::default());
            assert_eq!(read_direct_map(&mut r).unwrap(), direct_map);
        }
    }
}

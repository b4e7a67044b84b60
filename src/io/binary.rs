//! Binary index codecs (`IBxF`, `IBwF`, `IBHf`).

use crate::error::{IndexIoError, Result};
use crate::index::{
    BinaryHeader, BinaryKind, IndexBinary, MetricType,
    binary::{BinaryHnsw, BinaryIvf},
};
use crate::registry::{BinaryTag, IndexTag};
use crate::storage::structured::{StructReader, StructWriter};

use super::context::{ReadContext, write_codes};
use super::index::{
    WriteOptions, check_quantizer_size, read_direct_map, read_hnsw_graph, read_ivf_lists,
    read_nlist, write_direct_map, write_hnsw_graph,
};
use super::invlists::write_invlists;

pub(crate) fn write_binary_node(
    w: &mut StructWriter,
    index: &IndexBinary,
    options: WriteOptions,
) -> Result<()> {
    let tag = index.tag();
    w.write_tag(tag.tag())?;
    w.scoped(tag, |w| {
        write_header(w, &index.header)?;
        match &index.kind {
            BinaryKind::Flat(codes) => write_codes(w, codes, "codes"),
            BinaryKind::Ivf(ivf) => {
                w.write_u64(ivf.nlist as u64)?;
                w.write_u64(ivf.nprobe as u64)?;
                write_binary_node(w, &ivf.quantizer, options)?;
                write_direct_map(w, &ivf.direct_map)?;
                write_invlists(w, &ivf.invlists)
            }
            BinaryKind::Hnsw(hnsw) => {
                write_hnsw_graph(w, &hnsw.graph)?;
                match &hnsw.storage {
                    Some(storage) if !options.skip_storage => {
                        write_binary_node(w, storage, options)
                    }
                    _ => w.write_tag(IndexTag::Null.tag()),
                }
            }
        }
    })
}

fn write_header(w: &mut StructWriter, header: &BinaryHeader) -> Result<()> {
    w.write_u32(header.d)?;
    w.write_u32(header.code_size)?;
    w.write_u64(header.ntotal)?;
    w.write_bool(header.is_trained)?;
    w.write_u32(header.metric.code())
}

pub(crate) fn read_binary_node(
    r: &mut StructReader,
    ctx: &mut ReadContext,
) -> Result<IndexBinary> {
    read_optional_binary(r, ctx)?
        .ok_or_else(|| r.format_error("tag", "null index where a binary index is required"))
}

fn read_optional_binary(
    r: &mut StructReader,
    ctx: &mut ReadContext,
) -> Result<Option<IndexBinary>> {
    let tag = r.read_tag("tag")?;
    if tag == IndexTag::Null.tag() {
        return Ok(None);
    }
    let Some(variant) = BinaryTag::from_tag(tag) else {
        return Err(IndexIoError::unknown_tag(BinaryTag::FAMILY, tag, r.context("")));
    };
    log::trace!("decoding {variant} at offset {}", r.position());

    r.scoped(variant, |r| {
        let header = read_header(r)?;
        let code_size = header.code_size as usize;
        let kind = match variant {
            BinaryTag::Flat => {
                let len = header.ntotal.checked_mul(code_size as u64).ok_or_else(|| {
                    r.format_error("codes", format!("ntotal={} overflows", header.ntotal))
                })?;
                BinaryKind::Flat(ctx.read_codes(r, len, "codes")?)
            }
            BinaryTag::Ivf => {
                let nlist = read_nlist(r)?;
                let nprobe = r.read_usize("nprobe")?;
                let quantizer = Box::new(read_binary_node(r, ctx)?);
                check_quantizer_size(r, quantizer.header.ntotal, nlist)?;
                let direct_map = read_direct_map(r)?;
                let invlists = read_ivf_lists(r, ctx, nlist, code_size)?;
                BinaryKind::Ivf(BinaryIvf {
                    nlist,
                    nprobe,
                    quantizer,
                    direct_map,
                    invlists,
                })
            }
            BinaryTag::Hnsw => {
                let graph = read_hnsw_graph(r)?;
                if graph.ntotal() as u64 != header.ntotal {
                    return Err(r.format_error(
                        "hnsw.levels",
                        format!("{} nodes for ntotal={}", graph.ntotal(), header.ntotal),
                    ));
                }
                let storage = read_optional_binary(r, ctx)?;
                if let Some(storage) = &storage
                    && storage.tag() != BinaryTag::Flat
                {
                    return Err(r.format_error(
                        "storage",
                        format!("expected IBxF storage, found {}", storage.tag()),
                    ));
                }
                BinaryKind::Hnsw(BinaryHnsw {
                    graph,
                    storage: storage.map(Box::new),
                })
            }
        };

        Ok(Some(IndexBinary {
            header,
            kind,
            read_only: false,
        }))
    })
}

fn read_header(r: &mut StructReader) -> Result<BinaryHeader> {
    let d = r.read_u32("d")?;
    if d % 8 != 0 {
        return Err(r.format_error("d", format!("{d} bits is not a multiple of 8")));
    }
    let code_size = r.read_u32("code_size")?;
    if code_size != d / 8 {
        return Err(r.format_error(
            "code_size",
            format!("expected {} (d / 8), got {code_size}", d / 8),
        ));
    }
    let ntotal = r.read_u64("ntotal")?;
    let is_trained = r.read_bool("is_trained")?;
    let code = r.read_u32("metric")?;
    let metric = MetricType::from_code(code)
        .ok_or_else(|| r.format_error("metric", format!("unknown metric code {code}")))?;

    Ok(BinaryHeader {
        d,
        code_size,
        ntotal,
        is_trained,
        metric,
    })
}

//! Inverted list codecs (`il00`, `ilar`, `ilod`).

use crate::error::{IndexIoError, Result};
use crate::invlists::{ArrayInvertedLists, ID_SIZE, InvertedLists, OnDiskInvertedLists, OnDiskList};
use crate::registry::InvlistsTag;
use crate::storage::structured::{StructReader, StructWriter};

use super::context::ReadContext;

pub(crate) fn write_invlists(w: &mut StructWriter, invlists: &InvertedLists) -> Result<()> {
    let tag = invlists.tag();
    w.write_tag(tag.tag())?;
    w.scoped(tag, |w| match invlists {
        InvertedLists::Null => Ok(()),
        InvertedLists::Array(array) => write_array(w, array),
        InvertedLists::OnDisk(ondisk) => write_ondisk(w, ondisk),
    })
}

fn write_array(w: &mut StructWriter, array: &ArrayInvertedLists) -> Result<()> {
    if !array.loaded {
        return Err(IndexIoError::policy(format!(
            "{}: cannot write inverted lists loaded without their contents",
            w.context()
        )));
    }

    w.write_u64(array.sizes.len() as u64)?;
    w.write_u64(array.code_size as u64)?;
    let sizes: Vec<u64> = array.sizes.iter().map(|&s| s as u64).collect();
    w.write_u64_vec(&sizes)?;
    for (list_no, &size) in array.sizes.iter().enumerate() {
        if size == 0 {
            continue;
        }
        w.write_raw(&array.codes[list_no])?;
        w.write_i64s(&array.ids[list_no])?;
    }
    Ok(())
}

fn write_ondisk(w: &mut StructWriter, ondisk: &OnDiskInvertedLists) -> Result<()> {
    let filename = ondisk.filename.to_str().ok_or_else(|| {
        IndexIoError::format(
            format!("{}.filename", w.context()),
            format!("{} is not valid UTF-8", ondisk.filename.display()),
        )
    })?;

    w.write_u64(ondisk.lists.len() as u64)?;
    w.write_u64(ondisk.code_size as u64)?;
    let triples: Vec<u64> = ondisk
        .lists
        .iter()
        .flat_map(|l| [l.size as u64, l.capacity as u64, l.offset])
        .collect();
    w.write_u64_vec(&triples)?;
    w.write_string(filename)?;
    w.write_u64(ondisk.totsize)
}

pub(crate) fn read_invlists(r: &mut StructReader, ctx: &ReadContext) -> Result<InvertedLists> {
    let tag = r.read_tag("tag")?;
    let Some(variant) = InvlistsTag::from_tag(tag) else {
        return Err(IndexIoError::unknown_tag(InvlistsTag::FAMILY, tag, r.context("")));
    };
    log::trace!("decoding {variant} at offset {}", r.position());

    r.scoped(variant, |r| match variant {
        InvlistsTag::Null => Ok(InvertedLists::Null),
        InvlistsTag::Array => read_array(r, ctx),
        InvlistsTag::OnDisk => read_ondisk(r, ctx).map(InvertedLists::OnDisk),
    })
}

fn read_array(r: &mut StructReader, ctx: &ReadContext) -> Result<InvertedLists> {
    let nlist = r.read_usize("nlist")?;
    let code_size = r.read_usize("code_size")?;
    let entry_size = code_size
        .checked_add(ID_SIZE)
        .ok_or_else(|| r.format_error("code_size", format!("implausible code size {code_size}")))?;

    let raw_sizes = r.read_u64_vec("sizes")?;
    if raw_sizes.len() != nlist {
        return Err(r.format_error(
            "sizes",
            format!("{} sizes for {nlist} lists", raw_sizes.len()),
        ));
    }
    let sizes = raw_sizes
        .iter()
        .map(|&size| r.check_alloc(size, entry_size, "sizes"))
        .collect::<Result<Vec<usize>>>()?;

    if ctx.policy.mmap {
        return map_array(r, ctx, code_size, sizes).map(InvertedLists::OnDisk);
    }

    if ctx.policy.skip_ivf_data {
        for &size in &sizes {
            r.skip((size * entry_size) as u64, "lists")?;
        }
        return Ok(InvertedLists::Array(ArrayInvertedLists::sizes_only(
            code_size, sizes,
        )));
    }

    let mut ids = Vec::with_capacity(nlist);
    let mut codes = Vec::with_capacity(nlist);
    for &size in &sizes {
        if size == 0 {
            ids.push(Vec::new());
            codes.push(Vec::new());
            continue;
        }
        codes.push(r.read_raw(size * code_size, "codes")?);
        ids.push(r.read_i64s(size, "ids")?);
    }

    Ok(InvertedLists::Array(ArrayInvertedLists {
        code_size,
        sizes,
        ids,
        codes,
        loaded: true,
    }))
}

/// Turn in-stream array lists into on-disk lists over a mapping of the
/// index file itself.
fn map_array(
    r: &mut StructReader,
    ctx: &ReadContext,
    code_size: usize,
    sizes: Vec<usize>,
) -> Result<OnDiskInvertedLists> {
    let filename = r
        .source_path()
        .map(|p| p.to_path_buf())
        .ok_or_else(|| {
            IndexIoError::policy(format!(
                "{}: MMAP needs a reader backed by a named file",
                r.context("")
            ))
        })?;

    let mut lists = Vec::with_capacity(sizes.len());
    for size in sizes {
        let offset = r.absolute_offset();
        r.skip((size * (code_size + ID_SIZE)) as u64, "lists")?;
        lists.push(OnDiskList {
            size,
            capacity: size,
            offset,
        });
    }
    let totsize = r.absolute_offset();

    let mapping = ctx.map_source(r, "lists")?;
    if (mapping.len() as u64) < totsize {
        return Err(r.format_error(
            "lists",
            format!("mapped file has {} bytes, lists end at {totsize}", mapping.len()),
        ));
    }

    Ok(OnDiskInvertedLists {
        code_size,
        lists,
        filename,
        totsize,
        mapping: Some(mapping),
    })
}

fn read_ondisk(r: &mut StructReader, ctx: &ReadContext) -> Result<OnDiskInvertedLists> {
    let nlist = r.read_usize("nlist")?;
    let code_size = r.read_u64("code_size")?;
    let code_size = r.check_alloc(code_size, 1, "code_size")?;
    let triples = r.read_u64_vec("lists")?;
    if Some(triples.len()) != nlist.checked_mul(3) {
        return Err(r.format_error(
            "lists",
            format!("{} values for {nlist} (size, capacity, offset) triples", triples.len()),
        ));
    }
    let filename = r.read_string("filename")?;
    let totsize = r.read_u64("totsize")?;

    let lists = triples
        .chunks_exact(3)
        .map(|t| {
            Ok(OnDiskList {
                size: r.check_alloc(t[0], 1, "lists")?,
                capacity: r.check_alloc(t[1], 1, "lists")?,
                offset: t[2],
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut ondisk = OnDiskInvertedLists {
        code_size,
        lists,
        filename: ctx.ondisk_path(r, &filename)?,
        totsize,
        mapping: None,
    };
    ondisk
        .validate()
        .map_err(|message| r.format_error("lists", message))?;

    if ctx.policy.mmap {
        let mapping = ctx.map_file(&ondisk.filename)?;
        if (mapping.len() as u64) < totsize {
            return Err(r.format_error(
                "totsize",
                format!(
                    "{} has {} bytes, expected at least {totsize}",
                    ondisk.filename.display(),
                    mapping.len()
                ),
            ));
        }
        ondisk.mapping = Some(mapping);
    }
    Ok(ondisk)
}

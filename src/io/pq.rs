//! Product quantizer codec (`PrQt`).

use crate::error::{IndexIoError, Result};
use crate::pq::ProductQuantizer;
use crate::registry::PqTag;
use crate::storage::structured::{StructReader, StructWriter};

pub(crate) fn write_pq(w: &mut StructWriter, pq: &ProductQuantizer) -> Result<()> {
    let tag = PqTag::ProductQuantizer;
    w.write_tag(tag.tag())?;
    w.scoped(tag, |w| {
        w.write_usize_u32(pq.d, "d")?;
        w.write_usize_u32(pq.m, "m")?;
        w.write_u32(pq.nbits)?;
        w.write_f32_vec(&pq.centroids)
    })
}

pub(crate) fn read_pq(r: &mut StructReader) -> Result<ProductQuantizer> {
    let tag = r.read_tag("tag")?;
    let Some(variant) = PqTag::from_tag(tag) else {
        return Err(IndexIoError::unknown_tag(PqTag::FAMILY, tag, r.context("")));
    };
    log::trace!("decoding {variant} at offset {}", r.position());

    r.scoped(variant, |r| {
        let d = r.read_u32("d")? as usize;
        let m = r.read_u32("m")? as usize;
        let nbits = r.read_u32("nbits")?;
        if m == 0 || d % m != 0 || !(1..=16).contains(&nbits) {
            return Err(r.format_error(
                "m",
                format!("invalid parameters d={d} m={m} nbits={nbits}"),
            ));
        }
        let centroids = r.read_f32_vec("centroids")?;
        ProductQuantizer::validate(d, m, nbits, centroids.len())
            .map_err(|message| r.format_error("centroids", message))?;

        Ok(ProductQuantizer {
            d,
            m,
            nbits,
            centroids,
            sdc_table: None,
        })
    })
}

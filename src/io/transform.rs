//! Vector transform codecs (`LTra`, `rrot`, `PcAm`, `VNrm`, `VCnt`).

use crate::error::{IndexIoError, Result};
use crate::registry::TransformTag;
use crate::storage::structured::{StructReader, StructWriter};
use crate::transform::{LinearTransform, PcaParams, TransformKind, VectorTransform};

pub(crate) fn write_transform(w: &mut StructWriter, vt: &VectorTransform) -> Result<()> {
    let tag = vt.tag();
    w.write_tag(tag.tag())?;
    w.scoped(tag, |w| {
        w.write_usize_u32(vt.d_in, "d_in")?;
        w.write_usize_u32(vt.d_out, "d_out")?;
        w.write_bool(vt.is_trained)?;

        match &vt.kind {
            TransformKind::Linear(linear) | TransformKind::RandomRotation(linear) => {
                write_linear(w, linear)
            }
            TransformKind::Pca { params, linear } => {
                w.write_f32(params.eigen_power)?;
                w.write_f32(params.epsilon)?;
                w.write_bool(params.random_rotation)?;
                w.write_u32(params.balanced_bins)?;
                w.write_f32_vec(&params.mean)?;
                w.write_f32_vec(&params.eigenvalues)?;
                w.write_f32_vec(&params.pca_matrix)?;
                write_linear(w, linear)
            }
            TransformKind::Normalization { norm } => w.write_f32(*norm),
            TransformKind::Centering { mean } => w.write_f32_vec(mean),
        }
    })
}

fn write_linear(w: &mut StructWriter, linear: &LinearTransform) -> Result<()> {
    w.write_bool(linear.have_bias)?;
    w.write_bool(linear.is_orthonormal)?;
    w.write_f32_vec(&linear.a)?;
    w.write_f32_vec(&linear.b)
}

pub(crate) fn read_transform(r: &mut StructReader) -> Result<VectorTransform> {
    let tag = r.read_tag("tag")?;
    let Some(variant) = TransformTag::from_tag(tag) else {
        return Err(IndexIoError::unknown_tag(TransformTag::FAMILY, tag, r.context("")));
    };
    log::trace!("decoding {variant} at offset {}", r.position());

    r.scoped(variant, |r| {
        let d_in = r.read_u32("d_in")? as usize;
        let d_out = r.read_u32("d_out")? as usize;
        let is_trained = r.read_bool("is_trained")?;

        let kind = match variant {
            TransformTag::Linear => TransformKind::Linear(read_linear(r, d_in, d_out)?),
            TransformTag::RandomRotation => {
                TransformKind::RandomRotation(read_linear(r, d_in, d_out)?)
            }
            TransformTag::Pca => {
                let eigen_power = r.read_f32("eigen_power")?;
                let epsilon = r.read_f32("epsilon")?;
                let random_rotation = r.read_bool("random_rotation")?;
                let balanced_bins = r.read_u32("balanced_bins")?;
                let mean = r.read_f32_vec("mean")?;
                expect_len(r, "mean", mean.len(), &[0, d_in])?;
                let eigenvalues = r.read_f32_vec("eigenvalues")?;
                let pca_matrix = r.read_f32_vec("pca_matrix")?;
                let linear = read_linear(r, d_in, d_out)?;
                TransformKind::Pca {
                    params: PcaParams {
                        eigen_power,
                        epsilon,
                        random_rotation,
                        balanced_bins,
                        mean,
                        eigenvalues,
                        pca_matrix,
                    },
                    linear,
                }
            }
            TransformTag::Normalization => TransformKind::Normalization {
                norm: r.read_f32("norm")?,
            },
            TransformTag::Centering => {
                let mean = r.read_f32_vec("mean")?;
                expect_len(r, "mean", mean.len(), &[0, d_in])?;
                TransformKind::Centering { mean }
            }
        };

        Ok(VectorTransform {
            d_in,
            d_out,
            is_trained,
            kind,
        })
    })
}

fn read_linear(r: &mut StructReader, d_in: usize, d_out: usize) -> Result<LinearTransform> {
    let have_bias = r.read_bool("have_bias")?;
    let is_orthonormal = r.read_bool("is_orthonormal")?;
    let a = r.read_f32_vec("A")?;
    expect_len(r, "A", a.len(), &[0, d_out * d_in])?;
    let b = r.read_f32_vec("b")?;
    expect_len(r, "b", b.len(), &[0, d_out])?;

    Ok(LinearTransform {
        have_bias,
        is_orthonormal,
        a,
        b,
    })
}

fn expect_len(r: &StructReader, field: &str, len: usize, allowed: &[usize]) -> Result<()> {
    if allowed.contains(&len) {
        return Ok(());
    }
    Err(r.format_error(
        field,
        format!("length {len} is not one of {allowed:?}"),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IoConfig;
    use crate::error::ErrorKind;
    use crate::storage::memory::{MemoryReader, MemoryWriter};

    fn round_trip(vt: &VectorTransform) -> Result<VectorTransform> {
        let mut sink = MemoryWriter::new();
        write_transform(&mut StructWriter::new(&mut sink), vt).unwrap();
        let mut source = MemoryReader::new(sink.into_inner());
        read_transform(&mut StructReader::new(&mut source, &IoConfig::default()))
    }

    #[test]
    fn test_pca_round_trip() {
        let vt = VectorTransform {
            d_in: 2,
            d_out: 1,
            is_trained: true,
            kind: TransformKind::Pca {
                params: PcaParams {
                    eigen_power: -0.5,
                    epsilon: 1e-6,
                    random_rotation: false,
                    balanced_bins: 0,
                    mean: vec![0.5, 0.5],
                    eigenvalues: vec![2.0, 1.0],
                    pca_matrix: vec![1.0, 0.0, 0.0, 1.0],
                },
                linear: LinearTransform {
                    have_bias: true,
                    is_orthonormal: true,
                    a: vec![1.0, 0.0],
                    b: vec![-0.5],
                },
            },
        };
        assert_eq!(round_trip(&vt).unwrap(), vt);
    }

    #[test]
    fn test_matrix_length_is_checked() {
        let mut vt = VectorTransform::linear(2, 2, vec![1.0; 4], None).unwrap();
        if let TransformKind::Linear(linear) = &mut vt.kind {
            linear.a.pop();
        }
        let err = round_trip(&vt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("LTra.A"));
    }

    #[test]
    fn test_untrained_rotation_has_empty_body() {
        let vt = VectorTransform {
            d_in: 8,
            d_out: 8,
            is_trained: false,
            kind: TransformKind::RandomRotation(LinearTransform::default()),
        };
        assert_eq!(round_trip(&vt).unwrap(), vt);
    }
}

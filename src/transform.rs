//! Vector transform models.
//!
//! Only the state that is persisted lives here, plus `apply` for the kinds
//! whose effect is fully determined by that state. Training is not modelled.

use crate::error::{IndexIoError, Result};
use crate::registry::TransformTag;

/// Linear map `y = A x + b`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LinearTransform {
    pub have_bias: bool,
    pub is_orthonormal: bool,
    /// Row-major `d_out x d_in` matrix, empty when untrained.
    pub a: Vec<f32>,
    /// Bias of length `d_out`, empty when `have_bias` is false.
    pub b: Vec<f32>,
}

/// PCA parameters persisted ahead of the linear body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct PcaParams {
    pub eigen_power: f32,
    pub epsilon: f32,
    pub random_rotation: bool,
    pub balanced_bins: u32,
    pub mean: Vec<f32>,
    pub eigenvalues: Vec<f32>,
    pub pca_matrix: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum TransformKind {
    Linear(LinearTransform),
    RandomRotation(LinearTransform),
    Pca {
        params: PcaParams,
        linear: LinearTransform,
    },
    /// Rescale each vector to the given L-norm (only 2.0 is applied).
    Normalization { norm: f32 },
    /// Subtract a per-component mean.
    Centering { mean: Vec<f32> },
}

/// A vector transform with its common header.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorTransform {
    pub d_in: usize,
    pub d_out: usize,
    pub is_trained: bool,
    pub kind: TransformKind,
}

impl VectorTransform {
    /// A trained linear transform.
    pub fn linear(d_in: usize, d_out: usize, a: Vec<f32>, b: Option<Vec<f32>>) -> Result<Self> {
        if a.len() != d_in * d_out {
            return Err(IndexIoError::format(
                "LTra.A",
                format!("expected {} values, got {}", d_in * d_out, a.len()),
            ));
        }
        let have_bias = b.is_some();
        let b = b.unwrap_or_default();
        if have_bias && b.len() != d_out {
            return Err(IndexIoError::format(
                "LTra.b",
                format!("expected {d_out} values, got {}", b.len()),
            ));
        }

        Ok(VectorTransform {
            d_in,
            d_out,
            is_trained: true,
            kind: TransformKind::Linear(LinearTransform {
                have_bias,
                is_orthonormal: false,
                a,
                b,
            }),
        })
    }

    /// L2 normalization over `d` components.
    pub fn normalization(d: usize) -> Self {
        VectorTransform {
            d_in: d,
            d_out: d,
            is_trained: true,
            kind: TransformKind::Normalization { norm: 2.0 },
        }
    }

    /// Centering with a known mean.
    pub fn centering(mean: Vec<f32>) -> Self {
        VectorTransform {
            d_in: mean.len(),
            d_out: mean.len(),
            is_trained: true,
            kind: TransformKind::Centering { mean },
        }
    }

    /// Registry tag of this transform.
    pub fn tag(&self) -> TransformTag {
        match self.kind {
            TransformKind::Linear(_) => TransformTag::Linear,
            TransformKind::RandomRotation(_) => TransformTag::RandomRotation,
            TransformKind::Pca { .. } => TransformTag::Pca,
            TransformKind::Normalization { .. } => TransformTag::Normalization,
            TransformKind::Centering { .. } => TransformTag::Centering,
        }
    }

    /// Linear body, for the kinds that carry one.
    pub fn linear_body(&self) -> Option<&LinearTransform> {
        match &self.kind {
            TransformKind::Linear(linear) | TransformKind::RandomRotation(linear) => Some(linear),
            TransformKind::Pca { linear, .. } => Some(linear),
            _ => None,
        }
    }

    /// Transform `n` vectors laid out contiguously in `x`.
    pub fn apply(&self, x: &[f32]) -> Result<Vec<f32>> {
        if !self.is_trained {
            return Err(IndexIoError::policy(format!(
                "{} transform is not trained",
                self.tag()
            )));
        }
        if self.d_in == 0 || x.len() % self.d_in != 0 {
            return Err(IndexIoError::format(
                self.tag().to_string(),
                format!("input length {} is not a multiple of d_in={}", x.len(), self.d_in),
            ));
        }

        if let Some(linear) = self.linear_body()
            && linear.a.len() != self.d_in * self.d_out
        {
            return Err(IndexIoError::policy(format!(
                "{} transform has no matrix to apply",
                self.tag()
            )));
        }

        let out = match &self.kind {
            TransformKind::Linear(linear)
            | TransformKind::RandomRotation(linear)
            | TransformKind::Pca { linear, .. } => x
                .chunks_exact(self.d_in)
                .flat_map(|v| apply_linear(linear, v, self.d_out))
                .collect(),
            TransformKind::Normalization { norm } => {
                if *norm != 2.0 {
                    return Err(IndexIoError::policy(format!(
                        "normalization with norm {norm} is not supported"
                    )));
                }
                x.chunks_exact(self.d_in)
                    .flat_map(|v| {
                        let len = v.iter().map(|c| c * c).sum::<f32>().sqrt();
                        v.iter()
                            .map(move |c| if len > 0.0 { c / len } else { *c })
                            .collect::<Vec<_>>()
                    })
                    .collect()
            }
            TransformKind::Centering { mean } => x
                .chunks_exact(self.d_in)
                .flat_map(|v| v.iter().zip(mean).map(|(c, m)| c - m).collect::<Vec<_>>())
                .collect(),
        };
        Ok(out)
    }
}

fn apply_linear(linear: &LinearTransform, v: &[f32], d_out: usize) -> Vec<f32> {
    let d_in = v.len();
    (0..d_out)
        .map(|row| {
            let dot: f32 = linear.a[row * d_in..(row + 1) * d_in]
                .iter()
                .zip(v)
                .map(|(a, x)| a * x)
                .sum();
            if linear.have_bias {
                dot + linear.b[row]
            } else {
                dot
            }
        })
        .collect()
}

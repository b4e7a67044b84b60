//! IVF index models.

use rayon::prelude::*;

use crate::error::{IndexIoError, Result};
use crate::invlists::InvertedLists;
use crate::pq::{ProductQuantizer, inner_product};

use super::Index;

/// Map from ids to their (list, offset) location.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DirectMap {
    #[default]
    None,
    /// Dense table indexed by id.
    Array(Vec<i64>),
    /// Sparse id to location entries.
    Hashtable(Vec<(i64, i64)>),
}

impl DirectMap {
    /// On-disk kind byte.
    pub fn kind_code(&self) -> u8 {
        match self {
            DirectMap::None => 0,
            DirectMap::Array(_) => 1,
            DirectMap::Hashtable(_) => 2,
        }
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        match self {
            DirectMap::None => 0,
            DirectMap::Array(entries) => entries.len(),
            DirectMap::Hashtable(entries) => entries.len(),
        }
    }

    /// True when nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Fields shared by every IVF variant.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfIndex {
    pub nlist: usize,
    pub nprobe: usize,
    /// Coarse quantizer holding the `nlist` centroids.
    pub quantizer: Box<Index>,
    pub direct_map: DirectMap,
    pub invlists: InvertedLists,
}

impl IvfIndex {
    /// Assign `vector` to its nearest list using a flat L2 quantizer.
    pub fn assign(&self, vector: &[f32]) -> Result<usize> {
        let centroids = self.quantizer.flat_vectors()?;
        let d = self.quantizer.header.d as usize;
        if vector.len() != d || d == 0 {
            return Err(IndexIoError::format(
                "ivf.assign",
                format!("vector has {} components, expected {d}", vector.len()),
            ));
        }

        centroids
            .chunks_exact(d)
            .enumerate()
            .map(|(list_no, c)| (list_no, crate::pq::l2_sqr(vector, c)))
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(list_no, _)| list_no)
            .ok_or_else(|| IndexIoError::policy("coarse quantizer is empty"))
    }
}

/// IVF index with product-quantized residuals.
#[derive(Debug, Clone, PartialEq)]
pub struct IvfPqIndex {
    pub ivf: IvfIndex,
    pub by_residual: bool,
    pub code_size: usize,
    pub pq: ProductQuantizer,
    /// Precomputed table policy: -1 never, 0 decided by size, 1 always.
    pub use_precomputed_table: i32,
    /// `nlist * m * ksub` table, when built.
    pub precomputed_table: Option<Vec<f32>>,
}

impl IvfPqIndex {
    /// Build the per-list term table for L2 residual search.
    ///
    /// Entry `(list, sub, k)` holds `|c_k|^2 + 2 <coarse_list[sub], c_k>`.
    pub fn compute_precomputed_table(&self, coarse_centroids: &[f32]) -> Result<Vec<f32>> {
        let d = self.pq.d;
        let (m, ksub, dsub) = (self.pq.m, self.pq.ksub(), self.pq.dsub());
        let overflow = || {
            IndexIoError::format(
                "IwPQ.precomputed_table",
                format!("nlist={} overflows the table size", self.ivf.nlist),
            )
        };
        let expected = self.ivf.nlist.checked_mul(d).ok_or_else(overflow)?;
        let table_len = self
            .ivf
            .nlist
            .checked_mul(m * ksub)
            .ok_or_else(overflow)?;
        if coarse_centroids.len() != expected {
            return Err(IndexIoError::format(
                "IwPQ.precomputed_table",
                format!(
                    "quantizer holds {} values, expected nlist * d = {expected}",
                    coarse_centroids.len()
                ),
            ));
        }

        let norms: Vec<f32> = (0..m)
            .flat_map(|sub| (0..ksub).map(move |k| (sub, k)))
            .map(|(sub, k)| {
                let c = self.pq.centroid(sub, k);
                inner_product(c, c)
            })
            .collect();

        let mut table = vec![0.0f32; table_len];
        table
            .par_chunks_mut(m * ksub)
            .zip(coarse_centroids.par_chunks(d))
            .for_each(|(block, coarse)| {
                for sub in 0..m {
                    let coarse_sub = &coarse[sub * dsub..(sub + 1) * dsub];
                    for k in 0..ksub {
                        let idx = sub * ksub + k;
                        block[idx] =
                            norms[idx] + 2.0 * inner_product(coarse_sub, self.pq.centroid(sub, k));
                    }
                }
            });
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{Index, MetricType};
    use crate::invlists::ArrayInvertedLists;

    fn small_ivfpq() -> IvfPqIndex {
        let quantizer = Index::flat_from_vectors(2, MetricType::L2, &[0.0, 0.0, 10.0, 10.0]).unwrap();
        let pq = ProductQuantizer::new(2, 2, 1, vec![0.0, 1.0, 0.0, 2.0]).unwrap();
        IvfPqIndex {
            ivf: IvfIndex {
                nlist: 2,
                nprobe: 1,
                quantizer: Box::new(quantizer),
                direct_map: DirectMap::None,
                invlists: InvertedLists::Array(ArrayInvertedLists::new(2, 1)),
            },
            by_residual: true,
            code_size: 1,
            pq,
            use_precomputed_table: 0,
            precomputed_table: None,
        }
    }

    #[test]
    fn test_assign_nearest_list() {
        let index = small_ivfpq();
        assert_eq!(index.ivf.assign(&[1.0, 2.0]).unwrap(), 0);
        assert_eq!(index.ivf.assign(&[9.0, 8.0]).unwrap(), 1);
        assert!(index.ivf.assign(&[1.0]).is_err());
    }

    #[test]
    fn test_precomputed_table_terms() {
        let index = small_ivfpq();
        let table = index
            .compute_precomputed_table(&[0.0, 0.0, 10.0, 10.0])
            .unwrap();
        assert_eq!(table.len(), 2 * 2 * 2);
        // list 0 has a zero centroid: only the norms remain
        assert_eq!(&table[..4], &[0.0, 1.0, 0.0, 4.0]);
        // list 1, sub 1, k 1: 4 + 2 * 10 * 2
        assert_eq!(table[7], 44.0);
    }

    #[test]
    fn test_precomputed_table_size_overflow() {
        let mut index = small_ivfpq();
        index.ivf.nlist = 1 << 62;
        let err = index
            .compute_precomputed_table(&[0.0, 0.0, 10.0, 10.0])
            .unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Format);
        assert!(err.to_string().contains("overflows"), "{err}");

        // A short quantizer is reported, not indexed past.
        let err = small_ivfpq().compute_precomputed_table(&[0.0, 0.0]).unwrap_err();
        assert!(err.to_string().contains("expected nlist * d = 4"), "{err}");
    }

    #[test]
    fn test_direct_map_codes() {
        assert_eq!(DirectMap::None.kind_code(), 0);
        assert_eq!(DirectMap::Array(vec![1, 2]).len(), 2);
        assert_eq!(DirectMap::Hashtable(vec![(1, 2)]).kind_code(), 2);
    }
}

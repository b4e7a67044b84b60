//! Product quantizer model.
//!
//! A `d`-dimensional vector is split into `m` sub-vectors of `d / m`
//! components; each sub-vector is replaced by the index of its nearest
//! centroid among `2^nbits`. Codes are bit-packed, `m * nbits` bits per
//! vector rounded up to whole bytes.
//!
//! Training is out of scope here: centroids are supplied by the caller or
//! read from a stream.

use rayon::prelude::*;

use crate::error::{IndexIoError, Result};

/// Largest `nbits` for which the SDC table is built.
pub const MAX_SDC_NBITS: u32 = 8;

/// Product quantizer.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductQuantizer {
    /// Vector dimensionality.
    pub d: usize,

    /// Number of sub-quantizers.
    pub m: usize,

    /// Bits per sub-quantizer code.
    pub nbits: u32,

    /// Centroids laid out as `m` tables of `ksub * dsub` floats.
    pub centroids: Vec<f32>,

    /// Symmetric distance table, `m * ksub * ksub` floats, when built.
    pub sdc_table: Option<Vec<f32>>,
}

impl ProductQuantizer {
    /// Create a quantizer, validating the parameters against the centroids.
    pub fn new(d: usize, m: usize, nbits: u32, centroids: Vec<f32>) -> Result<Self> {
        Self::validate(d, m, nbits, centroids.len()).map_err(|message| {
            IndexIoError::format("PrQt", message)
        })?;

        Ok(ProductQuantizer {
            d,
            m,
            nbits,
            centroids,
            sdc_table: None,
        })
    }

    /// Check the parameter invariants, returning a description of the first
    /// violation.
    pub fn validate(
        d: usize,
        m: usize,
        nbits: u32,
        centroids_len: usize,
    ) -> std::result::Result<(), String> {
        if m == 0 {
            return Err("m must be positive".to_string());
        }
        if d % m != 0 {
            return Err(format!("d={d} is not a multiple of m={m}"));
        }
        if !(1..=16).contains(&nbits) {
            return Err(format!("nbits={nbits} outside 1..=16"));
        }
        let expected = d * (1usize << nbits);
        if centroids_len != expected {
            return Err(format!(
                "expected {expected} centroid values (d * 2^nbits), got {centroids_len}"
            ));
        }
        Ok(())
    }

    /// Dimensionality of each sub-vector.
    pub fn dsub(&self) -> usize {
        self.d / self.m
    }

    /// Number of centroids per sub-quantizer.
    pub fn ksub(&self) -> usize {
        1 << self.nbits
    }

    /// Bytes per encoded vector.
    pub fn code_size(&self) -> usize {
        (self.m * self.nbits as usize).div_ceil(8)
    }

    /// Centroid `k` of sub-quantizer `sub`.
    pub fn centroid(&self, sub: usize, k: usize) -> &[f32] {
        let dsub = self.dsub();
        let start = (sub * self.ksub() + k) * dsub;
        &self.centroids[start..start + dsub]
    }

    /// Encode one vector.
    pub fn encode(&self, vector: &[f32]) -> Result<Vec<u8>> {
        if vector.len() != self.d {
            return Err(IndexIoError::format(
                "PrQt.encode",
                format!("vector has {} components, expected {}", vector.len(), self.d),
            ));
        }

        let dsub = self.dsub();
        let mut code = vec![0u8; self.code_size()];
        for (sub, sub_vector) in vector.chunks_exact(dsub).enumerate() {
            let nearest = (0..self.ksub())
                .map(|k| (k, l2_sqr(sub_vector, self.centroid(sub, k))))
                .min_by(|a, b| a.1.total_cmp(&b.1))
                .map(|(k, _)| k)
                .unwrap_or(0);
            pack_bits(&mut code, sub * self.nbits as usize, self.nbits, nearest as u32);
        }
        Ok(code)
    }

    /// Decode one code back into centroid space.
    pub fn decode(&self, code: &[u8]) -> Result<Vec<f32>> {
        if code.len() != self.code_size() {
            return Err(IndexIoError::format(
                "PrQt.decode",
                format!("code has {} bytes, expected {}", code.len(), self.code_size()),
            ));
        }

        let mut vector = Vec::with_capacity(self.d);
        for sub in 0..self.m {
            let k = unpack_bits(code, sub * self.nbits as usize, self.nbits) as usize;
            vector.extend_from_slice(self.centroid(sub, k));
        }
        Ok(vector)
    }

    /// Build the symmetric distance table.
    ///
    /// Only built for `nbits <= 8`; wider quantizers leave the table empty.
    pub fn compute_sdc_table(&mut self) {
        if self.nbits > MAX_SDC_NBITS {
            log::warn!(
                "not building SDC table for nbits={} (limit {MAX_SDC_NBITS})",
                self.nbits
            );
            self.sdc_table = None;
            return;
        }

        let ksub = self.ksub();
        let mut table = vec![0.0f32; self.m * ksub * ksub];
        table
            .par_chunks_mut(ksub * ksub)
            .enumerate()
            .for_each(|(sub, block)| {
                for i in 0..ksub {
                    let ci = self.centroid(sub, i);
                    for j in 0..ksub {
                        block[i * ksub + j] = l2_sqr(ci, self.centroid(sub, j));
                    }
                }
            });
        self.sdc_table = Some(table);
    }
}

pub(crate) fn l2_sqr(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y) * (x - y)).sum()
}

pub(crate) fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn pack_bits(code: &mut [u8], bit_offset: usize, nbits: u32, value: u32) {
    for bit in 0..nbits as usize {
        if value >> bit & 1 == 1 {
            let pos = bit_offset + bit;
            code[pos / 8] |= 1 << (pos % 8);
        }
    }
}

fn unpack_bits(code: &[u8], bit_offset: usize, nbits: u32) -> u32 {
    let mut value = 0u32;
    for bit in 0..nbits as usize {
        let pos = bit_offset + bit;
        if code[pos / 8] >> (pos % 8) & 1 == 1 {
            value |= 1 << bit;
        }
    }
    value
}

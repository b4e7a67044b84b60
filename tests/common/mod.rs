//! Seeded index builders shared by the integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use indexio::index::binary::{BinaryHnsw, BinaryIvf};
use indexio::index::{
    BinaryHeader, BinaryKind, CodeStorage, DirectMap, HnswGraph, HnswIndex, IdMapIndex, Index,
    IndexBinary, IndexHeader, IndexKind, IvfIndex, IvfPqIndex, MetricType, PqIndex,
    PreTransformIndex,
};
use indexio::invlists::{ArrayInvertedLists, InvertedLists};
use indexio::storage::MemoryWriter;
use indexio::{IoFlags, ProductQuantizer, VectorTransform, write_index, write_index_binary};

pub const D: usize = 16;

pub fn rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn random_vectors(rng: &mut StdRng, n: usize, d: usize) -> Vec<f32> {
    (0..n * d).map(|_| rng.random::<f32>() * 2.0 - 1.0).collect()
}

fn header(d: usize, ntotal: usize) -> IndexHeader {
    IndexHeader {
        ntotal: ntotal as u64,
        ..IndexHeader::new(d as u32, MetricType::L2)
    }
}

pub fn flat_index(seed: u64, n: usize, d: usize) -> Index {
    let vectors = random_vectors(&mut rng(seed), n, d);
    Index::flat_from_vectors(d as u32, MetricType::L2, &vectors).unwrap()
}

pub fn product_quantizer(rng: &mut StdRng, d: usize, m: usize, nbits: u32) -> ProductQuantizer {
    let centroids = random_vectors(rng, 1 << nbits, d);
    ProductQuantizer::new(d, m, nbits, centroids).unwrap()
}

pub fn pq_index(seed: u64, n: usize, d: usize, m: usize, nbits: u32) -> Index {
    let mut rng = rng(seed);
    let pq = product_quantizer(&mut rng, d, m, nbits);
    let vectors = random_vectors(&mut rng, n, d);
    let codes: Vec<u8> = vectors
        .chunks_exact(d)
        .flat_map(|v| pq.encode(v).unwrap())
        .collect();

    let mut index = Index::new(
        header(d, n),
        IndexKind::Pq(PqIndex {
            pq,
            codes: CodeStorage::Owned(codes),
            search_type: 0,
            encode_signs: false,
            polysemous_ht: 0,
        }),
    );
    index.rebuild_derived_tables().unwrap();
    index
}

fn ivf_core(rng: &mut StdRng, d: usize, nlist: usize, code_size: usize) -> IvfIndex {
    let centroids = random_vectors(rng, nlist, d);
    IvfIndex {
        nlist,
        nprobe: 4,
        quantizer: Box::new(Index::flat_from_vectors(d as u32, MetricType::L2, &centroids).unwrap()),
        direct_map: DirectMap::None,
        invlists: InvertedLists::Array(ArrayInvertedLists::new(nlist, code_size)),
    }
}

pub fn ivf_flat_index(seed: u64, n: usize, d: usize, nlist: usize) -> Index {
    let mut rng = rng(seed);
    let ivf = ivf_core(&mut rng, d, nlist, 4 * d);
    let mut index = Index::new(header(d, 0), IndexKind::IvfFlat(ivf));

    let vectors = random_vectors(&mut rng, n, d);
    for (id, v) in vectors.chunks_exact(d).enumerate() {
        let IndexKind::IvfFlat(ivf) = &index.kind else {
            unreachable!()
        };
        let list_no = ivf.assign(v).unwrap();
        let code: Vec<u8> = v.iter().flat_map(|x| x.to_le_bytes()).collect();
        index.add_ivf_entry(list_no, id as i64, &code).unwrap();
    }
    index
}

/// IVF-PQ over residuals, with `nlist` partitions and `m` sub-quantizers.
pub fn ivf_pq_index(seed: u64, n: usize, d: usize, nlist: usize, m: usize) -> Index {
    let mut rng = rng(seed);
    let pq = product_quantizer(&mut rng, d, m, 8);
    let code_size = pq.code_size();
    let ivf = ivf_core(&mut rng, d, nlist, code_size);
    let coarse = ivf.quantizer.flat_vectors().unwrap();

    let mut index = Index::new(
        header(d, 0),
        IndexKind::IvfPq(IvfPqIndex {
            ivf,
            by_residual: true,
            code_size,
            pq,
            use_precomputed_table: 0,
            precomputed_table: None,
        }),
    );

    let vectors = random_vectors(&mut rng, n, d);
    for (id, v) in vectors.chunks_exact(d).enumerate() {
        let IndexKind::IvfPq(ivfpq) = &index.kind else {
            unreachable!()
        };
        let list_no = ivfpq.ivf.assign(v).unwrap();
        let residual: Vec<f32> = v
            .iter()
            .zip(&coarse[list_no * d..(list_no + 1) * d])
            .map(|(x, c)| x - c)
            .collect();
        let code = ivfpq.pq.encode(&residual).unwrap();
        index.add_ivf_entry(list_no, 1000 + id as i64, &code).unwrap();
    }
    index.rebuild_derived_tables().unwrap();
    index
}

/// A small graph: a few upper-level nodes and a ring on level 0.
pub fn hnsw_graph(n: usize) -> HnswGraph {
    let mut graph = HnswGraph::new(4);
    for i in 0..n {
        graph.add_node(if i % 10 == 0 { 1 } else { 0 });
    }
    for i in 0..n {
        let slots = graph.neighbors_mut(i, 0).unwrap();
        slots[0] = ((i + 1) % n) as i32;
        slots[1] = ((i + n - 1) % n) as i32;
    }
    graph
}

pub fn hnsw_flat_index(seed: u64, n: usize, d: usize) -> Index {
    Index::new(
        header(d, n),
        IndexKind::HnswFlat(HnswIndex {
            graph: hnsw_graph(n),
            storage: Some(Box::new(flat_index(seed, n, d))),
        }),
    )
}

pub fn hnsw_pq_index(seed: u64, n: usize, d: usize) -> Index {
    let mut index = Index::new(
        header(d, n),
        IndexKind::HnswPq(HnswIndex {
            graph: hnsw_graph(n),
            storage: Some(Box::new(pq_index(seed, n, d, 4, 4))),
        }),
    );
    index.rebuild_derived_tables().unwrap();
    index
}

/// Centering, a linear projection to `d / 2` and normalization over a flat index.
pub fn pretransform_index(seed: u64, n: usize, d: usize) -> Index {
    let mut rng = rng(seed);
    let d_out = d / 2;
    let mean = random_vectors(&mut rng, 1, d);
    let a = random_vectors(&mut rng, d_out, d);
    let b = random_vectors(&mut rng, 1, d_out);

    let transforms = vec![
        VectorTransform::centering(mean),
        VectorTransform::linear(d, d_out, a, Some(b)).unwrap(),
        VectorTransform::normalization(d_out),
    ];
    let mut index = Index::new(
        header(d, 0),
        IndexKind::PreTransform(PreTransformIndex {
            transforms,
            inner: Box::new(Index::new_flat(d_out as u32, MetricType::L2)),
        }),
    );
    index.add_vectors(&random_vectors(&mut rng, n, d)).unwrap();
    index
}

pub fn idmap_index(seed: u64, n: usize, d: usize) -> Index {
    Index::new(
        header(d, n),
        IndexKind::IdMap(IdMapIndex {
            inner: Box::new(flat_index(seed, n, d)),
            id_map: (0..n as i64).map(|i| 7 * i + 3).collect(),
        }),
    )
}

/// One instance of every float variant.
pub fn all_indexes() -> Vec<Index> {
    vec![
        flat_index(1, 50, D),
        pq_index(2, 50, D, 4, 8),
        ivf_flat_index(3, 200, D, 8),
        ivf_pq_index(4, 200, D, 8, 8),
        hnsw_flat_index(5, 40, D),
        hnsw_pq_index(6, 40, D),
        pretransform_index(7, 30, D),
        idmap_index(8, 30, D),
    ]
}

pub fn binary_codes(seed: u64, n: usize, d_bits: usize) -> Vec<u8> {
    let mut rng = rng(seed);
    (0..n * d_bits / 8).map(|_| rng.random::<u8>()).collect()
}

pub fn binary_flat(seed: u64, n: usize, d_bits: usize) -> IndexBinary {
    IndexBinary::flat_from_codes(d_bits as u32, binary_codes(seed, n, d_bits)).unwrap()
}

pub fn binary_ivf(seed: u64, n: usize, d_bits: usize, nlist: usize) -> IndexBinary {
    let code_size = d_bits / 8;
    let mut index = IndexBinary {
        header: BinaryHeader::new(d_bits as u32).unwrap(),
        kind: BinaryKind::Ivf(BinaryIvf {
            nlist,
            nprobe: 2,
            quantizer: Box::new(binary_flat(seed, nlist, d_bits)),
            direct_map: DirectMap::Array((0..n as i64).collect()),
            invlists: InvertedLists::Array(ArrayInvertedLists::new(nlist, code_size)),
        }),
        read_only: false,
    };
    let codes = binary_codes(seed + 1, n, d_bits);
    for (id, code) in codes.chunks_exact(code_size).enumerate() {
        index.add_ivf_entry(id % nlist, id as i64, code).unwrap();
    }
    index
}

pub fn binary_hnsw(seed: u64, n: usize, d_bits: usize) -> IndexBinary {
    IndexBinary {
        header: BinaryHeader {
            ntotal: n as u64,
            ..BinaryHeader::new(d_bits as u32).unwrap()
        },
        kind: BinaryKind::Hnsw(BinaryHnsw {
            graph: hnsw_graph(n),
            storage: Some(Box::new(binary_flat(seed, n, d_bits))),
        }),
        read_only: false,
    }
}

pub fn all_binary_indexes() -> Vec<IndexBinary> {
    vec![
        binary_flat(11, 64, 64),
        binary_ivf(12, 100, 64, 4),
        binary_hnsw(13, 30, 32),
    ]
}

pub fn encode(index: &Index) -> Vec<u8> {
    let mut sink = MemoryWriter::new();
    write_index(index, &mut sink, IoFlags::NONE).unwrap();
    sink.into_inner()
}

pub fn encode_binary(index: &IndexBinary) -> Vec<u8> {
    let mut sink = MemoryWriter::new();
    write_index_binary(index, &mut sink, IoFlags::NONE).unwrap();
    sink.into_inner()
}

pub fn write_file(dir: &Path, name: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, bytes).unwrap();
    path
}

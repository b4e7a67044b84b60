mod common;

use tempfile::tempdir;

use indexio::index::IndexKind;
use indexio::invlists::{InvertedLists, OnDiskInvertedLists};
use indexio::storage::{MemoryReader, MemoryWriter};
use indexio::{
    ErrorKind, IndexIoError, IoConfig, IoFlags, read_index, read_index_binary,
    read_index_with_config, read_inverted_lists, read_vector_transform, write_inverted_lists,
};

use common::*;

// Byte offsets inside a node: tag, then d, ntotal, is_trained, metric, metric_arg.
const NTOTAL_AT: usize = 8;
const IS_TRAINED_AT: usize = 16;
const METRIC_AT: usize = 17;
const BODY_AT: usize = 25;

fn decode(bytes: &[u8]) -> indexio::Result<indexio::Index> {
    read_index(&mut MemoryReader::new(bytes.to_vec()), IoFlags::NONE)
}

fn put_u64(bytes: &mut [u8], at: usize, value: u64) {
    bytes[at..at + 8].copy_from_slice(&value.to_le_bytes());
}

fn find(bytes: &[u8], needle: &[u8]) -> usize {
    bytes
        .windows(needle.len())
        .position(|w| w == needle)
        .unwrap_or_else(|| panic!("{needle:?} not found"))
}

#[test]
fn test_truncation_at_every_byte_fails() {
    let indexes = vec![
        flat_index(300, 4, 4),
        pq_index(301, 3, 4, 2, 2),
        ivf_flat_index(302, 10, 4, 2),
        hnsw_flat_index(303, 5, 4),
        pretransform_index(304, 3, 4),
        idmap_index(305, 3, 4),
    ];

    for index in indexes {
        let bytes = encode(&index);
        for len in 0..bytes.len() {
            let err = decode(&bytes[..len]).unwrap_err();
            assert!(
                err.is_truncation(),
                "{} cut at {len}/{}: {err}",
                index.tag(),
                bytes.len()
            );
        }
        assert!(decode(&bytes).is_ok());
    }
}

#[test]
fn test_truncated_binary_index_fails() {
    let bytes = encode_binary(&binary_ivf(306, 12, 16, 2));
    for len in 0..bytes.len() {
        let err = read_index_binary(&mut MemoryReader::new(bytes[..len].to_vec()), IoFlags::NONE)
            .unwrap_err();
        assert!(err.is_truncation(), "cut at {len}: {err}");
    }
}

#[test]
fn test_unknown_top_level_tag() {
    let mut bytes = encode(&flat_index(307, 4, 4));
    bytes[..4].copy_from_slice(b"Zzzz");
    let err = decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(matches!(err, IndexIoError::UnknownTag { .. }));
    assert!(err.to_string().contains("Zzzz"));

    // Non-printable tags are shown in hex.
    bytes[..4].copy_from_slice(&[0, 1, 2, 3]);
    let err = decode(&bytes).unwrap_err();
    assert!(err.to_string().contains("0x03020100"), "{err}");
}

#[test]
fn test_null_at_top_level_is_rejected() {
    let err = decode(b"null").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(err.to_string().contains("null index at top level"));
}

#[test]
fn test_unknown_nested_tags_name_their_parent() {
    // Wrapped index of an id map.
    let mut bytes = encode(&idmap_index(308, 3, 4));
    bytes[BODY_AT..BODY_AT + 4].copy_from_slice(b"IxZZ");
    let err = decode(&bytes).unwrap_err();
    let IndexIoError::UnknownTag { family, context, .. } = &err else {
        panic!("expected an unknown tag, got {err}");
    };
    assert_eq!(*family, "index");
    assert_eq!(context, "IxMp");

    // Inverted lists of an IVF index.
    let mut bytes = encode(&ivf_flat_index(309, 10, 4, 2));
    let at = find(&bytes, b"ilar");
    bytes[at..at + 4].copy_from_slice(b"ilzz");
    let err = decode(&bytes).unwrap_err();
    let IndexIoError::UnknownTag { family, context, .. } = &err else {
        panic!("expected an unknown tag, got {err}");
    };
    assert_eq!(*family, "inverted lists");
    assert_eq!(context, "IwFl");

    // A transform in a chain.
    let mut bytes = encode(&pretransform_index(310, 3, 4));
    let at = find(&bytes, b"VCnt");
    bytes[at..at + 4].copy_from_slice(b"VZZZ");
    let err = decode(&bytes).unwrap_err();
    assert!(matches!(err, IndexIoError::UnknownTag { .. }), "{err}");
}

#[test]
fn test_families_do_not_mix() {
    let float = encode(&flat_index(311, 4, 8));
    let err = read_index_binary(&mut MemoryReader::new(float.clone()), IoFlags::NONE).unwrap_err();
    let IndexIoError::UnknownTag { family, .. } = &err else {
        panic!("expected an unknown tag, got {err}");
    };
    assert_eq!(*family, "binary index");

    let binary = encode_binary(&binary_flat(312, 4, 8));
    let err = decode(&binary).unwrap_err();
    assert!(matches!(err, IndexIoError::UnknownTag { .. }));

    assert!(read_vector_transform(&mut MemoryReader::new(float.clone())).is_err());
    assert!(read_inverted_lists(&mut MemoryReader::new(float), IoFlags::NONE).is_err());
}

#[test]
fn test_implausible_lengths_are_rejected_before_allocation() {
    let index = idmap_index(313, 3, 4);
    let mut bytes = encode(&index);
    let len_at = bytes.len() - 3 * 8 - 8;

    for claimed in [u64::MAX / 4, 1 << 40] {
        put_u64(&mut bytes, len_at, claimed);
        let err = decode(&bytes).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("implausible length"), "{err}");
        assert!(err.to_string().contains("IxMp.id_map"), "{err}");
    }
}

#[test]
fn test_allocation_limit_is_configurable() {
    let bytes = encode(&flat_index(314, 50, D));
    let config = IoConfig::default().with_max_alloc_bytes(64);
    let err = read_index_with_config(&mut MemoryReader::new(bytes.clone()), IoFlags::NONE, &config, None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(err.to_string().contains("64 byte limit"), "{err}");

    let config = IoConfig::default().with_max_alloc_bytes(50 * D as u64 * 4);
    assert!(read_index_with_config(&mut MemoryReader::new(bytes), IoFlags::NONE, &config, None).is_ok());
}

#[test]
fn test_header_corruption() {
    let bytes = encode(&flat_index(315, 4, 4));

    let mut corrupt = bytes.clone();
    corrupt[IS_TRAINED_AT] = 2;
    let err = decode(&corrupt).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(err.to_string().contains("IxFl.is_trained"), "{err}");

    let mut corrupt = bytes.clone();
    corrupt[METRIC_AT..METRIC_AT + 4].copy_from_slice(&99u32.to_le_bytes());
    let err = decode(&corrupt).unwrap_err();
    assert!(err.to_string().contains("unknown metric code 99"), "{err}");

    // ntotal disagrees with the code payload.
    let mut corrupt = bytes.clone();
    put_u64(&mut corrupt, NTOTAL_AT, 5);
    assert_eq!(decode(&corrupt).unwrap_err().kind(), ErrorKind::Format);

    // code_size must be 4 * d.
    let mut corrupt = bytes;
    put_u64(&mut corrupt, BODY_AT, 12);
    let err = decode(&corrupt).unwrap_err();
    assert!(err.to_string().contains("IxFl.code_size"), "{err}");
}

#[test]
fn test_nested_bool_corruption_has_full_context() {
    let index = pq_index(316, 3, 4, 2, 2);
    let mut bytes = encode(&index);
    // search_type (u32), encode_signs (bool), polysemous_ht (u32) close the node.
    let at = bytes.len() - 5;
    bytes[at] = 7;
    let err = decode(&bytes).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(err.to_string().contains("IxPq.encode_signs"), "{err}");
}

#[test]
fn test_bad_hnsw_graphs() {
    let index = hnsw_flat_index(317, 6, 4);

    let mut broken = index.clone();
    let IndexKind::HnswFlat(hnsw) = &mut broken.kind else {
        unreachable!()
    };
    hnsw.graph.offsets[2] = 1;
    hnsw.graph.offsets[1] = 3;
    let err = decode(&encode(&broken)).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Format);
    assert!(err.to_string().contains("not monotonic"), "{err}");

    let mut broken = index.clone();
    let IndexKind::HnswFlat(hnsw) = &mut broken.kind else {
        unreachable!()
    };
    let last = hnsw.graph.offsets.len() - 1;
    hnsw.graph.offsets[last] += 4;
    let err = decode(&encode(&broken)).unwrap_err();
    assert!(err.to_string().contains("IHNf/hnsw"), "{err}");

    let mut broken = index;
    let IndexKind::HnswFlat(hnsw) = &mut broken.kind else {
        unreachable!()
    };
    hnsw.graph.entry_point = 6;
    let err = decode(&encode(&broken)).unwrap_err();
    assert!(err.to_string().contains("entry point 6 out of range"), "{err}");
}

#[test]
fn test_hnsw_storage_must_match_variant() {
    let flat = hnsw_flat_index(318, 5, D);
    let mut bytes = encode(&flat);
    // Relabel the outer node as an HNSW-over-PQ index.
    bytes[..4].copy_from_slice(b"IHNp");
    let err = decode(&bytes).unwrap_err();
    assert!(err.to_string().contains("expected IxPq storage"), "{err}");
}

#[test]
fn test_trailing_bytes_are_left_unread() {
    let mut bytes = encode(&flat_index(319, 2, 4));
    let expected = decode(&bytes).unwrap();
    bytes.extend_from_slice(b"trailing");
    assert_eq!(decode(&bytes).unwrap(), expected);
}

#[test]
fn test_ondisk_code_size_is_bounded() {
    let dir = tempdir().unwrap();
    let index = ivf_flat_index(320, 10, 4, 2);
    let IndexKind::IvfFlat(ivf) = &index.kind else {
        unreachable!()
    };
    let InvertedLists::Array(array) = &ivf.invlists else {
        unreachable!()
    };
    let ondisk = OnDiskInvertedLists::create_from_array(array, dir.path().join("lists.data")).unwrap();
    let mut sink = MemoryWriter::new();
    write_inverted_lists(&InvertedLists::OnDisk(ondisk), &mut sink).unwrap();
    let bytes = sink.into_inner();

    // tag, nlist, then code_size
    for code_size in [u64::MAX, u64::MAX - 7, 1 << 41] {
        let mut corrupt = bytes.clone();
        put_u64(&mut corrupt, 12, code_size);
        let err = read_inverted_lists(&mut MemoryReader::new(corrupt), IoFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("ilod.code_size"), "{err}");
    }
}

/// IVF-PQ written without its lists, so only the quantizer can contradict `nlist`.
fn ivf_pq_without_lists(seed: u64) -> Vec<u8> {
    let mut index = ivf_pq_index(seed, 0, D, 4, 4);
    let IndexKind::IvfPq(ivfpq) = &mut index.kind else {
        unreachable!()
    };
    ivfpq.ivf.invlists = InvertedLists::Null;
    encode(&index)
}

#[test]
fn test_huge_nlist_with_null_lists() {
    let bytes = ivf_pq_without_lists(321);
    assert!(decode(&bytes).is_ok());

    for nlist in [1 << 62, u64::MAX] {
        let mut corrupt = bytes.clone();
        put_u64(&mut corrupt, BODY_AT, nlist);
        let err = decode(&corrupt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains("IwPQ.nlist"), "{err}");
    }
}

#[test]
fn test_nlist_must_match_quantizer() {
    let bytes = ivf_pq_without_lists(322);
    // 1 << 37 lists pass the allocation guard, so the quantizer check has to catch it.
    for nlist in [5, 1 << 37] {
        let mut corrupt = bytes.clone();
        put_u64(&mut corrupt, BODY_AT, nlist);
        let err = decode(&corrupt).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Format);
        assert!(err.to_string().contains(&format!("4 centroids for nlist={nlist}")), "{err}");
    }
}

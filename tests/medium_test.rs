mod common;

use std::io::{self, Read, Write};

use tempfile::tempdir;

use indexio::storage::{
    FileReader, HandleWriter, IoReader, IoWriter, MemoryReader, MemoryWriter, StreamReader,
};
use indexio::{
    ErrorKind, IoConfig, IoFlags, read_index, read_is_mv, read_is_mv_path, read_value,
    read_vector, write_index, write_index_to_path, write_mv, write_value, write_vector,
};

use common::*;

/// Hands out at most one byte per call.
#[derive(Debug)]
struct Trickle(io::Cursor<Vec<u8>>);

impl Read for Trickle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let end = buf.len().min(1);
        self.0.read(&mut buf[..end])
    }
}

impl IoReader for Trickle {}

/// Accepts `budget` bytes, then fails.
#[derive(Debug)]
struct FullDisk {
    budget: usize,
}

impl Write for FullDisk {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.budget == 0 {
            return Err(io::Error::other("no space left"));
        }
        let n = buf.len().min(self.budget);
        self.budget -= n;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl IoWriter for FullDisk {}

#[test]
fn test_primitives_share_one_medium() {
    let mut sink = MemoryWriter::new();
    write_value(7, &mut sink).unwrap();
    write_vector(&[1, 2, 3], &mut sink).unwrap();
    write_vector(&[], &mut sink).unwrap();
    write_mv(&mut sink).unwrap();
    write_value(0xdead_beef, &mut sink).unwrap();
    assert_eq!(sink.len(), 4 + (8 + 12) + 8 + 4 + 4);

    let mut source = MemoryReader::new(sink.into_inner());
    assert_eq!(read_value(&mut source).unwrap(), 7);
    assert_eq!(read_vector(&mut source).unwrap(), vec![1, 2, 3]);
    assert!(read_vector(&mut source).unwrap().is_empty());
    assert!(read_is_mv(&mut source).unwrap());
    // not the marker, but still consumed
    assert!(!read_is_mv(&mut source).unwrap());
    assert_eq!(source.remaining(), 0);

    let err = read_value(&mut source).unwrap_err();
    assert!(err.is_truncation());
}

#[test]
fn test_multi_vector_indexes() {
    let dir = tempdir().unwrap();
    let mut index = flat_index(400, 6, 4);
    index.mv_lims = Some(vec![0, 2, 6]);

    let path = dir.path().join("mv.index");
    write_index_to_path(&index, &path, IoFlags::NONE).unwrap();
    assert!(read_is_mv_path(&path).unwrap());

    let decoded = indexio::read_index_from_path(&path, IoFlags::NONE).unwrap();
    assert_eq!(decoded.mv_lims.as_deref(), Some([0, 2, 6].as_slice()));
    assert_eq!(decoded, index);

    let plain = write_file(dir.path(), "plain.index", &encode(&flat_index(401, 2, 4)));
    assert!(!read_is_mv_path(&plain).unwrap());

    let err = read_is_mv_path(dir.path().join("missing.index")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Io);
}

#[test]
fn test_short_reads_are_retried() {
    let index = ivf_pq_index(402, 60, D, 4, 4);
    let mut reader = Trickle(io::Cursor::new(encode(&index)));
    assert_eq!(read_index(&mut reader, IoFlags::NONE).unwrap(), index);
}

#[test]
fn test_write_failures_surface_as_io_errors() {
    let index = idmap_index(403, 20, 8);
    let full = encode(&index).len();

    for budget in [0, 3, full / 2, full - 1] {
        let mut sink = FullDisk { budget };
        let err = write_index(&index, &mut sink, IoFlags::NONE).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io, "budget {budget}");
    }

    let mut sink = FullDisk { budget: full };
    write_index(&index, &mut sink, IoFlags::NONE).unwrap();
}

#[test]
fn test_write_rejects_load_flags() {
    let mut sink = MemoryWriter::new();
    let err = write_index(&flat_index(404, 2, 4), &mut sink, IoFlags::MMAP).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Policy);
    assert!(sink.is_empty());
}

#[test]
fn test_stream_with_path_enables_same_dir_lists() {
    use indexio::invlists::{InvertedLists, OnDiskInvertedLists};

    let dir = tempdir().unwrap();
    let index = ivf_flat_index(405, 20, 4, 2);
    let indexio::index::IndexKind::IvfFlat(ivf) = &index.kind else {
        unreachable!()
    };
    let InvertedLists::Array(array) = &ivf.invlists else {
        unreachable!()
    };
    let ondisk = OnDiskInvertedLists::create_from_array(array, dir.path().join("data")).unwrap();

    let mut sink = MemoryWriter::new();
    indexio::write_inverted_lists(&InvertedLists::OnDisk(ondisk), &mut sink).unwrap();
    let bytes = sink.into_inner();

    let mut reader =
        StreamReader::new(io::Cursor::new(bytes)).with_path(dir.path().join("lists.meta"));
    let lists = indexio::read_inverted_lists(&mut reader, IoFlags::ONDISK_SAME_DIR).unwrap();
    assert_eq!(lists.list_ids(0).unwrap(), array.ids[0]);
}

#[test]
fn test_handle_writer_appends_at_position() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("appended.index");
    let index = pq_index(406, 8, D, 4, 8);

    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(&[0xff; 16]).unwrap();
    {
        let mut writer = HandleWriter::new(&mut file, &IoConfig::default());
        write_index(&index, &mut writer, IoFlags::NONE).unwrap();
    }
    drop(file);

    let mut reader = FileReader::open(&path, &IoConfig::default()).unwrap();
    let mut preamble = [0u8; 16];
    reader.read_exact(&mut preamble).unwrap();
    assert_eq!(preamble, [0xff; 16]);
    assert_eq!(read_index(&mut reader, IoFlags::NONE).unwrap(), index);
}

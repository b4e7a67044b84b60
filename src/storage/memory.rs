//! In-memory and generic stream adapters.
//!
//! [`StreamReader`] and [`StreamWriter`] accept any caller-supplied
//! [`Read`]/[`Write`] implementation. [`MemoryReader`] and [`MemoryWriter`]
//! keep the bytes in a buffer, which is what tests and in-process round trips
//! use.

use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};

use crate::storage::traits::{IoReader, IoWriter};

/// Reader over any caller-supplied byte stream.
#[derive(Debug)]
pub struct StreamReader<R: Read> {
    inner: R,
    path: Option<PathBuf>,
}

impl<R: Read> StreamReader<R> {
    /// Wrap `inner`.
    pub fn new(inner: R) -> Self {
        StreamReader { inner, path: None }
    }

    /// Associate a source path with the stream.
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> Read for StreamReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Read + std::fmt::Debug> IoReader for StreamReader<R> {
    fn source_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }
}

/// Writer over any caller-supplied byte sink.
#[derive(Debug)]
pub struct StreamWriter<W: Write> {
    inner: W,
}

impl<W: Write> StreamWriter<W> {
    /// Wrap `inner`.
    pub fn new(inner: W) -> Self {
        StreamWriter { inner }
    }

    /// Unwrap the underlying sink.
    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: Write> Write for StreamWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W: Write + std::fmt::Debug> IoWriter for StreamWriter<W> {}

/// Reader over an owned byte buffer.
#[derive(Debug, Clone)]
pub struct MemoryReader {
    cursor: Cursor<Vec<u8>>,
}

impl MemoryReader {
    /// Read from `data`, starting at its first byte.
    pub fn new(data: Vec<u8>) -> Self {
        MemoryReader {
            cursor: Cursor::new(data),
        }
    }

    /// Number of bytes consumed so far.
    pub fn position(&self) -> u64 {
        self.cursor.position()
    }

    /// Number of bytes not consumed yet.
    pub fn remaining(&self) -> usize {
        let len = self.cursor.get_ref().len() as u64;
        len.saturating_sub(self.cursor.position()) as usize
    }
}

impl From<&[u8]> for MemoryReader {
    fn from(data: &[u8]) -> Self {
        MemoryReader::new(data.to_vec())
    }
}

impl Read for MemoryReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.cursor.read(buf)
    }
}

impl IoReader for MemoryReader {}

/// Writer into a growable byte buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    buffer: Vec<u8>,
}

impl MemoryWriter {
    /// Create an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes written so far.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// True when nothing was written.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Take the written bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buffer
    }
}

impl Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl IoWriter for MemoryWriter {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_writer_reader() {
        let mut writer = MemoryWriter::new();
        assert!(writer.is_empty());
        writer.write_all(b"test data").unwrap();
        assert_eq!(writer.len(), 9);

        let mut reader = MemoryReader::new(writer.into_inner());
        let mut buf = [0u8; 4];
        reader.read_exact(&mut buf).unwrap();
        assert_eq!(&buf, b"test");
        assert_eq!(reader.position(), 4);
        assert_eq!(reader.remaining(), 5);
    }

    #[test]
    fn test_short_read_is_unexpected_eof() {
        let mut reader = MemoryReader::from(&b"ab"[..]);
        let mut buf = [0u8; 4];
        let err = reader.read_exact(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }

    #[test]
    fn test_stream_adapters_wrap_any_io() {
        let mut writer = StreamWriter::new(Vec::new());
        writer.write_all(&[1, 2, 3]).unwrap();
        let bytes = writer.into_inner();

        let mut reader = StreamReader::new(Cursor::new(bytes)).with_path("/tmp/x.index");
        assert_eq!(reader.source_path(), Some(Path::new("/tmp/x.index")));
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();
        assert_eq!(out, vec![1, 2, 3]);
    }
}

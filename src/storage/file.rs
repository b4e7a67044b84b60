//! File-backed medium adapters.
//!
//! [`FileReader`] and [`FileWriter`] own the file they open: the handle is
//! released when the adapter is dropped, which covers early returns on
//! malformed input as well as panics. [`HandleReader`] and [`HandleWriter`]
//! borrow a caller-owned [`File`] and never close it.

use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Seek, Write};
use std::path::{Path, PathBuf};

use crate::config::IoConfig;
use crate::error::{IndexIoError, Result};
use crate::storage::traits::{IoReader, IoWriter};

/// Reader that opens a named file.
#[derive(Debug)]
pub struct FileReader {
    reader: BufReader<File>,
    path: PathBuf,
    size: u64,
}

impl FileReader {
    /// Open `path` for reading.
    pub fn open<P: AsRef<Path>>(path: P, config: &IoConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|e| {
            IndexIoError::io(format!("open {}", path.display()), e)
        })?;
        let size = file
            .metadata()
            .map_err(|e| IndexIoError::io(format!("stat {}", path.display()), e))?
            .len();

        Ok(FileReader {
            reader: BufReader::with_capacity(config.buffer_size, file),
            path,
            size,
        })
    }

    /// Size of the file in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }
}

impl Read for FileReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl IoReader for FileReader {
    fn source_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Writer that creates (or truncates) a named file.
#[derive(Debug)]
pub struct FileWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    position: u64,
}

impl FileWriter {
    /// Create `path` for writing, truncating any existing content.
    pub fn create<P: AsRef<Path>>(path: P, config: &IoConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)
            .map_err(|e| IndexIoError::io(format!("create {}", path.display()), e))?;

        Ok(FileWriter {
            writer: BufWriter::with_capacity(config.buffer_size, file),
            path,
            position: 0,
        })
    }

    /// Number of bytes written so far.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl Write for FileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let bytes_written = self.writer.write(buf)?;
        self.position += bytes_written as u64;
        Ok(bytes_written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl IoWriter for FileWriter {
    fn flush_and_sync(&mut self) -> Result<()> {
        let context = || format!("sync {}", self.path.display());
        self.writer.flush().map_err(|e| IndexIoError::io(context(), e))?;
        self.writer
            .get_ref()
            .sync_all()
            .map_err(|e| IndexIoError::io(context(), e))?;
        Ok(())
    }

    fn target_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Reader over a caller-owned file handle.
///
/// Reads are unbuffered so that, once a decode returns, the handle is
/// positioned right after the last consumed byte.
#[derive(Debug)]
pub struct HandleReader<'a> {
    file: &'a mut File,
    path: Option<PathBuf>,
    base_offset: u64,
}

impl<'a> HandleReader<'a> {
    /// Wrap `file` at its current position.
    pub fn new(file: &'a mut File) -> Result<Self> {
        let base_offset = file
            .stream_position()
            .map_err(|e| IndexIoError::io("file handle position", e))?;
        Ok(HandleReader {
            file,
            path: None,
            base_offset,
        })
    }

    /// Tell the reader which path the handle was opened from.
    ///
    /// Enables the flags that need a source path (on-disk same-dir, mmap).
    pub fn with_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.path = Some(path.into());
        self
    }
}

impl Read for HandleReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.file.read(buf)
    }
}

impl IoReader for HandleReader<'_> {
    fn source_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn base_offset(&self) -> u64 {
        self.base_offset
    }
}

/// Writer over a caller-owned file handle.
#[derive(Debug)]
pub struct HandleWriter<'a> {
    writer: BufWriter<&'a mut File>,
}

impl<'a> HandleWriter<'a> {
    /// Wrap `file` at its current position.
    pub fn new(file: &'a mut File, config: &IoConfig) -> Self {
        HandleWriter {
            writer: BufWriter::with_capacity(config.buffer_size, file),
        }
    }
}

impl Write for HandleWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.writer.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }
}

impl IoWriter for HandleWriter<'_> {}

//! Medium traits shared by every reader and writer adapter.

use std::fmt::Debug;
use std::io::{Read, Write};
use std::path::Path;

use crate::error::Result;

/// A sequential source of bytes.
///
/// `read` follows [`std::io::Read`]: it returns how many bytes were actually
/// produced and advances the position by that amount. Decoders use
/// `read_exact` for mandatory fields, so a medium that ends early surfaces as
/// an `UnexpectedEof` I/O error.
pub trait IoReader: Read + Debug {
    /// The file backing this reader, if any.
    ///
    /// Needed to re-root on-disk list files and to map storage.
    fn source_path(&self) -> Option<&Path> {
        None
    }

    /// Absolute file offset of the first byte this reader produced.
    fn base_offset(&self) -> u64 {
        0
    }
}

/// A sequential sink of bytes.
pub trait IoWriter: Write + Debug {
    /// Flush buffered bytes and, for files, sync them to disk.
    fn flush_and_sync(&mut self) -> Result<()> {
        self.flush()?;
        Ok(())
    }

    /// The file this writer targets, if any.
    fn target_path(&self) -> Option<&Path> {
        None
    }
}

// Forwarding impls so boxed and borrowed adapters can be passed anywhere a
// reader or writer is expected.
impl IoReader for Box<dyn IoReader> {
    fn source_path(&self) -> Option<&Path> {
        self.as_ref().source_path()
    }

    fn base_offset(&self) -> u64 {
        self.as_ref().base_offset()
    }
}

impl<T: IoReader + ?Sized> IoReader for &mut T {
    fn source_path(&self) -> Option<&Path> {
        (**self).source_path()
    }

    fn base_offset(&self) -> u64 {
        (**self).base_offset()
    }
}

impl IoWriter for Box<dyn IoWriter> {
    fn flush_and_sync(&mut self) -> Result<()> {
        self.as_mut().flush_and_sync()
    }

    fn target_path(&self) -> Option<&Path> {
        self.as_ref().target_path()
    }
}

impl<T: IoWriter + ?Sized> IoWriter for &mut T {
    fn flush_and_sync(&mut self) -> Result<()> {
        (**self).flush_and_sync()
    }

    fn target_path(&self) -> Option<&Path> {
        (**self).target_path()
    }
}

//! Primitive codec for the tagged binary format.
//!
//! All scalars are little-endian. A sequence is a `u64` element count followed
//! by the elements; a string is a `u64` byte length followed by UTF-8 bytes; a
//! boolean is one byte holding 0 or 1.
//!
//! [`StructReader`] keeps a stack of entity names so every error names where
//! it happened (`IwPQ/ilar.sizes`), and refuses declared lengths above
//! [`IoConfig::max_alloc_bytes`] before allocating anything.

use std::io::{self, Read, Write};
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::config::IoConfig;
use crate::error::{IndexIoError, Result};
use crate::registry::Tag;
use crate::storage::traits::{IoReader, IoWriter};

/// Payloads are pulled from the medium in chunks of at most this many bytes,
/// so a bogus length fails on a short read instead of a huge allocation.
const READ_CHUNK: usize = 1 << 20;

fn entity_context(scope: &[String], field: &str) -> String {
    match (scope.is_empty(), field.is_empty()) {
        (true, true) => "<root>".to_string(),
        (true, false) => field.to_string(),
        (false, true) => scope.join("/"),
        (false, false) => format!("{}.{}", scope.join("/"), field),
    }
}

/// A structured reader over any [`IoReader`].
#[derive(Debug)]
pub struct StructReader<'a> {
    reader: &'a mut dyn IoReader,
    max_alloc_bytes: u64,
    position: u64,
    scope: Vec<String>,
}

macro_rules! read_scalar {
    ($(#[$meta:meta])* $name:ident, $ty:ty $(, $order:ty)?) => {
        $(#[$meta])*
        pub fn $name(&mut self, field: &str) -> Result<$ty> {
            let value = self
                .reader
                .$name$(::<$order>)?()
                .map_err(|e| self.io_error(field, e))?;
            self.position += std::mem::size_of::<$ty>() as u64;
            Ok(value)
        }
    };
}

macro_rules! read_array {
    ($(#[$meta:meta])* $fixed:ident, $prefixed:ident, $ty:ty, $decode:path) => {
        $(#[$meta])*
        pub fn $fixed(&mut self, count: usize, field: &str) -> Result<Vec<$ty>> {
            let bytes = self.read_elements(count, std::mem::size_of::<$ty>(), field)?;
            let mut values = vec![<$ty>::default(); count];
            $decode(&bytes, &mut values);
            Ok(values)
        }

        /// Read a length-prefixed sequence.
        pub fn $prefixed(&mut self, field: &str) -> Result<Vec<$ty>> {
            let count = self.read_len(std::mem::size_of::<$ty>(), field)?;
            self.$fixed(count, field)
        }
    };
}

impl<'a> StructReader<'a> {
    /// Wrap `reader`.
    pub fn new(reader: &'a mut dyn IoReader, config: &IoConfig) -> Self {
        StructReader {
            reader,
            max_alloc_bytes: config.max_alloc_bytes,
            position: 0,
            scope: Vec::new(),
        }
    }

    /// Bytes consumed through this reader.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Absolute file offset of the next byte.
    pub fn absolute_offset(&self) -> u64 {
        self.reader.base_offset() + self.position
    }

    /// The file backing the medium, if any.
    pub fn source_path(&self) -> Option<&Path> {
        self.reader.source_path()
    }

    /// Allocation guard in effect.
    pub fn max_alloc_bytes(&self) -> u64 {
        self.max_alloc_bytes
    }

    /// Diagnostic path for `field` inside the current entity.
    pub fn context(&self, field: &str) -> String {
        entity_context(&self.scope, field)
    }

    /// Run `f` inside the entity `name`.
    pub fn scoped<T>(
        &mut self,
        name: impl ToString,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.scope.push(name.to_string());
        let result = f(self);
        self.scope.pop();
        result
    }

    /// A format error at `field`.
    pub fn format_error(&self, field: &str, message: impl Into<String>) -> IndexIoError {
        IndexIoError::format(self.context(field), message)
    }

    fn io_error(&self, field: &str, err: io::Error) -> IndexIoError {
        IndexIoError::io(self.context(field), err)
    }

    read_scalar!(
        /// Read one byte.
        read_u8, u8
    );
    read_scalar!(
        /// Read a `u32`.
        read_u32, u32, LittleEndian
    );
    read_scalar!(
        /// Read an `i32`.
        read_i32, i32, LittleEndian
    );
    read_scalar!(
        /// Read a `u64`.
        read_u64, u64, LittleEndian
    );
    read_scalar!(
        /// Read an `i64`.
        read_i64, i64, LittleEndian
    );
    read_scalar!(
        /// Read an `f32`.
        read_f32, f32, LittleEndian
    );
    read_scalar!(
        /// Read an `f64`.
        read_f64, f64, LittleEndian
    );

    /// Read a boolean byte. Anything but 0 or 1 is a format error.
    pub fn read_bool(&mut self, field: &str) -> Result<bool> {
        match self.read_u8(field)? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(self.format_error(field, format!("invalid boolean byte {other}"))),
        }
    }

    /// Read a type tag.
    pub fn read_tag(&mut self, field: &str) -> Result<Tag> {
        self.read_u32(field).map(Tag)
    }

    /// Read a `u64` that must fit in `usize`.
    pub fn read_usize(&mut self, field: &str) -> Result<usize> {
        let value = self.read_u64(field)?;
        usize::try_from(value)
            .map_err(|_| self.format_error(field, format!("value {value} does not fit in memory")))
    }

    /// Check that `count` elements of `elem_size` bytes pass the allocation guard.
    pub fn check_alloc(&self, count: u64, elem_size: usize, field: &str) -> Result<usize> {
        let bytes = count.checked_mul(elem_size as u64);
        match bytes {
            Some(bytes) if bytes <= self.max_alloc_bytes => usize::try_from(count).map_err(|_| {
                self.format_error(field, format!("length {count} does not fit in memory"))
            }),
            _ => Err(self.format_error(
                field,
                format!(
                    "implausible length {count} (x{elem_size} bytes) exceeds the {} byte limit",
                    self.max_alloc_bytes
                ),
            )),
        }
    }

    /// Read a sequence element count and check it against the allocation guard.
    pub fn read_len(&mut self, elem_size: usize, field: &str) -> Result<usize> {
        let count = self.read_u64(field)?;
        self.check_alloc(count, elem_size.max(1), field)
    }

    fn read_elements(&mut self, count: usize, elem_size: usize, field: &str) -> Result<Vec<u8>> {
        let len = self.check_alloc(count as u64, elem_size, field)? * elem_size;
        self.read_raw(len, field)
    }

    /// Read exactly `len` bytes.
    pub fn read_raw(&mut self, len: usize, field: &str) -> Result<Vec<u8>> {
        self.check_alloc(len as u64, 1, field)?;

        let mut buffer = Vec::with_capacity(len.min(READ_CHUNK));
        while buffer.len() < len {
            let want = (len - buffer.len()).min(READ_CHUNK);
            let read = (&mut *self.reader)
                .take(want as u64)
                .read_to_end(&mut buffer);
            let got = read.map_err(|e| self.io_error(field, e))?;
            self.position += got as u64;
            if got < want {
                return Err(self.io_error(
                    field,
                    io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("expected {len} bytes, stream ended after {}", buffer.len()),
                    ),
                ));
            }
        }
        Ok(buffer)
    }

    /// Consume `len` bytes without keeping them.
    pub fn skip(&mut self, len: u64, field: &str) -> Result<()> {
        let copy = io::copy(&mut (&mut *self.reader).take(len), &mut io::sink());
        let copied = copy.map_err(|e| self.io_error(field, e))?;
        self.position += copied;
        if copied < len {
            return Err(self.io_error(
                field,
                io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("expected to skip {len} bytes, stream ended after {copied}"),
                ),
            ));
        }
        Ok(())
    }

    /// Read a length-prefixed byte sequence.
    pub fn read_bytes(&mut self, field: &str) -> Result<Vec<u8>> {
        let len = self.read_len(1, field)?;
        self.read_raw(len, field)
    }

    /// Read a length-prefixed UTF-8 string.
    pub fn read_string(&mut self, field: &str) -> Result<String> {
        let bytes = self.read_bytes(field)?;
        String::from_utf8(bytes).map_err(|e| self.format_error(field, format!("invalid UTF-8: {e}")))
    }

    read_array!(
        /// Read `count` `u32` values.
        read_u32s, read_u32_vec, u32, LittleEndian::read_u32_into
    );
    read_array!(
        /// Read `count` `i32` values.
        read_i32s, read_i32_vec, i32, LittleEndian::read_i32_into
    );
    read_array!(
        /// Read `count` `u64` values.
        read_u64s, read_u64_vec, u64, LittleEndian::read_u64_into
    );
    read_array!(
        /// Read `count` `i64` values.
        read_i64s, read_i64_vec, i64, LittleEndian::read_i64_into
    );
    read_array!(
        /// Read `count` `f32` values.
        read_f32s, read_f32_vec, f32, LittleEndian::read_f32_into
    );
    read_array!(
        /// Read `count` `f64` values.
        read_f64s, read_f64_vec, f64, LittleEndian::read_f64_into
    );
}

/// A structured writer over any [`IoWriter`].
#[derive(Debug)]
pub struct StructWriter<'a> {
    writer: &'a mut dyn IoWriter,
    position: u64,
    scope: Vec<String>,
}

macro_rules! write_scalar {
    ($(#[$meta:meta])* $name:ident, $ty:ty, $write:ident $(, $order:ty)?) => {
        $(#[$meta])*
        pub fn $name(&mut self, value: $ty) -> Result<()> {
            self.writer
                .$write$(::<$order>)?(value)
                .map_err(|e| self.io_error(e))?;
            self.position += std::mem::size_of::<$ty>() as u64;
            Ok(())
        }
    };
}

macro_rules! write_array {
    ($(#[$meta:meta])* $fixed:ident, $prefixed:ident, $ty:ty, $encode:path) => {
        $(#[$meta])*
        pub fn $fixed(&mut self, values: &[$ty]) -> Result<()> {
            let mut bytes = vec![0u8; values.len() * std::mem::size_of::<$ty>()];
            $encode(values, &mut bytes);
            self.write_raw(&bytes)
        }

        /// Write a length-prefixed sequence.
        pub fn $prefixed(&mut self, values: &[$ty]) -> Result<()> {
            self.write_u64(values.len() as u64)?;
            self.$fixed(values)
        }
    };
}

impl<'a> StructWriter<'a> {
    /// Wrap `writer`.
    pub fn new(writer: &'a mut dyn IoWriter) -> Self {
        StructWriter {
            writer,
            position: 0,
            scope: Vec::new(),
        }
    }

    /// Bytes written through this writer.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Diagnostic path of the current entity.
    pub fn context(&self) -> String {
        entity_context(&self.scope, "")
    }

    /// Run `f` inside the entity `name`.
    pub fn scoped<T>(
        &mut self,
        name: impl ToString,
        f: impl FnOnce(&mut Self) -> Result<T>,
    ) -> Result<T> {
        self.scope.push(name.to_string());
        let result = f(self);
        self.scope.pop();
        result
    }

    fn io_error(&self, err: io::Error) -> IndexIoError {
        IndexIoError::io(format!("write {}", self.context()), err)
    }

    /// Write a count or dimension that the format stores as a `u32`.
    pub fn write_usize_u32(&mut self, value: usize, field: &str) -> Result<()> {
        let value = u32::try_from(value).map_err(|_| {
            IndexIoError::format(
                entity_context(&self.scope, field),
                format!("{value} does not fit in a u32"),
            )
        })?;
        self.write_u32(value)
    }

    write_scalar!(
        /// Write one byte.
        write_u8, u8, write_u8
    );
    write_scalar!(
        /// Write a `u32`.
        write_u32, u32, write_u32, LittleEndian
    );
    write_scalar!(
        /// Write an `i32`.
        write_i32, i32, write_i32, LittleEndian
    );
    write_scalar!(
        /// Write a `u64`.
        write_u64, u64, write_u64, LittleEndian
    );
    write_scalar!(
        /// Write an `i64`.
        write_i64, i64, write_i64, LittleEndian
    );
    write_scalar!(
        /// Write an `f32`.
        write_f32, f32, write_f32, LittleEndian
    );
    write_scalar!(
        /// Write an `f64`.
        write_f64, f64, write_f64, LittleEndian
    );

    /// Write a boolean as one byte.
    pub fn write_bool(&mut self, value: bool) -> Result<()> {
        self.write_u8(u8::from(value))
    }

    /// Write a type tag.
    pub fn write_tag(&mut self, tag: Tag) -> Result<()> {
        self.write_u32(tag.value())
    }

    /// Write bytes without a length prefix.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer.write_all(bytes).map_err(|e| self.io_error(e))?;
        self.position += bytes.len() as u64;
        Ok(())
    }

    /// Write a length-prefixed byte sequence.
    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_u64(bytes.len() as u64)?;
        self.write_raw(bytes)
    }

    /// Write a length-prefixed UTF-8 string.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    write_array!(
        /// Write `u32` values without a length prefix.
        write_u32s, write_u32_vec, u32, LittleEndian::write_u32_into
    );
    write_array!(
        /// Write `i32` values without a length prefix.
        write_i32s, write_i32_vec, i32, LittleEndian::write_i32_into
    );
    write_array!(
        /// Write `u64` values without a length prefix.
        write_u64s, write_u64_vec, u64, LittleEndian::write_u64_into
    );
    write_array!(
        /// Write `i64` values without a length prefix.
        write_i64s, write_i64_vec, i64, LittleEndian::write_i64_into
    );
    write_array!(
        /// Write `f32` values without a length prefix.
        write_f32s, write_f32_vec, f32, LittleEndian::write_f32_into
    );
    write_array!(
        /// Write `f64` values without a length prefix.
        write_f64s, write_f64_vec, f64, LittleEndian::write_f64_into
    );

    /// Flush the underlying medium.
    pub fn flush(&mut self) -> Result<()> {
        self.writer.flush().map_err(|e| self.io_error(e))
    }
}

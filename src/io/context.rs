//! Per-call read state: the validated load policy, the optional mapping
//! scope, and which flag-gated features some decoder actually honoured.

use std::path::{Path, PathBuf};

use crate::error::{IndexIoError, Result};
use crate::flags::LoadPolicy;
use crate::index::CodeStorage;
use crate::storage::mmap::{MappedBytes, MappingScope};
use crate::storage::structured::{StructReader, StructWriter};

/// Fail before any I/O when a mapped load cannot be carried out.
pub(crate) fn check_mapping_prerequisites(
    policy: &LoadPolicy,
    scope: Option<&MappingScope>,
    source: Option<&Path>,
) -> Result<()> {
    if !policy.needs_mapping() {
        return Ok(());
    }
    if scope.is_none() {
        return Err(IndexIoError::policy(
            "MMAP/MMAP_IFC need a MappingScope; use one of the *_mapped readers",
        ));
    }
    if source.is_none() {
        return Err(IndexIoError::policy(
            "MMAP/MMAP_IFC need a reader backed by a named file",
        ));
    }
    Ok(())
}

pub(crate) struct ReadContext<'s> {
    pub policy: LoadPolicy,
    scope: Option<&'s MappingScope>,
    /// Set once a decoder loaded norms for `WITH_NORM`.
    pub norms_loaded: bool,
}

impl<'s> ReadContext<'s> {
    pub fn new(policy: LoadPolicy, scope: Option<&'s MappingScope>) -> Self {
        ReadContext {
            policy,
            scope,
            norms_loaded: false,
        }
    }

    /// Map `path` through the caller's scope.
    pub fn map_file(&self, path: &Path) -> Result<MappedBytes> {
        let scope = self
            .scope
            .ok_or_else(|| IndexIoError::policy("mapped load without a MappingScope"))?;
        scope.map_file(path)
    }

    /// Map the file the reader is decoding.
    pub fn map_source(&self, r: &StructReader, field: &str) -> Result<MappedBytes> {
        let path = r.source_path().ok_or_else(|| {
            IndexIoError::policy(format!(
                "{}: mapping needs a reader backed by a named file",
                r.context(field)
            ))
        })?;
        let path = path.to_path_buf();
        self.map_file(&path)
    }

    /// Resolve an on-disk list file name under `ONDISK_SAME_DIR`.
    pub fn ondisk_path(&self, r: &StructReader, filename: &str) -> Result<PathBuf> {
        let path = PathBuf::from(filename);
        if !self.policy.ondisk_same_dir {
            return Ok(path);
        }

        let dir = r
            .source_path()
            .and_then(Path::parent)
            .ok_or_else(|| {
                IndexIoError::policy(format!(
                    "{}: ONDISK_SAME_DIR needs a reader backed by a named file",
                    r.context("filename")
                ))
            })?;
        let name = path.file_name().ok_or_else(|| {
            r.format_error("filename", format!("'{filename}' has no file name"))
        })?;
        Ok(dir.join(name))
    }

    /// Decode a length-prefixed code payload according to the policy.
    pub fn read_codes(
        &mut self,
        r: &mut StructReader,
        expected_len: u64,
        field: &str,
    ) -> Result<CodeStorage> {
        let declared = r.read_u64(field)?;
        if declared != expected_len {
            return Err(r.format_error(
                field,
                format!("declared {declared} bytes, expected {expected_len}"),
            ));
        }
        let len = r.check_alloc(declared, 1, field)?;

        if self.policy.skip_storage {
            r.skip(declared, field)?;
            return Ok(CodeStorage::NotLoaded { len });
        }

        if self.policy.mmap_flat_codes {
            let offset = r.absolute_offset();
            r.skip(declared, field)?;
            let start = usize::try_from(offset).map_err(|_| {
                r.format_error(field, format!("offset {offset} does not fit in memory"))
            })?;
            let view = self.map_source(r, field)?;
            let view = view.slice(start, len, &r.context(field))?;
            return Ok(CodeStorage::Mapped(view));
        }

        Ok(CodeStorage::Owned(r.read_raw(len, field)?))
    }
}

/// Encode a length-prefixed code payload.
pub(crate) fn write_codes(w: &mut StructWriter, codes: &CodeStorage, field: &str) -> Result<()> {
    let context = format!("{}.{field}", w.context());
    codes.with_bytes(&context, |bytes| w.write_bytes(bytes))?
}

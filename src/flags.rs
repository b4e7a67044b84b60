//! Load flags and their validation.
//!
//! Flags are carried as an [`IoFlags`] bit set whose values are compatible with
//! the historic integer constants, and are turned into a [`LoadPolicy`] of named
//! booleans exactly once, at the call boundary, before any I/O happens.
//!
//! Combination rules:
//!
//! | Flag | Excludes |
//! |---|---|
//! | `SKIP_STORAGE` | `MMAP_IFC`, `WITH_NORM` |
//! | `MMAP_IFC` | `SKIP_STORAGE`, `WITH_NORM` |
//! | `WITH_NORM` | `SKIP_STORAGE`, `MMAP_IFC` |
//!
//! `MMAP` always carries the `SKIP_IVF_DATA` bit; a value containing only part
//! of the `MMAP` pattern is rejected. Every other pair is independent.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign};

use crate::error::{IndexIoError, Result};

/// Bit set of load flags.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IoFlags(u32);

const MMAP_PATTERN: u32 = 0x646f_0000;

impl IoFlags {
    /// No flags.
    pub const NONE: IoFlags = IoFlags(0);
    /// Consume flat/PQ code payloads without materializing them.
    pub const SKIP_STORAGE: IoFlags = IoFlags(1);
    /// Mark the decoded graph immutable.
    pub const READ_ONLY: IoFlags = IoFlags(2);
    /// Re-root on-disk list files into the directory of the index being read.
    pub const ONDISK_SAME_DIR: IoFlags = IoFlags(4);
    /// Read inverted list sizes only.
    pub const SKIP_IVF_DATA: IoFlags = IoFlags(8);
    /// Do not build the IVF-PQ precomputed table after load.
    pub const SKIP_PRECOMPUTE_TABLE: IoFlags = IoFlags(16);
    /// Do not build product quantizer SDC tables after load.
    pub const PQ_SKIP_SDC_TABLE: IoFlags = IoFlags(32);
    /// Load flat codes together with per-element norms.
    pub const WITH_NORM: IoFlags = IoFlags(1 << 8);
    /// Map inverted lists instead of copying them. Implies `SKIP_IVF_DATA`.
    pub const MMAP: IoFlags = IoFlags(8 | MMAP_PATTERN);
    /// Map flat/PQ/graph-storage codes instead of copying them.
    pub const MMAP_IFC: IoFlags = IoFlags(1 << 9);

    const KNOWN: u32 = 1 | 2 | 4 | 8 | 16 | 32 | (1 << 8) | (1 << 9) | MMAP_PATTERN;

    /// Flags accepted by [`crate::io::read_inverted_lists`].
    pub const INVLISTS_SUBSET: IoFlags =
        IoFlags(Self::SKIP_IVF_DATA.0 | Self::MMAP.0 | Self::ONDISK_SAME_DIR.0);

    /// Flags accepted by the binary index reader.
    pub const BINARY_SUBSET: IoFlags = IoFlags(
        Self::SKIP_STORAGE.0
            | Self::READ_ONLY.0
            | Self::ONDISK_SAME_DIR.0
            | Self::SKIP_IVF_DATA.0
            | Self::MMAP.0
            | Self::MMAP_IFC.0,
    );

    /// Flags accepted on the write path.
    pub const WRITE_SUBSET: IoFlags = Self::SKIP_STORAGE;

    /// Wrap a raw integer value.
    pub const fn from_bits(bits: u32) -> Self {
        IoFlags(bits)
    }

    /// The raw integer value.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// True when every bit of `other` is set.
    pub const fn contains(self, other: IoFlags) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Fail unless every set bit belongs to `allowed`.
    pub fn restrict_to(self, allowed: IoFlags, operation: &str) -> Result<()> {
        let extra = self.0 & !allowed.0;
        if extra != 0 {
            return Err(IndexIoError::policy(format!(
                "{operation} does not support flags {:?}",
                IoFlags(extra)
            )));
        }
        Ok(())
    }

    /// Validate the combination and expand it into named options.
    pub fn policy(self) -> Result<LoadPolicy> {
        let unknown = self.0 & !Self::KNOWN;
        if unknown != 0 {
            return Err(IndexIoError::policy(format!(
                "unknown load flag bits 0x{unknown:x}"
            )));
        }

        let pattern = self.0 & MMAP_PATTERN;
        if pattern != 0 && pattern != MMAP_PATTERN {
            return Err(IndexIoError::policy(format!(
                "partial MMAP flag pattern 0x{pattern:x}"
            )));
        }
        let mmap = pattern == MMAP_PATTERN;
        if mmap && !self.contains(Self::SKIP_IVF_DATA) {
            return Err(IndexIoError::policy(
                "MMAP pattern without its SKIP_IVF_DATA bit",
            ));
        }

        let policy = LoadPolicy {
            skip_storage: self.contains(Self::SKIP_STORAGE),
            read_only: self.contains(Self::READ_ONLY),
            ondisk_same_dir: self.contains(Self::ONDISK_SAME_DIR),
            skip_ivf_data: self.contains(Self::SKIP_IVF_DATA),
            skip_precompute_table: self.contains(Self::SKIP_PRECOMPUTE_TABLE),
            pq_skip_sdc_table: self.contains(Self::PQ_SKIP_SDC_TABLE),
            with_norm: self.contains(Self::WITH_NORM),
            mmap,
            mmap_flat_codes: self.contains(Self::MMAP_IFC),
        };

        let exclusive = [
            (policy.skip_storage, policy.mmap_flat_codes, "SKIP_STORAGE", "MMAP_IFC"),
            (policy.skip_storage, policy.with_norm, "SKIP_STORAGE", "WITH_NORM"),
            (policy.mmap_flat_codes, policy.with_norm, "MMAP_IFC", "WITH_NORM"),
        ];
        for (a, b, name_a, name_b) in exclusive {
            if a && b {
                return Err(IndexIoError::policy(format!(
                    "unsupported flag combination: {name_a} and {name_b} are mutually exclusive"
                )));
            }
        }

        Ok(policy)
    }
}

impl BitOr for IoFlags {
    type Output = IoFlags;

    fn bitor(self, rhs: IoFlags) -> IoFlags {
        IoFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for IoFlags {
    fn bitor_assign(&mut self, rhs: IoFlags) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for IoFlags {
    type Output = IoFlags;

    fn bitand(self, rhs: IoFlags) -> IoFlags {
        IoFlags(self.0 & rhs.0)
    }
}

impl From<u32> for IoFlags {
    fn from(bits: u32) -> Self {
        IoFlags(bits)
    }
}

impl fmt::Debug for IoFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMED: &[(IoFlags, &str)] = &[
            (IoFlags::MMAP, "MMAP"),
            (IoFlags::SKIP_STORAGE, "SKIP_STORAGE"),
            (IoFlags::READ_ONLY, "READ_ONLY"),
            (IoFlags::ONDISK_SAME_DIR, "ONDISK_SAME_DIR"),
            (IoFlags::SKIP_IVF_DATA, "SKIP_IVF_DATA"),
            (IoFlags::SKIP_PRECOMPUTE_TABLE, "SKIP_PRECOMPUTE_TABLE"),
            (IoFlags::PQ_SKIP_SDC_TABLE, "PQ_SKIP_SDC_TABLE"),
            (IoFlags::WITH_NORM, "WITH_NORM"),
            (IoFlags::MMAP_IFC, "MMAP_IFC"),
        ];

        if self.0 == 0 {
            return write!(f, "NONE");
        }

        let mut rest = self.0;
        let mut names = Vec::new();
        for (flag, name) in NAMED {
            if rest & flag.0 == flag.0 {
                names.push((*name).to_string());
                rest &= !flag.0;
            }
        }
        if rest != 0 {
            names.push(format!("0x{rest:x}"));
        }
        write!(f, "{}", names.join(" | "))
    }
}

/// Validated load flags as named options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadPolicy {
    pub skip_storage: bool,
    pub read_only: bool,
    pub ondisk_same_dir: bool,
    pub skip_ivf_data: bool,
    pub skip_precompute_table: bool,
    pub pq_skip_sdc_table: bool,
    pub with_norm: bool,
    pub mmap: bool,
    pub mmap_flat_codes: bool,
}

impl LoadPolicy {
    /// True when any part of the graph will be backed by a mapping.
    pub fn needs_mapping(&self) -> bool {
        self.mmap || self.mmap_flat_codes
    }

    /// Convert back into a flag set.
    pub fn to_flags(&self) -> IoFlags {
        let mut flags = IoFlags::NONE;
        let named = [
            (self.skip_storage, IoFlags::SKIP_STORAGE),
            (self.read_only, IoFlags::READ_ONLY),
            (self.ondisk_same_dir, IoFlags::ONDISK_SAME_DIR),
            (self.skip_ivf_data, IoFlags::SKIP_IVF_DATA),
            (self.skip_precompute_table, IoFlags::SKIP_PRECOMPUTE_TABLE),
            (self.pq_skip_sdc_table, IoFlags::PQ_SKIP_SDC_TABLE),
            (self.with_norm, IoFlags::WITH_NORM),
            (self.mmap, IoFlags::MMAP),
            (self.mmap_flat_codes, IoFlags::MMAP_IFC),
        ];
        for (enabled, flag) in named {
            if enabled {
                flags |= flag;
            }
        }
        flags
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_historic_values() {
        assert_eq!(IoFlags::SKIP_STORAGE.bits(), 1);
        assert_eq!(IoFlags::READ_ONLY.bits(), 2);
        assert_eq!(IoFlags::ONDISK_SAME_DIR.bits(), 4);
        assert_eq!(IoFlags::SKIP_IVF_DATA.bits(), 8);
        assert_eq!(IoFlags::SKIP_PRECOMPUTE_TABLE.bits(), 16);
        assert_eq!(IoFlags::PQ_SKIP_SDC_TABLE.bits(), 32);
        assert_eq!(IoFlags::WITH_NORM.bits(), 256);
        assert_eq!(IoFlags::MMAP.bits(), 0x646f_0008);
        assert_eq!(IoFlags::MMAP_IFC.bits(), 512);
    }

    #[test]
    fn test_mmap_implies_skip_ivf_data() {
        let policy = IoFlags::MMAP.policy().unwrap();
        assert!(policy.mmap);
        assert!(policy.skip_ivf_data);
        assert!(policy.needs_mapping());
        assert_eq!(policy.to_flags(), IoFlags::MMAP);
    }

    #[test]
    fn test_partial_mmap_pattern_is_rejected() {
        let err = IoFlags::from_bits(0x0064_0000).policy().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Policy);

        let err = IoFlags::from_bits(MMAP_PATTERN).policy().unwrap_err();
        assert!(err.to_string().contains("SKIP_IVF_DATA"));
    }

    #[test]
    fn test_unknown_bits_are_rejected() {
        let err = IoFlags::from_bits(1 << 12).policy().unwrap_err();
        assert!(err.to_string().contains("0x1000"));
    }

    #[test]
    fn test_mutually_exclusive_pairs() {
        for flags in [
            IoFlags::SKIP_STORAGE | IoFlags::MMAP_IFC,
            IoFlags::SKIP_STORAGE | IoFlags::WITH_NORM,
            IoFlags::MMAP_IFC | IoFlags::WITH_NORM,
        ] {
            let err = flags.policy().unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Policy);
            assert!(err.to_string().contains("mutually exclusive"));
        }
    }

    #[test]
    fn test_independent_flags_compose() {
        let flags = IoFlags::READ_ONLY
            | IoFlags::ONDISK_SAME_DIR
            | IoFlags::SKIP_PRECOMPUTE_TABLE
            | IoFlags::PQ_SKIP_SDC_TABLE
            | IoFlags::MMAP
            | IoFlags::MMAP_IFC;
        let policy = flags.policy().unwrap();
        assert!(policy.read_only && policy.ondisk_same_dir && policy.mmap);
        assert!(policy.mmap_flat_codes && policy.pq_skip_sdc_table);
        assert_eq!(policy.to_flags(), flags);
    }

    #[test]
    fn test_restrict_to_subset() {
        assert!(IoFlags::MMAP.restrict_to(IoFlags::INVLISTS_SUBSET, "read").is_ok());
        let err = IoFlags::WITH_NORM
            .restrict_to(IoFlags::INVLISTS_SUBSET, "read_inverted_lists")
            .unwrap_err();
        assert!(err.to_string().contains("WITH_NORM"));
    }

    #[test]
    fn test_debug_names() {
        assert_eq!(format!("{:?}", IoFlags::NONE), "NONE");
        assert_eq!(format!("{:?}", IoFlags::MMAP | IoFlags::READ_ONLY), "MMAP | READ_ONLY");
    }
}

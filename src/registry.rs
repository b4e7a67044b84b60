//! Type tag registry.
//!
//! Every concrete variant of every entity family is identified on disk by a
//! four-character code packed little-endian into a `u32`. The tag is always
//! the first field of an entity's serialized form.
//!
//! Each family is a closed enum. Decoding goes through `from_tag`, which
//! returns `None` for anything unregistered so the caller can raise an
//! unsupported-format error; encoding goes through the model types' `tag()`
//! methods, which match exhaustively on the variant.

use std::fmt;

/// A four-character type tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Tag(pub u32);

impl Tag {
    /// Pack four ASCII bytes into a tag.
    pub const fn from_fourcc(code: [u8; 4]) -> Self {
        Tag(code[0] as u32 | (code[1] as u32) << 8 | (code[2] as u32) << 16 | (code[3] as u32) << 24)
    }

    /// The raw tag value as written to the stream.
    pub const fn value(self) -> u32 {
        self.0
    }

    /// The four bytes of the tag in stream order.
    pub const fn bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = self.bytes();
        if bytes.iter().all(|b| b.is_ascii_graphic()) {
            // all four bytes are printable ASCII
            write!(f, "{}", String::from_utf8_lossy(&bytes))
        } else {
            write!(f, "0x{:08x}", self.0)
        }
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tag({self})")
    }
}

/// Marker written in front of an index that carries multi-vector offsets.
pub const MV_MARKER: Tag = Tag::from_fourcc(*b"MvIx");

macro_rules! tag_family {
    (
        $(#[$meta:meta])*
        $name:ident, $family:literal {
            $($(#[$vmeta:meta])* $variant:ident => $code:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
        }

        impl $name {
            /// Family name used in diagnostics.
            pub const FAMILY: &'static str = $family;

            /// Every registered variant of this family.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// The on-disk tag of this variant.
            pub const fn tag(self) -> Tag {
                match self {
                    $($name::$variant => Tag::from_fourcc(*$code),)+
                }
            }

            /// Look up the variant registered for `tag`.
            pub fn from_tag(tag: Tag) -> Option<Self> {
                Self::ALL.iter().copied().find(|variant| variant.tag() == tag)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.tag())
            }
        }
    };
}

tag_family! {
    /// Float index variants.
    IndexTag, "index" {
        Flat => b"IxFl",
        Pq => b"IxPq",
        IvfFlat => b"IwFl",
        IvfPq => b"IwPQ",
        HnswFlat => b"IHNf",
        HnswPq => b"IHNp",
        PreTransform => b"IxPT",
        IdMap => b"IxMp",
        /// Placeholder for storage that was deliberately not written.
        Null => b"null",
    }
}

tag_family! {
    /// Vector transform variants.
    TransformTag, "vector transform" {
        Linear => b"LTra",
        RandomRotation => b"rrot",
        Pca => b"PcAm",
        Normalization => b"VNrm",
        Centering => b"VCnt",
    }
}

tag_family! {
    /// Product quantizer variants.
    PqTag, "product quantizer" {
        ProductQuantizer => b"PrQt",
    }
}

tag_family! {
    /// Inverted list variants.
    InvlistsTag, "inverted lists" {
        Null => b"il00",
        Array => b"ilar",
        OnDisk => b"ilod",
    }
}

tag_family! {
    /// Binary index variants.
    BinaryTag, "binary index" {
        Flat => b"IBxF",
        Ivf => b"IBwF",
        Hnsw => b"IBHf",
    }
}

/// Every registered tag with its family name, in registry order.
pub fn all_tags() -> Vec<(&'static str, Tag)> {
    let mut tags = Vec::new();
    tags.extend(IndexTag::ALL.iter().map(|t| (IndexTag::FAMILY, t.tag())));
    tags.extend(TransformTag::ALL.iter().map(|t| (TransformTag::FAMILY, t.tag())));
    tags.extend(PqTag::ALL.iter().map(|t| (PqTag::FAMILY, t.tag())));
    tags.extend(InvlistsTag::ALL.iter().map(|t| (InvlistsTag::FAMILY, t.tag())));
    tags.extend(BinaryTag::ALL.iter().map(|t| (BinaryTag::FAMILY, t.tag())));
    tags.push(("marker", MV_MARKER));
    tags
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_fourcc_packing_is_little_endian() {
        let tag = Tag::from_fourcc(*b"IxFl");
        assert_eq!(tag.bytes(), *b"IxFl");
        assert_eq!(tag.value(), u32::from_le_bytes(*b"IxFl"));
        assert_eq!(tag.to_string(), "IxFl");
    }

    #[test]
    fn test_non_printable_tag_display() {
        assert_eq!(Tag(0).to_string(), "0x00000000");
        assert_eq!(Tag(0xdeadbeef).to_string(), "0xdeadbeef");
    }

    #[test]
    fn test_tags_are_globally_unique() {
        let tags = all_tags();
        let unique: HashSet<Tag> = tags.iter().map(|(_, tag)| *tag).collect();
        assert_eq!(unique.len(), tags.len());
    }

    #[test]
    fn test_lookup_resolves_every_registered_tag() {
        for variant in IndexTag::ALL {
            assert_eq!(IndexTag::from_tag(variant.tag()), Some(*variant));
        }
        for variant in TransformTag::ALL {
            assert_eq!(TransformTag::from_tag(variant.tag()), Some(*variant));
        }
        for variant in InvlistsTag::ALL {
            assert_eq!(InvlistsTag::from_tag(variant.tag()), Some(*variant));
        }
        for variant in BinaryTag::ALL {
            assert_eq!(BinaryTag::from_tag(variant.tag()), Some(*variant));
        }
        assert_eq!(
            PqTag::from_tag(PqTag::ProductQuantizer.tag()),
            Some(PqTag::ProductQuantizer)
        );
    }

    #[test]
    fn test_lookup_rejects_foreign_tags() {
        assert_eq!(IndexTag::from_tag(Tag::from_fourcc(*b"ilar")), None);
        assert_eq!(InvlistsTag::from_tag(Tag::from_fourcc(*b"IxFl")), None);
        assert_eq!(BinaryTag::from_tag(MV_MARKER), None);
        assert_eq!(IndexTag::from_tag(Tag(0)), None);
    }
}

// Licensed under the Apache-2.0 license
#![no_std]

//! Wire formats for firmware images: the fixed header placed at the start of
//! every image slot and the TLV trailer that follows the payload.

#[cfg(test)]
extern crate std;

use core::cmp::Ordering;

use zerocopy::byteorder::{LittleEndian, U16, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub mod tlv;
pub use tlv::{TlvIter, TLV_KIND_ECDSA256, TLV_KIND_RSA2048, TLV_KIND_SHA256};

pub const IMAGE_MAGIC: u32 = 0x96f3_b83c;

/// Serialized size of [`ImageHeader`].
pub const IMAGE_HEADER_SIZE: usize = core::mem::size_of::<ImageHeader>();

/// Firmware image version number.
///
/// All fields zero is the "unset" sentinel; ordering is lexicographic over
/// (major, minor, revision, build).
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ImageVersion {
    pub major: u8,
    pub minor: u8,
    pub revision: U16<LittleEndian>,
    pub build: U32<LittleEndian>,
}

impl ImageVersion {
    pub const fn new(major: u8, minor: u8, revision: u16, build: u32) -> Self {
        ImageVersion {
            major,
            minor,
            revision: U16::new(revision),
            build: U32::new(build),
        }
    }

    pub const UNSET: ImageVersion = ImageVersion::new(0, 0, 0, 0);

    pub fn is_unset(&self) -> bool {
        *self == Self::UNSET
    }
}

impl PartialOrd for ImageVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ImageVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.major, self.minor, self.revision.get(), self.build.get()).cmp(&(
            other.major,
            other.minor,
            other.revision.get(),
            other.build.get(),
        ))
    }
}

impl core::fmt::Display for ImageVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.major,
            self.minor,
            self.revision.get(),
            self.build.get()
        )
    }
}

/// Fixed-format header at the start of an image slot.
///
/// Only `magic` determines whether a slot holds a bootable image; the
/// remaining fields locate the payload and the TLV trailer.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct ImageHeader {
    pub magic: U32<LittleEndian>,
    /// Total size of the TLV trailer following the payload, in bytes.
    pub tlv_size: U16<LittleEndian>,
    /// Identifies the public key the signature TLV was produced with.
    pub key_id: u8,
    pub _pad1: u8,
    /// Offset of the payload from the slot base.
    pub hdr_size: U16<LittleEndian>,
    pub _pad2: U16<LittleEndian>,
    /// Payload size in bytes, header excluded.
    pub img_size: U32<LittleEndian>,
    pub flags: U32<LittleEndian>,
    pub ver: ImageVersion,
    pub _pad3: U32<LittleEndian>,
}

impl ImageHeader {
    pub fn is_valid(&self) -> bool {
        self.magic.get() == IMAGE_MAGIC
    }

    /// Total bytes occupied in the slot by header plus payload. `None` when
    /// the size fields overflow, which no real image produces.
    pub fn image_end(&self) -> Option<u32> {
        (self.hdr_size.get() as u32).checked_add(self.img_size.get())
    }

    /// Offset of the TLV trailer from the slot base.
    pub fn tlv_offset(&self) -> Option<u32> {
        self.image_end()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use zerocopy::IntoBytes;

    #[test]
    fn header_is_32_bytes() {
        assert_eq!(IMAGE_HEADER_SIZE, 32);
    }

    #[test]
    fn magic_gates_validity() {
        let mut hdr = ImageHeader::read_from_bytes(&[0u8; IMAGE_HEADER_SIZE]).unwrap();
        assert!(!hdr.is_valid());
        hdr.magic = IMAGE_MAGIC.into();
        assert!(hdr.is_valid());
    }

    #[test]
    fn header_roundtrip() {
        let hdr = ImageHeader {
            magic: IMAGE_MAGIC.into(),
            tlv_size: 44.into(),
            key_id: 2,
            _pad1: 0,
            hdr_size: (IMAGE_HEADER_SIZE as u16).into(),
            _pad2: 0.into(),
            img_size: 0x4000.into(),
            flags: 0.into(),
            ver: ImageVersion::new(1, 2, 3, 4),
            _pad3: 0.into(),
        };
        let parsed = ImageHeader::read_from_bytes(hdr.as_bytes()).unwrap();
        assert_eq!(parsed, hdr);
        assert_eq!(parsed.image_end(), Some(32 + 0x4000));
    }

    #[test]
    fn overflowing_size_fields_have_no_image_end() {
        let mut hdr = ImageHeader::read_from_bytes(&[0u8; IMAGE_HEADER_SIZE]).unwrap();
        hdr.magic = IMAGE_MAGIC.into();
        hdr.hdr_size = (IMAGE_HEADER_SIZE as u16).into();
        hdr.img_size = u32::MAX.into();
        assert!(hdr.is_valid());
        assert_eq!(hdr.image_end(), None);
        assert_eq!(hdr.tlv_offset(), None);
    }

    #[test]
    fn version_ordering_is_lexicographic() {
        let base = ImageVersion::new(1, 2, 3, 4);
        assert!(ImageVersion::new(2, 0, 0, 0) > base);
        assert!(ImageVersion::new(1, 3, 0, 0) > base);
        assert!(ImageVersion::new(1, 2, 4, 0) > base);
        assert!(ImageVersion::new(1, 2, 3, 5) > base);
        assert!(ImageVersion::new(1, 2, 3, 4) == base);
        assert!(ImageVersion::new(0, 255, 65535, u32::MAX) < base);
    }

    #[test]
    fn unset_sentinel() {
        assert!(ImageVersion::UNSET.is_unset());
        assert!(!ImageVersion::new(0, 0, 0, 1).is_unset());
    }
}

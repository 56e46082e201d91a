// Licensed under the Apache-2.0 license

//! TLV trailer records appended after the image payload.
//!
//! Each record is a fixed 4-byte descriptor followed by `len` value bytes.
//! The trailer carries the payload hash and the signature consumed by the
//! external verifier; unknown kinds are skipped.

use zerocopy::byteorder::{LittleEndian, U16};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const TLV_KIND_SHA256: u8 = 0x01;
pub const TLV_KIND_RSA2048: u8 = 0x02;
pub const TLV_KIND_ECDSA256: u8 = 0x03;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct TlvDescriptor {
    pub kind: u8,
    pub _pad: u8,
    pub len: U16<LittleEndian>,
}

pub const TLV_DESCRIPTOR_SIZE: usize = core::mem::size_of::<TlvDescriptor>();

/// Walks the records of a TLV trailer slice.
///
/// A descriptor whose value runs past the end of the slice terminates the
/// walk; the caller treats a missing required record the same as a
/// structurally bad trailer.
pub struct TlvIter<'a> {
    buf: &'a [u8],
}

impl<'a> TlvIter<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        TlvIter { buf }
    }

    /// Returns the value of the first record of the given kind, if present.
    pub fn find(buf: &'a [u8], kind: u8) -> Option<&'a [u8]> {
        TlvIter::new(buf).find_map(|(k, v)| (k == kind).then_some(v))
    }
}

impl<'a> Iterator for TlvIter<'a> {
    type Item = (u8, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        let (desc, rest) = TlvDescriptor::read_from_prefix(self.buf).ok()?;
        let len = desc.len.get() as usize;
        if len > rest.len() {
            self.buf = &[];
            return None;
        }
        let (value, rest) = rest.split_at(len);
        self.buf = rest;
        Some((desc.kind, value))
    }
}

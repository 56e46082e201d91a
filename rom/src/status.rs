// Licensed under the Apache-2.0 license

//! The status journal: a durable, append-only record of swap progress.
//!
//! The journal is the crash-recovery core of the subsystem. A sector
//! exchange is three staged copies, and one entry is appended per completed
//! copy, strictly after the copy's flash content is final. On any boot the
//! entry count is therefore a proven prefix of durable progress, down to the
//! individual copy: a reset inside copy `k` leaves the journal at `k`, and
//! re-running copy `k` from its (still unmodified) source is harmless.
//! Absence of the `boot/status` entry is the canonical "no swap in progress"
//! signal; a present but malformed record is `BadStatus` and never silently
//! treated as absent.

use arrayvec::ArrayVec;
use boot_config::{MAX_STATUS_ENTRIES, SWAP_COPIES};
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::error::BootError;

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct StatusHeader {
    img1_length: U32<LittleEndian>,
    img2_length: U32<LittleEndian>,
}

const STATUS_HEADER_SIZE: usize = core::mem::size_of::<StatusHeader>();

/// Image (1-based) whose content each copy of a sector exchange leaves in
/// its destination: the first stages image 1 in scratch, the second lands
/// image 2 in the boot slot, the third lands image 1 in the test slot.
const COPY_IMAGE_NUMS: [u8; SWAP_COPIES] = [1, 2, 1];

/// Records one completed staged copy. `part_num` is the sector index within
/// the slots; `image_num` is the (1-based) image whose content the copy left
/// in its destination region.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct SwapEntry {
    pub image_num: u8,
    pub part_num: u8,
}

pub const SWAP_ENTRY_SIZE: usize = core::mem::size_of::<SwapEntry>();

/// Maximum serialized journal size; sized by the static flash layout bound.
pub const STATUS_WIRE_MAX: usize = STATUS_HEADER_SIZE + SWAP_ENTRY_SIZE * MAX_STATUS_ENTRIES;

/// In-memory form of the `boot/status` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootStatus {
    pub img1_length: u32,
    pub img2_length: u32,
    entries: ArrayVec<SwapEntry, MAX_STATUS_ENTRIES>,
}

impl BootStatus {
    /// A fresh journal for a swap of images with the given total lengths,
    /// recorded before the first sector is touched.
    pub fn new(img1_length: u32, img2_length: u32) -> Self {
        BootStatus {
            img1_length,
            img2_length,
            entries: ArrayVec::new(),
        }
    }

    /// Number of staged copies that are durably complete.
    pub fn completed_copies(&self) -> usize {
        self.entries.len()
    }

    /// Number of sectors whose full three-copy exchange is durably complete.
    pub fn completed_sectors(&self) -> usize {
        self.entries.len() / SWAP_COPIES
    }

    pub fn entries(&self) -> &[SwapEntry] {
        &self.entries
    }

    /// Records the next staged copy in sequence in memory. Exceeding the
    /// layout-derived capacity is a programming error, reported as
    /// `OutOfMemory` and never truncated.
    pub fn record_copy(&mut self) -> Result<(), BootError> {
        let idx = self.entries.len();
        self.record(SwapEntry {
            image_num: COPY_IMAGE_NUMS[idx % SWAP_COPIES],
            part_num: (idx / SWAP_COPIES) as u8,
        })
    }

    pub fn record(&mut self, entry: SwapEntry) -> Result<(), BootError> {
        self.entries
            .try_push(entry)
            .map_err(|_| BootError::OutOfMemory)
    }

    /// Decodes a stored journal. Any structural defect, including entries
    /// out of the fixed copy sequence, is `BadStatus`.
    pub fn decode(bytes: &[u8]) -> Result<Self, BootError> {
        let (header, mut rest) =
            StatusHeader::read_from_prefix(bytes).map_err(|_| BootError::BadStatus)?;
        if rest.len() % SWAP_ENTRY_SIZE != 0 || rest.len() / SWAP_ENTRY_SIZE > MAX_STATUS_ENTRIES {
            return Err(BootError::BadStatus);
        }

        let mut entries: ArrayVec<SwapEntry, MAX_STATUS_ENTRIES> = ArrayVec::new();
        while !rest.is_empty() {
            let (entry, tail) =
                SwapEntry::read_from_prefix(rest).map_err(|_| BootError::BadStatus)?;
            let idx = entries.len();
            if entry.part_num as usize != idx / SWAP_COPIES
                || entry.image_num != COPY_IMAGE_NUMS[idx % SWAP_COPIES]
            {
                return Err(BootError::BadStatus);
            }
            entries.push(entry);
            rest = tail;
        }

        Ok(BootStatus {
            img1_length: header.img1_length.get(),
            img2_length: header.img2_length.get(),
            entries,
        })
    }

    pub fn encode(&self) -> Result<ArrayVec<u8, STATUS_WIRE_MAX>, BootError> {
        let header = StatusHeader {
            img1_length: self.img1_length.into(),
            img2_length: self.img2_length.into(),
        };
        let mut out = ArrayVec::new();
        out.try_extend_from_slice(header.as_bytes())
            .map_err(|_| BootError::OutOfMemory)?;
        for entry in &self.entries {
            out.try_extend_from_slice(entry.as_bytes())
                .map_err(|_| BootError::OutOfMemory)?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn journal_with(copies: usize) -> BootStatus {
        let mut status = BootStatus::new(0x8000, 0x6000);
        for _ in 0..copies {
            status.record_copy().unwrap();
        }
        status
    }

    #[test]
    fn encode_decode_roundtrip() {
        let status = journal_with(4);
        let wire = status.encode().unwrap();
        assert_eq!(wire.len(), STATUS_HEADER_SIZE + 4 * SWAP_ENTRY_SIZE);
        assert_eq!(BootStatus::decode(&wire).unwrap(), status);
    }

    #[test]
    fn copies_follow_the_fixed_sequence() {
        let status = journal_with(4);
        let entries = status.entries();
        assert_eq!(entries[0], SwapEntry { image_num: 1, part_num: 0 });
        assert_eq!(entries[1], SwapEntry { image_num: 2, part_num: 0 });
        assert_eq!(entries[2], SwapEntry { image_num: 1, part_num: 0 });
        assert_eq!(entries[3], SwapEntry { image_num: 1, part_num: 1 });
        assert_eq!(status.completed_copies(), 4);
        assert_eq!(status.completed_sectors(), 1);
    }

    #[test]
    fn truncated_header_is_bad_status() {
        assert_eq!(
            BootStatus::decode(&[0u8; 5]).unwrap_err(),
            BootError::BadStatus
        );
    }

    #[test]
    fn odd_entry_bytes_are_bad_status() {
        let mut wire = journal_with(1).encode().unwrap();
        wire.push(0);
        assert_eq!(
            BootStatus::decode(&wire).unwrap_err(),
            BootError::BadStatus
        );
    }

    #[test]
    fn out_of_order_entries_are_bad_status() {
        let mut status = BootStatus::new(0x1000, 0x1000);
        status
            .record(SwapEntry {
                image_num: 1,
                part_num: 1,
            })
            .unwrap();
        assert_eq!(
            BootStatus::decode(&status.encode().unwrap()).unwrap_err(),
            BootError::BadStatus
        );
    }

    #[test]
    fn wrong_image_num_sequence_is_bad_status() {
        let mut status = BootStatus::new(0x1000, 0x1000);
        // The first copy of a sector must stage image 1 in scratch.
        status
            .record(SwapEntry {
                image_num: 2,
                part_num: 0,
            })
            .unwrap();
        assert_eq!(
            BootStatus::decode(&status.encode().unwrap()).unwrap_err(),
            BootError::BadStatus
        );
    }

    #[test]
    fn capacity_overflow_is_out_of_memory() {
        let mut status = journal_with(MAX_STATUS_ENTRIES);
        assert_eq!(status.record_copy().unwrap_err(), BootError::OutOfMemory);
    }
}

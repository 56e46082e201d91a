// Licensed under the Apache-2.0 license

//! The swap orchestrator: validates a requested upgrade, exchanges the two
//! image slots sector by sector through the scratch region, and resumes an
//! interrupted exchange from the journal on the next boot.
//!
//! Runs single-threaded before the scheduler starts. The hazard is not
//! interleaving but power loss between any two flash operations; every
//! multi-step sequence here is restartable from whatever the journal proves
//! was completed, with the last unjournaled copy safe to re-run because its
//! source region is never modified before a later copy.

use boot_config::{
    BootLayout, KvStore, SlotLocation, MAX_SECTOR_SIZE, NUM_IMAGE_SLOTS, SWAP_COPIES,
};
use boot_image::{ImageHeader, ImageVersion, TlvIter, IMAGE_HEADER_SIZE};
use boot_image::{TLV_KIND_ECDSA256, TLV_KIND_RSA2048, TLV_KIND_SHA256};
use log::{debug, error, info, warn};
use zerocopy::FromBytes;

use crate::error::BootError;
use crate::flash::flash_partition::FlashPartition;
use crate::flash::hil::FlashMap;
use crate::status::BootStatus;
use crate::vect::BootVect;
use crate::verify::SignatureVerifier;

/// Staging buffer for the image TLV trailer.
pub const BOOT_TMPBUF_SZ: usize = 256;

const SLOT_NAMES: [&str; NUM_IMAGE_SLOTS] = ["image0", "image1"];

/// Index of the slot whose content the device boots.
pub const BOOT_SLOT: usize = 0;
/// Index of the slot holding a pending test candidate.
pub const TEST_SLOT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapState {
    Idle,
    SwapRequested,
    SwapInProgress(u32),
    SwapComplete,
    SwapAborted,
}

/// Outcome of the boot decision: the slot to hand control to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootSelection {
    pub slot: usize,
    pub location: SlotLocation,
}

/// Owns the boot vector cache and journal handle for one boot cycle and
/// drives the swap state machine. No state lives outside this value.
pub struct SwapManager<'a> {
    layout: &'a BootLayout,
    flash: &'a FlashMap<'a>,
    store: &'a mut dyn KvStore,
    verifier: &'a dyn SignatureVerifier,
    vect: BootVect,
    state: SwapState,
}

impl<'a> SwapManager<'a> {
    /// Binds the persistent store and loads the boot entries. Rejects a
    /// layout whose journal would not fit the static capacity.
    pub fn new(
        layout: &'a BootLayout,
        flash: &'a FlashMap<'a>,
        store: &'a mut dyn KvStore,
        verifier: &'a dyn SignatureVerifier,
    ) -> Result<Self, BootError> {
        if !layout.is_valid() {
            return Err(BootError::OutOfMemory);
        }
        let vect = BootVect::load(store)?;
        Ok(SwapManager {
            layout,
            flash,
            store,
            verifier,
            vect,
            state: SwapState::Idle,
        })
    }

    pub fn state(&self) -> SwapState {
        self.state
    }

    pub fn vect(&self) -> &BootVect {
        &self.vect
    }

    /// Requests an upgrade: marks `ver` as the pending test image.
    pub fn request_test(&mut self, ver: ImageVersion) -> Result<(), BootError> {
        self.vect.set_test(self.store, Some(ver))
    }

    /// True when a journaled swap is mid-flight or a pending test image
    /// differs from the running main image.
    pub fn swap_pending(&self) -> Result<bool, BootError> {
        if self.vect.status()?.is_some() {
            return Ok(true);
        }
        match self.vect.test_or_unset() {
            Some(test) => Ok(Some(test) != self.vect.main_or_unset()),
            None => Ok(false),
        }
    }

    /// Classifies both slots. A flash failure or magic mismatch makes a slot
    /// read as empty; it never blocks booting the other slot.
    pub fn read_headers(&self) -> Result<[Option<ImageHeader>; NUM_IMAGE_SLOTS], BootError> {
        let mut headers = [None; NUM_IMAGE_SLOTS];
        for (idx, out) in headers.iter_mut().enumerate() {
            let part = self.slot_partition(idx)?;
            *out = read_header(&part);
        }
        Ok(headers)
    }

    /// Runs the boot decision to completion: no-op, fresh swap, or resume.
    /// Returns the slot to boot. On any fatal error the machine lands in
    /// `SwapAborted` and the half-finished state is left exactly as the
    /// journal describes it.
    pub fn boot_go(&mut self) -> Result<BootSelection, BootError> {
        match self.boot_go_inner() {
            Ok(selection) => Ok(selection),
            Err(err) => {
                error!("boot decision failed: {}", err);
                self.state = SwapState::SwapAborted;
                Err(err)
            }
        }
    }

    fn boot_go_inner(&mut self) -> Result<BootSelection, BootError> {
        let headers = self.read_headers()?;
        let status = self.vect.status()?.cloned();
        match status {
            Some(status) => self.resume(status, &headers),
            None => self.try_start(&headers),
        }
    }

    /// Fresh-boot path: decide whether a new swap should begin.
    fn try_start(
        &mut self,
        headers: &[Option<ImageHeader>; NUM_IMAGE_SLOTS],
    ) -> Result<BootSelection, BootError> {
        let main_ver = self.vect.main_or_unset();
        let test_ver = match self.vect.test_or_unset() {
            Some(ver) => ver,
            None => {
                debug!("no test image pending");
                self.state = SwapState::Idle;
                return Ok(self.selection(BOOT_SLOT));
            }
        };

        if Some(test_ver) == main_ver {
            debug!("test image {} already promoted", test_ver);
            self.state = SwapState::Idle;
            return Ok(self.selection(BOOT_SLOT));
        }

        let test_hdr = match headers[TEST_SLOT] {
            Some(hdr) if hdr.ver == test_ver => hdr,
            Some(hdr) => {
                warn!(
                    "test slot holds {} but vector names {}, ignoring",
                    hdr.ver, test_ver
                );
                self.state = SwapState::Idle;
                return Ok(self.selection(BOOT_SLOT));
            }
            None => {
                warn!("test vector set but test slot is empty, ignoring");
                self.state = SwapState::Idle;
                return Ok(self.selection(BOOT_SLOT));
            }
        };

        // Nothing destructive may happen before the candidate verifies; a
        // failure leaves vectors, journal and flash untouched.
        if !self.verify_image(&test_hdr)? {
            warn!("test image {} failed verification", test_ver);
            self.state = SwapState::SwapAborted;
            return Ok(self.selection(BOOT_SLOT));
        }

        let len0 = image_length(&headers[BOOT_SLOT])?;
        let len1 = image_length(&headers[TEST_SLOT])?;
        if len0 > self.layout.slot_size() || len1 > self.layout.slot_size() {
            return Err(BootError::BadImage);
        }

        info!(
            "starting swap: main {:?} ({} bytes) <-> test {} ({} bytes)",
            main_ver, len0, test_ver, len1
        );
        self.state = SwapState::SwapRequested;
        let status = BootStatus::new(len0, len1);
        self.vect.write_status(self.store, status.clone())?;
        self.run_swap(status)
    }

    /// Resume path: a journal exists, so a swap was interrupted. The
    /// recorded image lengths must agree with lengths recomputed from the
    /// freshly read headers. Once sector 0 finished its exchange the headers
    /// sit in swapped slots and must reproduce the recorded pair exactly;
    /// while sector 0 is still mid-exchange a header can be legitimately
    /// unreadable, but a readable one must name a recorded length. Any other
    /// disagreement means the journal cannot be trusted and recovery halts.
    fn resume(
        &mut self,
        status: BootStatus,
        headers: &[Option<ImageHeader>; NUM_IMAGE_SLOTS],
    ) -> Result<BootSelection, BootError> {
        let len0 = image_length(&headers[BOOT_SLOT])?;
        let len1 = image_length(&headers[TEST_SLOT])?;
        let recorded = (status.img1_length, status.img2_length);
        let mismatch = if status.completed_copies() >= SWAP_COPIES {
            (len0, len1) != (recorded.1, recorded.0)
        } else {
            [len0, len1]
                .iter()
                .any(|&len| len != 0 && len != recorded.0 && len != recorded.1)
        };
        if mismatch {
            error!(
                "journal records image lengths {:?} but flash holds ({}, {})",
                recorded, len0, len1
            );
            return Err(BootError::BadStatus);
        }
        if status.completed_copies() > self.num_sectors(&status) * SWAP_COPIES {
            return Err(BootError::BadStatus);
        }

        info!(
            "resuming interrupted swap at copy {} of {}",
            status.completed_copies(),
            self.num_sectors(&status) * SWAP_COPIES
        );
        self.run_swap(status)
    }

    /// Runs every remaining staged copy, journaling each one after its two
    /// flash operations completed, then finalizes.
    fn run_swap(&mut self, mut status: BootStatus) -> Result<BootSelection, BootError> {
        let total_copies = self.num_sectors(&status) * SWAP_COPIES;
        for copy in status.completed_copies()..total_copies {
            let sector = copy / SWAP_COPIES;
            self.state = SwapState::SwapInProgress(sector as u32);
            self.copy_step(sector, copy % SWAP_COPIES)?;
            // The entry is persisted only now, after the copy's content is
            // durable; the journal must never run ahead of flash.
            status.record_copy()?;
            self.vect.write_status(self.store, status.clone())?;
        }

        self.state = SwapState::SwapComplete;
        self.finalize()
    }

    /// One staged copy of a sector exchange: boot -> scratch, test -> boot,
    /// then scratch -> test, each erasing its target before programming it.
    /// A copy's source is not modified until a later copy, so re-running an
    /// interrupted or unjournaled copy has the same effect as running it
    /// once, and both images are never simultaneously absent from flash.
    fn copy_step(&self, sector: usize, step: usize) -> Result<(), BootError> {
        let sector_size = self.layout.sector_size as usize;
        let offset = sector * sector_size;
        let boot = self.slot_partition(BOOT_SLOT)?;
        let test = self.slot_partition(TEST_SLOT)?;
        let scratch = self.scratch_partition()?;
        let mut buf = [0u8; MAX_SECTOR_SIZE];
        let buf = &mut buf[..sector_size];

        match step {
            0 => copy_sector(&boot, offset, &scratch, 0, buf),
            1 => copy_sector(&test, offset, &boot, offset, buf),
            _ => copy_sector(&scratch, 0, &test, offset, buf),
        }
    }

    /// Promotion: the boot slot now holds the new image; its header names
    /// the version the main vector records. Vectors are updated before the
    /// journal is cleared, so a reset in between resumes into a completed
    /// journal and re-runs only this idempotent tail.
    fn finalize(&mut self) -> Result<BootSelection, BootError> {
        let boot = self.slot_partition(BOOT_SLOT)?;
        let hdr = read_header(&boot).ok_or(BootError::BadImage)?;
        self.vect.set_main(self.store, Some(hdr.ver))?;
        self.vect.set_test(self.store, None)?;
        self.vect.clear_status(self.store)?;
        self.state = SwapState::Idle;
        info!("swap complete, main image is now {}", hdr.ver);
        Ok(self.selection(BOOT_SLOT))
    }

    /// Extracts the hash and signature TLVs from the candidate's trailer and
    /// consults the external verifier. A trailer that cannot name both is a
    /// verification failure, not an error.
    fn verify_image(&self, hdr: &ImageHeader) -> Result<bool, BootError> {
        let tlv_size = hdr.tlv_size.get() as usize;
        if tlv_size == 0 || tlv_size > BOOT_TMPBUF_SZ {
            return Ok(false);
        }
        let part = self.slot_partition(TEST_SLOT)?;
        let offset = match hdr.tlv_offset() {
            Some(offset) => offset as usize,
            None => return Ok(false),
        };
        if offset.saturating_add(tlv_size) > part.len() {
            return Ok(false);
        }
        let mut buf = [0u8; BOOT_TMPBUF_SZ];
        let tlvs = &mut buf[..tlv_size];
        part.read(offset, tlvs)?;

        let hash = match TlvIter::find(tlvs, TLV_KIND_SHA256) {
            Some(hash) => hash,
            None => return Ok(false),
        };
        let sig = TlvIter::find(tlvs, TLV_KIND_RSA2048)
            .or_else(|| TlvIter::find(tlvs, TLV_KIND_ECDSA256));
        let sig = match sig {
            Some(sig) => sig,
            None => return Ok(false),
        };
        Ok(self.verifier.verify(hash, sig, hdr.key_id))
    }

    fn num_sectors(&self, status: &BootStatus) -> usize {
        let longest = status.img1_length.max(status.img2_length);
        (longest as usize).div_ceil(self.layout.sector_size as usize)
    }

    fn selection(&self, slot: usize) -> BootSelection {
        BootSelection {
            slot,
            location: self.layout.slots[slot],
        }
    }

    fn slot_partition(&self, idx: usize) -> Result<FlashPartition<'a>, BootError> {
        let loc = self.layout.slots[idx];
        let driver = self.flash.get(loc.flash_id)?;
        Ok(FlashPartition::new(
            driver,
            SLOT_NAMES[idx],
            loc.base_address as usize,
            self.layout.slot_size() as usize,
        )?)
    }

    fn scratch_partition(&self) -> Result<FlashPartition<'a>, BootError> {
        let loc = self.layout.scratch;
        let driver = self.flash.get(loc.flash_id)?;
        Ok(FlashPartition::new(
            driver,
            "scratch",
            loc.base_address as usize,
            self.layout.sector_size as usize,
        )?)
    }
}

/// One sanity-checked header read; I/O failure and magic mismatch both
/// collapse to "slot unusable as a bootable image".
fn read_header(part: &FlashPartition<'_>) -> Option<ImageHeader> {
    let mut buf = [0u8; IMAGE_HEADER_SIZE];
    part.read(0, &mut buf).ok()?;
    let hdr = ImageHeader::read_from_bytes(&buf).ok()?;
    hdr.is_valid().then_some(hdr)
}

/// Bytes a slot's image occupies: header, payload and TLV trailer. An empty
/// slot occupies nothing; a header whose size fields overflow is corrupt.
fn image_length(hdr: &Option<ImageHeader>) -> Result<u32, BootError> {
    match hdr {
        Some(hdr) => hdr
            .image_end()
            .and_then(|end| end.checked_add(hdr.tlv_size.get() as u32))
            .ok_or(BootError::BadImage),
        None => Ok(0),
    }
}

fn copy_sector(
    from: &FlashPartition<'_>,
    from_offset: usize,
    to: &FlashPartition<'_>,
    to_offset: usize,
    buf: &mut [u8],
) -> Result<(), BootError> {
    from.read(from_offset, buf)?;
    to.erase(to_offset, buf.len())?;
    to.write(to_offset, buf)?;
    Ok(())
}

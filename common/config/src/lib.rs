// Licensed under the Apache-2.0 license

#![no_std]

//! Persistent store contract and static flash layout for the boot subsystem.

/// Error kinds surfaced by a [`KvStore`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KvError {
    /// The backing storage failed.
    Io,
    /// Stored bytes could not be produced or decoded.
    Serialization,
}

/// Durable named byte-string storage.
///
/// Implementations must make each `save` call individually durable: once it
/// returns `Ok`, the entry survives an arbitrary reset.
pub trait KvStore {
    /// Reads the named entry into `buf` and returns the stored length.
    /// `None` means the entry was never written (or was deleted), which is
    /// distinct from any error.
    fn load(&self, name: &str, buf: &mut [u8]) -> Result<Option<usize>, KvError>;

    /// Durably writes the named entry; `None` deletes it.
    fn save(&mut self, name: &str, value: Option<&[u8]>) -> Result<(), KvError>;

    /// Replays every stored entry into `handler`.
    ///
    /// The store drives the handler, not the other way around: subsystems
    /// receive their entries by name at initialization time instead of
    /// registering callbacks with the store.
    fn load_all(&self, handler: &mut dyn ConfigHandler) -> Result<(), KvError>;
}

/// Receiver side of [`KvStore::load_all`].
pub trait ConfigHandler {
    /// Applies one named entry. Entries with names the handler does not
    /// recognize must be ignored, not rejected.
    fn apply(&mut self, name: &str, value: &[u8]) -> Result<(), KvError>;
}

/// Number of firmware image slots. The swap manager exchanges the contents
/// of exactly two.
pub const NUM_IMAGE_SLOTS: usize = 2;

/// Upper bound on sectors per slot accepted from a [`BootLayout`]; sizes the
/// static journal capacity.
pub const MAX_SLOT_SECTORS: usize = 128;

/// Upper bound on the sector size accepted from a [`BootLayout`]; sizes the
/// RAM staging buffer used while moving sectors.
pub const MAX_SECTOR_SIZE: usize = 4096;

/// Staged copies per sector exchange: boot slot to scratch, test slot to
/// boot slot, scratch to test slot. Each copy is journaled individually so
/// a reset can resume mid-sector.
pub const SWAP_COPIES: usize = 3;

/// Static journal capacity: one entry per staged copy per sector.
pub const MAX_STATUS_ENTRIES: usize = SWAP_COPIES * MAX_SLOT_SECTORS;

/// Physical location of an image slot or the scratch region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotLocation {
    pub flash_id: u8,
    pub base_address: u32,
}

/// Describes the flash layout the swap manager operates on.
///
/// These are defaults that can be overridden and provided to the ROM build;
/// the layout is fixed for the life of the device and is never persisted.
#[derive(Debug, Clone, Copy)]
pub struct BootLayout {
    pub slots: [SlotLocation; NUM_IMAGE_SLOTS],
    pub scratch: SlotLocation,
    /// Minimum erasable unit of the underlying storage, in bytes.
    pub sector_size: u32,
    /// Sectors per image slot; the scratch region holds exactly one.
    pub slot_sectors: u32,
}

impl Default for BootLayout {
    fn default() -> Self {
        BootLayout {
            slots: [
                SlotLocation {
                    flash_id: 0,
                    base_address: 0x0002_0000,
                },
                SlotLocation {
                    flash_id: 0,
                    base_address: 0x0006_0000,
                },
            ],
            scratch: SlotLocation {
                flash_id: 0,
                base_address: 0x000a_0000,
            },
            sector_size: 4 * 1024,
            slot_sectors: 64,
        }
    }
}

impl BootLayout {
    pub fn slot_size(&self) -> u32 {
        self.sector_size * self.slot_sectors
    }

    /// A layout is usable only if its journal fits the static capacity and
    /// its sectors are non-degenerate.
    pub fn is_valid(&self) -> bool {
        self.sector_size > 0
            && self.sector_size as usize <= MAX_SECTOR_SIZE
            && self.slot_sectors > 0
            && self.slot_sectors as usize <= MAX_SLOT_SECTORS
    }
}

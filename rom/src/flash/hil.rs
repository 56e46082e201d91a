// Licensed under the Apache-2.0 license

//! Generic interface for flash storage access.

use crate::error::BootError;

/// Simple interface for reading, writing and erasing data on a sector-based
/// flash device. Drivers for the physical storage implement this trait; all
/// operations are synchronous and block until the device has finished.
pub trait FlashStorage {
    /// Read from the flash storage, filling the provided buffer with data.
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashError>;

    /// Write the full contents of the buffer, starting at the specified
    /// address. The addressed range must have been erased.
    fn write(&self, buffer: &[u8], address: usize) -> Result<(), FlashError>;

    /// Erase `length` bytes starting at `address`. Both must be aligned to
    /// the sector size.
    fn erase(&self, address: usize, length: usize) -> Result<(), FlashError>;

    /// Minimum erasable unit of this device, in bytes.
    fn sector_size(&self) -> usize;

    /// Total size of the device in bytes.
    fn capacity(&self) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// The device reported a failure.
    Io,
    /// The request fell outside the addressable range or was misaligned.
    Size,
    /// No device is registered under the requested region id.
    NoDevice,
}

impl From<FlashError> for BootError {
    fn from(_: FlashError) -> Self {
        BootError::FlashIo
    }
}

/// Resolves a flash region id to its registered driver.
///
/// Slot descriptors address flash as `(flash_id, offset)`; the map is the
/// single place that binding is made.
pub struct FlashMap<'a> {
    regions: &'a [(u8, &'a dyn FlashStorage)],
}

impl<'a> FlashMap<'a> {
    pub fn new(regions: &'a [(u8, &'a dyn FlashStorage)]) -> Self {
        FlashMap { regions }
    }

    pub fn get(&self, flash_id: u8) -> Result<&'a dyn FlashStorage, FlashError> {
        self.regions
            .iter()
            .find(|(id, _)| *id == flash_id)
            .map(|(_, driver)| *driver)
            .ok_or(FlashError::NoDevice)
    }
}

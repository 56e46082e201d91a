// Licensed under the Apache-2.0 license

use crate::flash::hil::{FlashError, FlashStorage};

/// A bounds-checked window into a contiguous region of the underlying flash.
///
/// The two image slots and the scratch region are each a partition; every
/// operation is checked against the partition length so no caller can reach
/// outside its own region.
pub struct FlashPartition<'a> {
    driver: &'a dyn FlashStorage,
    name: &'static str,
    base_offset: usize,
    length: usize,
}

impl<'a> FlashPartition<'a> {
    /// Creates a partition window, rejecting one that does not fit the
    /// device.
    pub fn new(
        driver: &'a dyn FlashStorage,
        name: &'static str,
        base_offset: usize,
        length: usize,
    ) -> Result<Self, FlashError> {
        if base_offset.checked_add(length).is_none() || base_offset + length > driver.capacity() {
            return Err(FlashError::Size);
        }
        Ok(FlashPartition {
            driver,
            name,
            base_offset,
            length,
        })
    }

    pub fn read(&self, partition_offset: usize, buf: &mut [u8]) -> Result<(), FlashError> {
        if partition_offset + buf.len() > self.length {
            return Err(FlashError::Size);
        }
        self.driver.read(buf, self.base_offset + partition_offset)
    }

    pub fn write(&self, partition_offset: usize, buf: &[u8]) -> Result<(), FlashError> {
        if partition_offset + buf.len() > self.length {
            return Err(FlashError::Size);
        }
        self.driver.write(buf, self.base_offset + partition_offset)
    }

    pub fn erase(&self, partition_offset: usize, len: usize) -> Result<(), FlashError> {
        if partition_offset + len > self.length {
            return Err(FlashError::Size);
        }
        self.driver.erase(self.base_offset + partition_offset, len)
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

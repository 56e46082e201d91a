// Licensed under the Apache-2.0 license

//! In-memory test doubles for the boot subsystem: a sector-granular fake
//! flash device and a fake key-value store, both with a programmable
//! power-cut switch that makes a chosen operation fail the way an
//! asynchronous reset would.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use boot_config::{ConfigHandler, KvError, KvStore};
use mcu_boot_rom::{FlashError, FlashStorage};

/// Fake NOR-style flash: erase sets a sector to `0xff`, programming may only
/// touch erased bytes, reads are unrestricted.
pub struct RamFlash {
    sector_size: usize,
    data: RefCell<Vec<u8>>,
    mutations: Cell<usize>,
    fail_after: Cell<Option<usize>>,
}

impl RamFlash {
    pub fn new(sector_size: usize, num_sectors: usize) -> Self {
        RamFlash {
            sector_size,
            data: RefCell::new(vec![0xff; sector_size * num_sectors]),
            mutations: Cell::new(0),
            fail_after: Cell::new(None),
        }
    }

    /// Allows `ops` more successful write/erase operations; every mutating
    /// operation after that fails, as if power was lost at that boundary.
    pub fn fail_after(&self, ops: usize) {
        self.fail_after.set(Some(self.mutations.get() + ops));
    }

    /// Power restored.
    pub fn clear_failure(&self) {
        self.fail_after.set(None);
    }

    /// Number of completed write and erase operations.
    pub fn mutation_count(&self) -> usize {
        self.mutations.get()
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.borrow().clone()
    }

    /// Test-setup backdoor: place bytes directly, bypassing erase rules and
    /// the power-cut switch.
    pub fn program(&self, address: usize, bytes: &[u8]) {
        self.data.borrow_mut()[address..address + bytes.len()].copy_from_slice(bytes);
    }

    fn check_power(&self) -> Result<(), FlashError> {
        match self.fail_after.get() {
            Some(limit) if self.mutations.get() >= limit => Err(FlashError::Io),
            _ => Ok(()),
        }
    }
}

impl FlashStorage for RamFlash {
    fn read(&self, buffer: &mut [u8], address: usize) -> Result<(), FlashError> {
        let data = self.data.borrow();
        if address + buffer.len() > data.len() {
            return Err(FlashError::Size);
        }
        buffer.copy_from_slice(&data[address..address + buffer.len()]);
        Ok(())
    }

    fn write(&self, buffer: &[u8], address: usize) -> Result<(), FlashError> {
        self.check_power()?;
        let mut data = self.data.borrow_mut();
        if address + buffer.len() > data.len() {
            return Err(FlashError::Size);
        }
        // Programming can only clear bits; the target must be erased.
        if data[address..address + buffer.len()]
            .iter()
            .any(|&b| b != 0xff)
        {
            return Err(FlashError::Io);
        }
        data[address..address + buffer.len()].copy_from_slice(buffer);
        self.mutations.set(self.mutations.get() + 1);
        Ok(())
    }

    fn erase(&self, address: usize, length: usize) -> Result<(), FlashError> {
        self.check_power()?;
        let mut data = self.data.borrow_mut();
        if address % self.sector_size != 0 || length % self.sector_size != 0 {
            return Err(FlashError::Size);
        }
        if address + length > data.len() {
            return Err(FlashError::Size);
        }
        data[address..address + length].fill(0xff);
        self.mutations.set(self.mutations.get() + 1);
        Ok(())
    }

    fn sector_size(&self) -> usize {
        self.sector_size
    }

    fn capacity(&self) -> usize {
        self.data.borrow().len()
    }
}

/// Fake durable key-value store backed by a map, with the same power-cut
/// switch on its save path.
#[derive(Default)]
pub struct RamKvStore {
    entries: BTreeMap<String, Vec<u8>>,
    saves: usize,
    fail_after: Option<usize>,
}

impl RamKvStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows `ops` more successful saves, then every save fails.
    pub fn fail_after_saves(&mut self, ops: usize) {
        self.fail_after = Some(self.saves + ops);
    }

    pub fn clear_failure(&mut self) {
        self.fail_after = None;
    }

    pub fn save_count(&self) -> usize {
        self.saves
    }

    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.entries.get(name).map(Vec::as_slice)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Test-setup backdoor, not counted as a save.
    pub fn insert(&mut self, name: &str, value: &[u8]) {
        self.entries.insert(name.to_string(), value.to_vec());
    }
}

impl KvStore for RamKvStore {
    fn load(&self, name: &str, buf: &mut [u8]) -> Result<Option<usize>, KvError> {
        match self.entries.get(name) {
            None => Ok(None),
            Some(value) => {
                if value.len() > buf.len() {
                    return Err(KvError::Serialization);
                }
                buf[..value.len()].copy_from_slice(value);
                Ok(Some(value.len()))
            }
        }
    }

    fn save(&mut self, name: &str, value: Option<&[u8]>) -> Result<(), KvError> {
        if let Some(limit) = self.fail_after {
            if self.saves >= limit {
                return Err(KvError::Io);
            }
        }
        match value {
            Some(value) => {
                self.entries.insert(name.to_string(), value.to_vec());
            }
            None => {
                self.entries.remove(name);
            }
        }
        self.saves += 1;
        Ok(())
    }

    fn load_all(&self, handler: &mut dyn ConfigHandler) -> Result<(), KvError> {
        for (name, value) in &self.entries {
            handler.apply(name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn erase_then_write_then_read() {
        let flash = RamFlash::new(256, 4);
        flash.erase(256, 256).unwrap();
        flash.write(&[0x5a; 8], 256).unwrap();
        let mut back = [0u8; 8];
        flash.read(&mut back, 256).unwrap();
        assert_eq!(back, [0x5a; 8]);
        assert_eq!(flash.mutation_count(), 2);
    }

    #[test]
    fn write_without_erase_fails() {
        let flash = RamFlash::new(256, 4);
        flash.write(&[1, 2, 3], 0).unwrap();
        assert_eq!(flash.write(&[4, 5, 6], 0).unwrap_err(), FlashError::Io);
    }

    #[test]
    fn unaligned_erase_rejected() {
        let flash = RamFlash::new(256, 4);
        assert_eq!(flash.erase(10, 256).unwrap_err(), FlashError::Size);
        assert_eq!(flash.erase(0, 100).unwrap_err(), FlashError::Size);
    }

    #[test]
    fn power_cut_trips_mutations_only() {
        let flash = RamFlash::new(256, 4);
        flash.fail_after(1);
        flash.erase(0, 256).unwrap();
        assert_eq!(flash.erase(256, 256).unwrap_err(), FlashError::Io);
        let mut buf = [0u8; 4];
        flash.read(&mut buf, 0).unwrap();
        flash.clear_failure();
        flash.erase(256, 256).unwrap();
    }

    #[test]
    fn kv_store_save_load_delete() {
        let mut store = RamKvStore::new();
        store.save("boot/main", Some(&[1, 2, 3])).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(store.load("boot/main", &mut buf).unwrap(), Some(3));
        assert_eq!(&buf[..3], &[1, 2, 3]);
        store.save("boot/main", None).unwrap();
        assert_eq!(store.load("boot/main", &mut buf).unwrap(), None);
    }

    #[test]
    fn kv_store_power_cut() {
        let mut store = RamKvStore::new();
        store.fail_after_saves(1);
        store.save("a", Some(&[1])).unwrap();
        assert_eq!(store.save("b", Some(&[2])).unwrap_err(), KvError::Io);
        assert!(store.contains("a"));
        assert!(!store.contains("b"));
    }
}

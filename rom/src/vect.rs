// Licensed under the Apache-2.0 license

//! The boot vector store and the in-memory copy of the persisted boot
//! entries.
//!
//! The store is the single source of truth across resets; the cache here
//! lives for one boot cycle, is filled once by the store replay at
//! initialization, and afterwards is mutated only by write operations that
//! persist before updating it.

use boot_config::{ConfigHandler, KvError, KvStore};
use boot_image::ImageVersion;
use log::warn;
use zerocopy::{FromBytes, IntoBytes};

use crate::error::BootError;
use crate::status::BootStatus;

pub const BOOT_KEY_MAIN: &str = "boot/main";
pub const BOOT_KEY_TEST: &str = "boot/test";
pub const BOOT_KEY_STATUS: &str = "boot/status";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VectEntry {
    Unset,
    Set(ImageVersion),
    Bad,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum StatusEntry {
    Absent,
    Present(BootStatus),
    Bad,
}

/// Boot-cycle view of the `boot/main`, `boot/test` and `boot/status`
/// entries.
pub struct BootVect {
    main: VectEntry,
    test: VectEntry,
    status: StatusEntry,
}

impl ConfigHandler for BootVect {
    fn apply(&mut self, name: &str, value: &[u8]) -> Result<(), KvError> {
        match name {
            BOOT_KEY_MAIN => self.main = parse_version(value),
            BOOT_KEY_TEST => self.test = parse_version(value),
            BOOT_KEY_STATUS => {
                self.status = match BootStatus::decode(value) {
                    Ok(status) => StatusEntry::Present(status),
                    Err(_) => StatusEntry::Bad,
                }
            }
            // Entries belonging to other subsystems.
            _ => {}
        }
        Ok(())
    }
}

/// An all-zero stored version is the unset sentinel, equivalent to a deleted
/// entry. Any other length than the fixed wire size is malformed.
fn parse_version(bytes: &[u8]) -> VectEntry {
    match ImageVersion::read_from_bytes(bytes) {
        Ok(ver) if ver.is_unset() => VectEntry::Unset,
        Ok(ver) => VectEntry::Set(ver),
        Err(_) => VectEntry::Bad,
    }
}

impl BootVect {
    /// Binds the persistent store to this subsystem: the store replays its
    /// entries into the fresh cache.
    pub fn load(store: &dyn KvStore) -> Result<Self, BootError> {
        let mut vect = BootVect {
            main: VectEntry::Unset,
            test: VectEntry::Unset,
            status: StatusEntry::Absent,
        };
        store.load_all(&mut vect)?;
        Ok(vect)
    }

    pub fn main(&self) -> Result<Option<ImageVersion>, BootError> {
        match self.main {
            VectEntry::Unset => Ok(None),
            VectEntry::Set(ver) => Ok(Some(ver)),
            VectEntry::Bad => Err(BootError::BadVector),
        }
    }

    pub fn test(&self) -> Result<Option<ImageVersion>, BootError> {
        match self.test {
            VectEntry::Unset => Ok(None),
            VectEntry::Set(ver) => Ok(Some(ver)),
            VectEntry::Bad => Err(BootError::BadVector),
        }
    }

    /// A malformed main vector must not block booting; it reads as unset.
    pub fn main_or_unset(&self) -> Option<ImageVersion> {
        self.main().unwrap_or_else(|_| {
            warn!("malformed {} entry, treating as unset", BOOT_KEY_MAIN);
            None
        })
    }

    pub fn test_or_unset(&self) -> Option<ImageVersion> {
        self.test().unwrap_or_else(|_| {
            warn!("malformed {} entry, treating as unset", BOOT_KEY_TEST);
            None
        })
    }

    pub fn set_main(
        &mut self,
        store: &mut dyn KvStore,
        ver: Option<ImageVersion>,
    ) -> Result<(), BootError> {
        write_version(store, BOOT_KEY_MAIN, ver)?;
        self.main = ver.map_or(VectEntry::Unset, VectEntry::Set);
        Ok(())
    }

    pub fn set_test(
        &mut self,
        store: &mut dyn KvStore,
        ver: Option<ImageVersion>,
    ) -> Result<(), BootError> {
        write_version(store, BOOT_KEY_TEST, ver)?;
        self.test = ver.map_or(VectEntry::Unset, VectEntry::Set);
        Ok(())
    }

    /// The loaded journal, `None` when no swap is in progress. A malformed
    /// record is `BadStatus`, never collapsed into absence.
    pub fn status(&self) -> Result<Option<&BootStatus>, BootError> {
        match &self.status {
            StatusEntry::Absent => Ok(None),
            StatusEntry::Present(status) => Ok(Some(status)),
            StatusEntry::Bad => Err(BootError::BadStatus),
        }
    }

    /// Durably replaces the journal record. Called only after the flash
    /// content the record describes is itself durable.
    pub fn write_status(
        &mut self,
        store: &mut dyn KvStore,
        status: BootStatus,
    ) -> Result<(), BootError> {
        let wire = status.encode()?;
        store.save(BOOT_KEY_STATUS, Some(&wire))?;
        self.status = StatusEntry::Present(status);
        Ok(())
    }

    /// Deletes the journal: the swap fully completed, or is being abandoned
    /// before any sector was touched.
    pub fn clear_status(&mut self, store: &mut dyn KvStore) -> Result<(), BootError> {
        store.save(BOOT_KEY_STATUS, None)?;
        self.status = StatusEntry::Absent;
        Ok(())
    }
}

fn write_version(
    store: &mut dyn KvStore,
    name: &str,
    ver: Option<ImageVersion>,
) -> Result<(), BootError> {
    match ver {
        Some(ver) => store.save(name, Some(ver.as_bytes()))?,
        None => store.save(name, None)?,
    }
    Ok(())
}

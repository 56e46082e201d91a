// Licensed under the Apache-2.0 license

//! Crash-safe image swap manager for the MCU bootloader.
//!
//! Decides which of two firmware slots to boot and, when an upgrade is
//! pending, exchanges their contents sector by sector through a scratch
//! region, journaling progress so that power loss at any point is
//! recoverable on the next boot.

#![no_std]

#[cfg(test)]
extern crate std;

pub mod error;
pub use error::BootError;
pub mod flash;
pub use flash::flash_partition::FlashPartition;
pub use flash::hil::{FlashError, FlashMap, FlashStorage};
pub mod status;
pub use status::{BootStatus, SwapEntry};
pub mod vect;
pub use vect::{BootVect, BOOT_KEY_MAIN, BOOT_KEY_STATUS, BOOT_KEY_TEST};
pub mod verify;
pub use verify::SignatureVerifier;
pub mod swap;
pub use swap::{BootSelection, SwapManager, SwapState, BOOT_SLOT, TEST_SLOT};

// Licensed under the Apache-2.0 license

use boot_config::KvError;

/// Error taxonomy of the boot subsystem.
///
/// The swap manager alone decides which of these are fatal for the boot
/// decision; see the per-variant notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootError {
    /// A flash read, write or erase failed. Fatal: flash state is no longer
    /// trustworthy.
    FlashIo,
    /// Persisting the status journal or boot vector failed. Fatal: without
    /// durable progress records, destructive flash operations are unsafe.
    Serialization,
    /// An image header failed validation. Non-fatal during slot
    /// classification (the slot counts as empty); fatal on the resume path.
    BadImage,
    /// A stored boot vector entry is malformed. Non-fatal: treated as unset.
    BadVector,
    /// The status journal is present but malformed, or disagrees with the
    /// flash it describes. Fatal: a swap may genuinely be mid-flight.
    BadStatus,
    /// A bounded buffer or the journal capacity was exceeded. Fatal.
    OutOfMemory,
}

impl From<KvError> for BootError {
    fn from(err: KvError) -> Self {
        match err {
            KvError::Io => BootError::FlashIo,
            KvError::Serialization => BootError::Serialization,
        }
    }
}

impl core::fmt::Display for BootError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            BootError::FlashIo => "flash I/O failure",
            BootError::Serialization => "persistent store serialization failure",
            BootError::BadImage => "invalid image header",
            BootError::BadVector => "malformed boot vector entry",
            BootError::BadStatus => "malformed status journal",
            BootError::OutOfMemory => "buffer capacity exceeded",
        };
        f.write_str(s)
    }
}

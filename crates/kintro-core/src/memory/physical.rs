//! Raw physical memory sources
//!
//! In firmware the raw copy is a plain pointer copy; offline it is a read
//! from a captured image where byte offset equals physical address.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Mutex;

use tracing::debug;

use crate::error::{Error, Result};

/// Raw physical memory copy, with no validity checking of its own
pub trait PhysicalMemory {
    /// Copy `buf.len()` bytes starting at physical `address` into `buf`
    fn read_raw(&self, address: u64, buf: &mut [u8]) -> Result<()>;

    /// Size of the addressable range, if known
    fn size_hint(&self) -> Option<u64> {
        None
    }
}

impl<T: PhysicalMemory + ?Sized> PhysicalMemory for &T {
    fn read_raw(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        (**self).read_raw(address, buf)
    }

    fn size_hint(&self) -> Option<u64> {
        (**self).size_hint()
    }
}

fn check_bounds(address: u64, len: usize, size: u64) -> Result<()> {
    let end = address.checked_add(len as u64);
    match end {
        Some(end) if end <= size => Ok(()),
        _ => Err(Error::MemoryReadFailed {
            address,
            message: format!("{} bytes past end of image (size {:#x})", len, size),
        }),
    }
}

/// File-backed physical memory image (raw dump)
pub struct DumpFile {
    file: Mutex<File>,
    size: u64,
}

impl DumpFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let size = file.metadata()?.len();
        debug!("Opened image {:?} ({} bytes)", path.as_ref(), size);
        Ok(Self {
            file: Mutex::new(file),
            size,
        })
    }

    pub fn size(&self) -> u64 {
        self.size
    }
}

impl PhysicalMemory for DumpFile {
    fn read_raw(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        check_bounds(address, buf.len(), self.size)?;

        let mut file = self.file.lock().map_err(|_| Error::MemoryReadFailed {
            address,
            message: "image lock poisoned".to_string(),
        })?;
        file.seek(SeekFrom::Start(address))?;
        file.read_exact(buf).map_err(|e| Error::MemoryReadFailed {
            address,
            message: e.to_string(),
        })
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.size)
    }
}

/// In-memory physical image starting at `base`
#[derive(Debug, Clone, Default)]
pub struct RawImage {
    base: u64,
    bytes: Vec<u8>,
}

impl RawImage {
    pub fn new(base: u64, bytes: Vec<u8>) -> Self {
        Self { base, bytes }
    }
}

impl PhysicalMemory for RawImage {
    fn read_raw(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        let offset = address.checked_sub(self.base).ok_or(Error::MemoryReadFailed {
            address,
            message: "below image base".to_string(),
        })?;
        check_bounds(offset, buf.len(), self.bytes.len() as u64)?;

        let start = offset as usize;
        buf.copy_from_slice(&self.bytes[start..start + buf.len()]);
        Ok(())
    }

    fn size_hint(&self) -> Option<u64> {
        Some(self.base + self.bytes.len() as u64)
    }
}

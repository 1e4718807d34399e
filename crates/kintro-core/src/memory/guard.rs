//! Checked and unchecked physical memory copies
//!
//! A checked copy validates both the first and the last source byte against
//! the memory map before touching memory. An unchecked copy only rejects a
//! zero source or a zero length. Destinations are always caller-owned
//! buffers and are never checked.

use tracing::trace;

use crate::error::{Error, Result};
use crate::memory::map::MemoryMap;
use crate::memory::physical::PhysicalMemory;

/// Whether a physical access is validated against the memory map
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Checked,
    Unchecked,
}

pub struct MemoryAccessGuard<'a, P: ?Sized> {
    memory: &'a P,
    map: &'a MemoryMap,
}

impl<P: ?Sized> Clone for MemoryAccessGuard<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: ?Sized> Copy for MemoryAccessGuard<'_, P> {}

impl<'a, P: PhysicalMemory + ?Sized> MemoryAccessGuard<'a, P> {
    pub fn new(memory: &'a P, map: &'a MemoryMap) -> Self {
        Self { memory, map }
    }

    pub fn map(&self) -> &'a MemoryMap {
        self.map
    }

    pub fn memory(&self) -> &'a P {
        self.memory
    }

    pub fn is_valid(&self, address: u64) -> bool {
        self.map.is_valid(address)
    }

    pub fn copy(&self, dest: &mut [u8], src: u64, access: Access) -> Result<()> {
        match access {
            Access::Checked => self.copy_checked(dest, src),
            Access::Unchecked => self.copy_unchecked(dest, src),
        }
    }

    /// Copy after validating the first and last source byte
    pub fn copy_checked(&self, dest: &mut [u8], src: u64) -> Result<()> {
        Self::check_args(dest, src)?;

        let last = src.saturating_add(dest.len() as u64 - 1);
        for address in [src, last] {
            if !self.map.is_valid(address) {
                trace!("Checked copy rejected: 0x{:X} not mapped", address);
                return Err(Error::AddressNotMapped { address });
            }
        }

        self.memory.read_raw(src, dest)
    }

    /// Copy without consulting the memory map
    pub fn copy_unchecked(&self, dest: &mut [u8], src: u64) -> Result<()> {
        Self::check_args(dest, src)?;
        self.memory.read_raw(src, dest)
    }

    fn check_args(dest: &[u8], src: u64) -> Result<()> {
        if src == 0 {
            return Err(Error::ZeroAddress);
        }
        if dest.is_empty() {
            return Err(Error::ZeroLength);
        }
        Ok(())
    }

    pub fn read_bytes(&self, src: u64, len: usize, access: Access) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.copy(&mut buf, src, access)?;
        Ok(buf)
    }

    fn read_array<const N: usize>(&self, src: u64, access: Access) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.copy(&mut buf, src, access)?;
        Ok(buf)
    }

    pub fn read_u16(&self, src: u64, access: Access) -> Result<u16> {
        self.read_array(src, access).map(u16::from_le_bytes)
    }

    pub fn read_u32(&self, src: u64, access: Access) -> Result<u32> {
        self.read_array(src, access).map(u32::from_le_bytes)
    }

    pub fn read_u64(&self, src: u64, access: Access) -> Result<u64> {
        self.read_array(src, access).map(u64::from_le_bytes)
    }

    pub fn read_u64_checked(&self, src: u64) -> Result<u64> {
        self.read_u64(src, Access::Checked)
    }

    pub fn read_u64_unchecked(&self, src: u64) -> Result<u64> {
        self.read_u64(src, Access::Unchecked)
    }
}

//! x86-64 4-level virtual to physical address translation
//!
//! The walk reads PML4E, PDPTE, PDE and PTE in turn. A clear present bit at
//! any level fails the translation. A PDPTE or PDE with the page-size bit set
//! terminates the walk early (1 GiB or 2 MiB page).

mod cache;

use tracing::trace;

pub use cache::{TranslationCache, TranslationCacheEntry};

use crate::error::{Error, Result};
use crate::layout::paging::{
    ENTRY_SIZE, HUGE_PAGE_MASK, INDEX_MASK, LARGE_PAGE_MASK, PAGE_OFFSET_MASK, PAGE_SIZE,
    PAGE_SIZE_FLAG, PD_SHIFT, PDPT_SHIFT, PHYS_ADDRESS_LIMIT, PHYS_MASK, PML4_SHIFT, PRESENT,
    PT_SHIFT, ROOT_FLAGS_MASK,
};
use crate::memory::{Access, MemoryAccessGuard, PhysicalMemory};

/// Outcome of a successful page walk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Translation {
    pub physical_address: u64,
    /// Physical address of the descriptor that terminated the walk
    pub entry_address: u64,
    pub page_size: u64,
}

pub struct AddressTranslator<'a, P: ?Sized> {
    guard: MemoryAccessGuard<'a, P>,
}

impl<P: ?Sized> Clone for AddressTranslator<'_, P> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<P: ?Sized> Copy for AddressTranslator<'_, P> {}

impl<'a, P: PhysicalMemory + ?Sized> AddressTranslator<'a, P> {
    pub fn new(guard: MemoryAccessGuard<'a, P>) -> Self {
        Self { guard }
    }

    pub fn guard(&self) -> MemoryAccessGuard<'a, P> {
        self.guard
    }

    /// Read a present table entry; `None` when unreadable or not present
    fn read_entry(&self, table: u64, va: u64, shift: u64, access: Access) -> Option<(u64, u64)> {
        let address = table.checked_add(((va >> shift) & INDEX_MASK) * ENTRY_SIZE)?;
        let entry = self.guard.read_u64(address, access).ok()?;
        if entry & PRESENT == 0 {
            trace!("Entry at 0x{:X} not present (va 0x{:X})", address, va);
            return None;
        }
        Some((address, entry))
    }

    /// Full page walk
    pub fn walk(&self, va: u64, root: u64, access: Access) -> Option<Translation> {
        if va == 0 || root == 0 {
            return None;
        }

        let pml4 = root & !ROOT_FLAGS_MASK;
        if pml4 > PHYS_ADDRESS_LIMIT {
            trace!("Root 0x{:X} is outside physical address space", root);
            return None;
        }
        let (_, pml4e) = self.read_entry(pml4, va, PML4_SHIFT, access)?;

        let (pdpte_addr, pdpte) = self.read_entry(pml4e & PHYS_MASK, va, PDPT_SHIFT, access)?;
        if pdpte & PAGE_SIZE_FLAG != 0 {
            return Some(Translation {
                physical_address: (pdpte & PHYS_MASK & !HUGE_PAGE_MASK) + (va & HUGE_PAGE_MASK),
                entry_address: pdpte_addr,
                page_size: HUGE_PAGE_MASK + 1,
            });
        }

        let (pde_addr, pde) = self.read_entry(pdpte & PHYS_MASK, va, PD_SHIFT, access)?;
        if pde & PAGE_SIZE_FLAG != 0 {
            return Some(Translation {
                physical_address: (pde & PHYS_MASK & !LARGE_PAGE_MASK) + (va & LARGE_PAGE_MASK),
                entry_address: pde_addr,
                page_size: LARGE_PAGE_MASK + 1,
            });
        }

        let (pte_addr, pte) = self.read_entry(pde & PHYS_MASK, va, PT_SHIFT, access)?;
        let frame = pte & PHYS_MASK;
        if frame == 0 {
            return None;
        }

        Some(Translation {
            physical_address: frame + (va & PAGE_OFFSET_MASK),
            entry_address: pte_addr,
            page_size: PAGE_SIZE,
        })
    }

    /// Translate with every table read validated against the memory map
    pub fn translate(&self, va: u64, root: u64) -> Option<u64> {
        self.walk(va, root, Access::Checked)
            .map(|t| t.physical_address)
    }

    pub fn translate_unchecked(&self, va: u64, root: u64) -> Option<u64> {
        self.walk(va, root, Access::Unchecked)
            .map(|t| t.physical_address)
    }

    pub fn translate_with(&self, va: u64, root: u64, access: Access) -> Option<u64> {
        self.walk(va, root, access).map(|t| t.physical_address)
    }

    /// Physical address of the leaf descriptor for `va`
    pub fn entry_address(&self, va: u64, root: u64) -> Option<u64> {
        self.walk(va, root, Access::Checked).map(|t| t.entry_address)
    }

    /// Checked translation through `cache`; a hit performs no memory reads
    pub fn translate_with_cache(
        &self,
        cache: &mut TranslationCache,
        va: u64,
        root: u64,
    ) -> Option<u64> {
        let page_base = va & !PAGE_OFFSET_MASK;
        let offset = va & PAGE_OFFSET_MASK;

        if let Some(physical_page) = cache.lookup(page_base) {
            return Some(physical_page + offset);
        }

        let physical = self.translate(va, root)?;
        cache.insert(page_base, physical & !PAGE_OFFSET_MASK);
        Some(physical)
    }

    /// Copy virtual memory page by page, translating each page separately
    fn read_virtual_with<F>(
        &self,
        va: u64,
        root: u64,
        dest: &mut [u8],
        access: Access,
        mut resolve: F,
    ) -> Result<()>
    where
        F: FnMut(u64) -> Option<u64>,
    {
        if va == 0 {
            return Err(Error::ZeroAddress);
        }
        if dest.is_empty() {
            return Err(Error::ZeroLength);
        }

        let mut done = 0usize;
        while done < dest.len() {
            let address = va.wrapping_add(done as u64);
            let in_page = (PAGE_SIZE - (address & PAGE_OFFSET_MASK)) as usize;
            let chunk = in_page.min(dest.len() - done);

            let physical = resolve(address).ok_or(Error::TranslationFailed { address, root })?;
            self.guard
                .copy(&mut dest[done..done + chunk], physical, access)?;
            done += chunk;
        }
        Ok(())
    }

    /// Checked translation and checked copy
    pub fn read_virtual(&self, va: u64, root: u64, dest: &mut [u8]) -> Result<()> {
        self.read_virtual_with(va, root, dest, Access::Checked, |address| {
            self.translate(address, root)
        })
    }

    /// Unchecked translation and unchecked copy
    pub fn read_virtual_unchecked(&self, va: u64, root: u64, dest: &mut [u8]) -> Result<()> {
        self.read_virtual_with(va, root, dest, Access::Unchecked, |address| {
            self.translate_unchecked(address, root)
        })
    }

    /// Cached translation and checked copy
    pub fn read_virtual_cached(
        &self,
        cache: &mut TranslationCache,
        va: u64,
        root: u64,
        dest: &mut [u8],
    ) -> Result<()> {
        self.read_virtual_with(va, root, dest, Access::Checked, |address| {
            self.translate_with_cache(cache, address, root)
        })
    }

    pub fn read_virtual_u32(&self, va: u64, root: u64) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_virtual(va, root, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_virtual_i32(&self, va: u64, root: u64) -> Result<i32> {
        self.read_virtual_u32(va, root).map(|v| v as i32)
    }

    pub fn read_virtual_u64(&self, va: u64, root: u64) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_virtual(va, root, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }
}

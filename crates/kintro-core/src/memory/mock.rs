//! Mock physical memory and page-table builder for testing

use std::cell::Cell;
use std::collections::{BTreeMap, HashMap};

use crate::error::{Error, Result};
use crate::layout::paging::{
    ENTRY_SIZE, HUGE_PAGE_MASK, INDEX_MASK, LARGE_PAGE_MASK, PAGE_OFFSET_MASK, PAGE_SIZE,
    PAGE_SIZE_FLAG, PD_SHIFT, PDPT_SHIFT, PHYS_MASK, PML4_SHIFT, PRESENT, PT_SHIFT,
};
use crate::memory::map::{MemoryMap, MemoryRegion, RegionKind};
use crate::memory::physical::PhysicalMemory;

/// Sparse page store that counts raw reads
#[derive(Debug, Default)]
pub struct MockPhysicalMemory {
    pages: BTreeMap<u64, Vec<u8>>,
    reads: Cell<usize>,
}

impl MockPhysicalMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, address: u64, bytes: &[u8]) {
        for (i, byte) in bytes.iter().enumerate() {
            let addr = address + i as u64;
            let page = self
                .pages
                .entry(addr & !PAGE_OFFSET_MASK)
                .or_insert_with(|| vec![0u8; PAGE_SIZE as usize]);
            page[(addr & PAGE_OFFSET_MASK) as usize] = *byte;
        }
    }

    pub fn write_u16(&mut self, address: u64, value: u16) {
        self.write(address, &value.to_le_bytes());
    }

    pub fn write_u32(&mut self, address: u64, value: u32) {
        self.write(address, &value.to_le_bytes());
    }

    pub fn write_u64(&mut self, address: u64, value: u64) {
        self.write(address, &value.to_le_bytes());
    }

    /// Number of `read_raw` calls so far
    pub fn reads(&self) -> usize {
        self.reads.get()
    }

    /// One region per run of contiguous backed pages
    pub fn memory_map(&self) -> MemoryMap {
        MemoryMap::from_regions(
            self.pages
                .keys()
                .map(|&page| MemoryRegion::new(page, 1, RegionKind::Conventional))
                .collect(),
        )
    }
}

impl PhysicalMemory for MockPhysicalMemory {
    fn read_raw(&self, address: u64, buf: &mut [u8]) -> Result<()> {
        self.reads.set(self.reads.get() + 1);

        for (i, byte) in buf.iter_mut().enumerate() {
            let addr = address.wrapping_add(i as u64);
            let page = self
                .pages
                .get(&(addr & !PAGE_OFFSET_MASK))
                .ok_or(Error::MemoryReadFailed {
                    address: addr,
                    message: "page not backed".to_string(),
                })?;
            *byte = page[(addr & PAGE_OFFSET_MASK) as usize];
        }
        Ok(())
    }
}

/// Builds 4-level page tables inside a MockPhysicalMemory
pub struct MockMachine {
    pub memory: MockPhysicalMemory,
    next_frame: u64,
    mappings: HashMap<(u64, u64), u64>,
}

impl MockMachine {
    /// Frames for tables and data are allocated upward from `first_frame`
    pub fn new(first_frame: u64) -> Self {
        Self {
            memory: MockPhysicalMemory::new(),
            next_frame: first_frame,
            mappings: HashMap::new(),
        }
    }

    pub fn alloc_frame(&mut self) -> u64 {
        let frame = self.next_frame;
        self.next_frame += PAGE_SIZE;
        self.memory.write(frame, &[0u8; PAGE_SIZE as usize]);
        frame
    }

    /// Allocate an empty PML4
    pub fn new_root(&mut self) -> u64 {
        self.alloc_frame()
    }

    fn index(va: u64, shift: u64) -> u64 {
        (va >> shift) & INDEX_MASK
    }

    fn read_entry(&self, table: u64, index: u64) -> u64 {
        let mut buf = [0u8; 8];
        self.memory
            .read_raw(table + index * ENTRY_SIZE, &mut buf)
            .unwrap();
        u64::from_le_bytes(buf)
    }

    /// Return the table an entry points at, creating it when absent
    fn next_table(&mut self, table: u64, index: u64) -> u64 {
        let entry = self.read_entry(table, index);
        if entry & PRESENT != 0 {
            return entry & PHYS_MASK;
        }
        let next = self.alloc_frame();
        self.memory
            .write_u64(table + index * ENTRY_SIZE, next | PRESENT | 0x2);
        next
    }

    pub fn map_page(&mut self, root: u64, va: u64, phys: u64) {
        let pdpt = self.next_table(root, Self::index(va, PML4_SHIFT));
        let pd = self.next_table(pdpt, Self::index(va, PDPT_SHIFT));
        let pt = self.next_table(pd, Self::index(va, PD_SHIFT));
        self.memory.write_u64(
            pt + Self::index(va, PT_SHIFT) * ENTRY_SIZE,
            (phys & PHYS_MASK) | PRESENT | 0x2,
        );
        self.mappings
            .insert((root, va & !PAGE_OFFSET_MASK), phys & PHYS_MASK);
    }

    /// Map a 2 MiB page at the PD level
    pub fn map_large_page(&mut self, root: u64, va: u64, phys: u64) {
        let pdpt = self.next_table(root, Self::index(va, PML4_SHIFT));
        let pd = self.next_table(pdpt, Self::index(va, PDPT_SHIFT));
        self.memory.write_u64(
            pd + Self::index(va, PD_SHIFT) * ENTRY_SIZE,
            (phys & !LARGE_PAGE_MASK) | PAGE_SIZE_FLAG | PRESENT,
        );
    }

    /// Map a 1 GiB page at the PDPT level
    pub fn map_huge_page(&mut self, root: u64, va: u64, phys: u64) {
        let pdpt = self.next_table(root, Self::index(va, PML4_SHIFT));
        self.memory.write_u64(
            pdpt + Self::index(va, PDPT_SHIFT) * ENTRY_SIZE,
            (phys & !HUGE_PAGE_MASK) | PAGE_SIZE_FLAG | PRESENT,
        );
    }

    /// Physical frame behind a 4 KiB mapping made by this builder
    pub fn frame_of(&self, root: u64, va: u64) -> Option<u64> {
        self.mappings.get(&(root, va & !PAGE_OFFSET_MASK)).copied()
    }

    /// Write through the page tables of `root`, mapping fresh frames on demand
    pub fn write_virtual(&mut self, root: u64, va: u64, bytes: &[u8]) {
        let mut offset = 0usize;
        while offset < bytes.len() {
            let addr = va + offset as u64;
            let page = addr & !PAGE_OFFSET_MASK;
            let frame = match self.frame_of(root, page) {
                Some(frame) => frame,
                None => {
                    let frame = self.alloc_frame();
                    self.map_page(root, page, frame);
                    frame
                }
            };
            let in_page = (addr & PAGE_OFFSET_MASK) as usize;
            let chunk = (PAGE_SIZE as usize - in_page).min(bytes.len() - offset);
            self.memory
                .write(frame + in_page as u64, &bytes[offset..offset + chunk]);
            offset += chunk;
        }
    }

    pub fn write_virtual_u16(&mut self, root: u64, va: u64, value: u16) {
        self.write_virtual(root, va, &value.to_le_bytes());
    }

    pub fn write_virtual_u32(&mut self, root: u64, va: u64, value: u32) {
        self.write_virtual(root, va, &value.to_le_bytes());
    }

    pub fn write_virtual_u64(&mut self, root: u64, va: u64, value: u64) {
        self.write_virtual(root, va, &value.to_le_bytes());
    }

    pub fn memory_map(&self) -> MemoryMap {
        self.memory.memory_map()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_memory_counts_reads() {
        let mut memory = MockPhysicalMemory::new();
        memory.write_u32(0x2000, 0xCAFE_BABE);

        let mut buf = [0u8; 4];
        memory.read_raw(0x2000, &mut buf).unwrap();
        assert_eq!(u32::from_le_bytes(buf), 0xCAFE_BABE);
        assert!(memory.read_raw(0x5000, &mut buf).is_err());
        assert_eq!(memory.reads(), 2);
    }

    #[test]
    fn test_write_virtual_spans_pages() {
        let mut machine = MockMachine::new(0x10_0000);
        let root = machine.new_root();
        machine.write_virtual(root, 0x7FF0_0FFE, &[1, 2, 3, 4]);

        let first = machine.frame_of(root, 0x7FF0_0000).unwrap();
        let second = machine.frame_of(root, 0x7FF0_1000).unwrap();
        assert_ne!(first, second);

        let mut buf = [0u8; 2];
        machine.memory.read_raw(second, &mut buf).unwrap();
        assert_eq!(buf, [3, 4]);
    }
}

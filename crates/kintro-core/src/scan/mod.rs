//! Signature scanning in virtual and physical memory

mod pattern;

use tracing::debug;

pub use pattern::{Pattern, compare};

use crate::layout::paging::PAGE_SIZE;
use crate::memory::PhysicalMemory;
use crate::translate::AddressTranslator;

/// Default wildcard byte for physical scans
pub const PHYSICAL_WILDCARD: u8 = 0xAA;

/// Length of a `op reg, [rip+disp32]` instruction whose displacement starts at +3
const RIP_INSTRUCTION_LEN: u64 = 7;
const RIP_DISPLACEMENT_OFFSET: u64 = 3;

/// Post-processing applied to a virtual scan match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanOptions {
    /// Added to the result before the final base subtraction
    pub extra: i64,
    /// Follow the rip-relative displacement of the matched instruction
    pub rip_relative: bool,
    /// Subtract the scan base once more before adding `extra`
    pub subtract_base: bool,
}

pub struct SignatureScanner<'a, P: ?Sized> {
    translator: AddressTranslator<'a, P>,
}

impl<'a, P: PhysicalMemory + ?Sized> SignatureScanner<'a, P> {
    pub fn new(translator: AddressTranslator<'a, P>) -> Self {
        Self { translator }
    }

    /// Scan `size` bytes of virtual memory starting at `base`.
    ///
    /// Pages are read in overlapping two-page windows so matches that
    /// straddle a page boundary are found. Returns the post-processed
    /// result of the first match (see [`ScanOptions`]); the result is
    /// always relative to `base`.
    pub fn scan_virtual(
        &self,
        base: u64,
        size: u64,
        root: u64,
        pattern: &Pattern,
        options: ScanOptions,
    ) -> Option<u64> {
        if base == 0 || size == 0 || root == 0 || pattern.is_empty() {
            return None;
        }

        let guard = self.translator.guard();
        let page_len = PAGE_SIZE as usize;
        let page_count = size / PAGE_SIZE + 1;
        let mut window = vec![0u8; 2 * page_len];

        for i in 0..page_count {
            let page = base.wrapping_add(i * PAGE_SIZE);
            let (Some(first), Some(second)) = (
                self.translator.translate_unchecked(page, root),
                self.translator
                    .translate_unchecked(page.wrapping_add(PAGE_SIZE), root),
            ) else {
                continue;
            };

            if guard.copy_unchecked(&mut window[..page_len], first).is_err()
                || guard.copy_unchecked(&mut window[page_len..], second).is_err()
            {
                continue;
            }

            if let Some(offset) = pattern.find_in(&window) {
                let found = page.wrapping_add(offset as u64);
                debug!("Pattern {} matched at 0x{:X}", pattern, found);
                return self.resolve_match(found, base, root, options);
            }
        }

        debug!(
            "Pattern {} not found in 0x{:X}..0x{:X}",
            pattern,
            base,
            base.wrapping_add(size)
        );
        None
    }

    fn resolve_match(
        &self,
        found: u64,
        base: u64,
        root: u64,
        options: ScanOptions,
    ) -> Option<u64> {
        let mut address = found;

        if options.rip_relative {
            let disp = match self
                .translator
                .read_virtual_i32(found.wrapping_add(RIP_DISPLACEMENT_OFFSET), root)
            {
                Ok(disp) => disp,
                Err(e) => {
                    debug!("Failed to read displacement at 0x{:X}: {}", found, e);
                    return None;
                }
            };
            address = address
                .wrapping_add(RIP_INSTRUCTION_LEN)
                .wrapping_add_signed(disp as i64);
        }

        if options.subtract_base {
            address = address.wrapping_sub(base);
        }
        address = address.wrapping_add_signed(options.extra);
        // Applied even when subtract_base already removed the base once;
        // callers add the base back themselves.
        Some(address.wrapping_sub(base))
    }

    /// Scan physical memory for a byte pattern, `wildcard` matching any byte.
    ///
    /// Every position is re-read with a checked copy; unreadable positions
    /// are skipped.
    pub fn scan_physical(
        &self,
        base: u64,
        size: u64,
        pattern: &[u8],
        wildcard: u8,
    ) -> Option<u64> {
        let len = pattern.len();
        if base == 0 || len == 0 || size <= len as u64 {
            return None;
        }

        let guard = self.translator.guard();
        let pattern = Pattern::from_bytes_with_wildcard(pattern, wildcard);
        let mut buf = vec![0u8; len];

        for i in 0..size - len as u64 {
            let address = base.wrapping_add(i);
            if guard.copy_checked(&mut buf, address).is_err() {
                continue;
            }
            if pattern.matches(&buf) {
                debug!("Physical pattern {} matched at 0x{:X}", pattern, address);
                return Some(address);
            }
        }
        None
    }
}

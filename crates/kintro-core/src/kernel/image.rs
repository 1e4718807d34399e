//! Kernel image discovery near the kernel entry point

use memchr::memmem;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::layout::kernel_image::*;
use crate::layout::paging::PAGE_SIZE;
use crate::layout::pe::DOS_MAGIC;
use crate::memory::bytes::le_u16;
use crate::memory::{Access, PhysicalMemory};
use crate::translate::AddressTranslator;

/// Whether a header page carries both kernel-only section names
pub fn is_kernel_header(page: &[u8]) -> bool {
    le_u16(page, 0) == Some(DOS_MAGIC)
        && memmem::find(page, KDBG_MARKER).is_some()
        && memmem::find(page, POOLCODE_MARKER).is_some()
}

/// Search downward from `entry + ahead` to `entry - behind` for the kernel image.
///
/// Each pass only considers addresses aligned to the current mask, so the
/// common 1 MiB aligned load address is found before the finer passes run.
pub fn find_kernel_base<P: PhysicalMemory + ?Sized>(
    translator: AddressTranslator<'_, P>,
    entry: u64,
    root: u64,
    ahead: u64,
    behind: u64,
) -> Result<u64> {
    let guard = translator.guard();
    let start = (entry & !STRIDE_MASK).wrapping_add(ahead);
    let stop = entry.wrapping_sub(behind);
    let mut header = vec![0u8; PAGE_SIZE as usize];
    let mut mask = INITIAL_ALIGN_MASK;

    while mask >= MIN_ALIGN_MASK {
        debug!("Kernel image pass with alignment mask 0x{:X}", mask);
        let mut stride = start;

        while stride > stop {
            for offset in (0..STRIDE).step_by(PAGE_SIZE as usize) {
                let va = stride.wrapping_add(offset);
                if va & mask != 0 {
                    continue;
                }
                let Some(pa) = translator.translate(va, root) else {
                    continue;
                };
                if guard.read_u16(pa, Access::Checked).ok() != Some(DOS_MAGIC) {
                    continue;
                }
                if guard.copy_checked(&mut header, pa).is_err() {
                    continue;
                }
                if is_kernel_header(&header) {
                    info!("Kernel image at 0x{:X} (physical 0x{:X})", va, pa);
                    return Ok(va);
                }
            }

            let Some(next) = stride.checked_sub(STRIDE) else {
                break;
            };
            stride = next;
        }

        mask >>= 4;
    }

    Err(Error::bootstrap(
        "kernel base",
        format!("no kernel image within {:#x}..{:#x}", stop, start),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryAccessGuard, MockMachine};

    const ENTRY: u64 = 0xFFFF_F803_1240_5A10;

    fn header_page(with_markers: bool) -> Vec<u8> {
        let mut page = vec![0u8; 0x1000];
        page[0..2].copy_from_slice(b"MZ");
        if with_markers {
            page[0x3A8..0x3B0].copy_from_slice(b"POOLCODE");
            page[0x420..0x428].copy_from_slice(b"INITKDBG");
        }
        page
    }

    #[test]
    fn test_is_kernel_header() {
        assert!(is_kernel_header(&header_page(true)));
        assert!(!is_kernel_header(&header_page(false)));

        let mut page = header_page(true);
        page[0] = b'N';
        assert!(!is_kernel_header(&page));
    }

    #[test]
    fn test_find_kernel_base_skips_other_images() {
        let mut machine = MockMachine::new(0x10_0000);
        let root = machine.new_root();
        let kernel = 0xFFFF_F803_1200_0000;
        // a driver image above the kernel has MZ but no kernel sections
        machine.write_virtual(root, 0xFFFF_F803_1300_0000, &header_page(false));
        machine.write_virtual(root, kernel, &header_page(true));
        let map = machine.memory_map();
        let translator = AddressTranslator::new(MemoryAccessGuard::new(&machine.memory, &map));

        let base = find_kernel_base(translator, ENTRY, root, 0x100_0000, 0x100_0000).unwrap();
        assert_eq!(base, kernel);
    }

    #[test]
    fn test_find_kernel_base_finer_alignment() {
        let mut machine = MockMachine::new(0x10_0000);
        let root = machine.new_root();
        // 64 KiB aligned only, found on the second pass
        let kernel = 0xFFFF_F803_1241_0000;
        machine.write_virtual(root, kernel, &header_page(true));
        let map = machine.memory_map();
        let translator = AddressTranslator::new(MemoryAccessGuard::new(&machine.memory, &map));

        let base = find_kernel_base(translator, ENTRY, root, 0x40_0000, 0x40_0000).unwrap();
        assert_eq!(base, kernel);
    }

    #[test]
    fn test_find_kernel_base_outside_window_fails() {
        let mut machine = MockMachine::new(0x10_0000);
        let root = machine.new_root();
        machine.write_virtual(root, 0xFFFF_F803_0000_0000, &header_page(true));
        let map = machine.memory_map();
        let translator = AddressTranslator::new(MemoryAccessGuard::new(&machine.memory, &map));

        let err = find_kernel_base(translator, ENTRY, root, 0x20_0000, 0x20_0000).unwrap_err();
        assert!(matches!(err, Error::BootstrapFailed { stage: "kernel base", .. }));
    }
}

//! Locating the processor start block in low physical memory
//!
//! The start block left below 1 MiB by the boot processor carries the
//! kernel's page-table root and an address inside the kernel image.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::layout::low_stub::*;
use crate::layout::paging::PAGE_SIZE;
use crate::memory::bytes::le_u64;
use crate::memory::{MemoryAccessGuard, PhysicalMemory};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LowStub {
    pub page: u64,
    pub page_table_root: u64,
    pub kernel_entry: u64,
}

/// Check one candidate page's leading bytes against the start block layout
pub fn match_low_stub(page: u64, probe: &[u8]) -> Option<LowStub> {
    let jmp = le_u64(probe, JMP_OFFSET)?;
    let entry = le_u64(probe, KERNEL_ENTRY_OFFSET)?;
    let root = le_u64(probe, ROOT_OFFSET)?;

    if jmp & JMP_MASK != JMP_VALUE
        || entry & KERNEL_ENTRY_MASK != KERNEL_ENTRY_VALUE
        || root & ROOT_MASK != 0
    {
        return None;
    }

    Some(LowStub {
        page,
        page_table_root: root,
        kernel_entry: entry,
    })
}

/// Probe every page from 0x1000 up to `limit` (inclusive); page 0 is never probed
pub fn find_low_stub<P: PhysicalMemory + ?Sized>(
    guard: MemoryAccessGuard<'_, P>,
    limit: u64,
) -> Result<LowStub> {
    let mut probe = [0u8; PROBE_SIZE];

    for page in (FIRST_PAGE..=limit).step_by(PAGE_SIZE as usize) {
        if !guard.is_valid(page) {
            continue;
        }
        if guard.copy_checked(&mut probe, page).is_err() {
            continue;
        }
        if let Some(stub) = match_low_stub(page, &probe) {
            info!(
                "Start block at 0x{:X}: root 0x{:X}, kernel entry 0x{:X}",
                page, stub.page_table_root, stub.kernel_entry
            );
            return Ok(stub);
        }
    }

    debug!("No start block below 0x{:X}", limit);
    Err(Error::bootstrap(
        "low stub",
        format!("no start block found below {:#x}", limit),
    ))
}

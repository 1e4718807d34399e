//! PE header validation and export resolution through a page-table root

use tracing::{debug, trace};

use crate::error::{Error, Result};
use crate::layout::paging::{PAGE_OFFSET_MASK, PAGE_SIZE};
use crate::layout::pe::*;
use crate::memory::PhysicalMemory;
use crate::memory::bytes::{le_u16, le_u32, until_nul};
use crate::translate::AddressTranslator;

/// Export data directory of a validated image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportDirectory {
    pub rva: u32,
    pub size: u32,
}

/// Validate the DOS and NT headers and return the export data directory
pub fn parse_export_directory(header: &[u8], base: u64) -> Result<ExportDirectory> {
    let invalid = |message: &str| Error::InvalidImage {
        address: base,
        message: message.to_string(),
    };

    if le_u16(header, 0) != Some(DOS_MAGIC) {
        return Err(invalid("missing DOS signature"));
    }

    let lfanew = le_u32(header, LFANEW_OFFSET).ok_or_else(|| invalid("truncated DOS header"))?;
    let lfanew = lfanew as usize;
    if lfanew > MAX_LFANEW {
        return Err(invalid("e_lfanew out of range"));
    }
    if le_u32(header, lfanew) != Some(NT_SIGNATURE) {
        return Err(invalid("missing NT signature"));
    }

    let optional = lfanew + OPTIONAL_HEADER_OFFSET;
    let directory = match le_u16(header, optional) {
        Some(PE32_MAGIC) => optional + PE32_EXPORT_DIRECTORY,
        Some(PE32_PLUS_MAGIC) => optional + PE32_PLUS_EXPORT_DIRECTORY,
        _ => return Err(invalid("unknown optional header magic")),
    };

    let rva = le_u32(header, directory).ok_or_else(|| invalid("truncated data directory"))?;
    let size = le_u32(header, directory + 4).ok_or_else(|| invalid("truncated data directory"))?;
    Ok(ExportDirectory { rva, size })
}

/// Find `name` in an export directory copied into `directory` (which starts at `rva`).
///
/// Returns the function RVA. Name lookup is ASCII case-insensitive; the
/// first matching name wins. A zero function RVA counts as absent.
pub fn find_export_rva(directory: &[u8], rva: u32, size: u32, name: &str) -> Option<u32> {
    let number_of_functions = le_u32(directory, NUMBER_OF_FUNCTIONS)?;
    let number_of_names = le_u32(directory, NUMBER_OF_NAMES)?;
    let functions = le_u32(directory, ADDRESS_OF_FUNCTIONS)?;
    let names = le_u32(directory, ADDRESS_OF_NAMES)?;
    let ordinals = le_u32(directory, ADDRESS_OF_NAME_ORDINALS)?;

    if number_of_names == 0 || names == 0 {
        return None;
    }

    let start = rva as u64;
    let end = start + size as u64;
    let table_fits = |table: u32, entry_size: u64, count: u32| {
        let table = table as u64;
        table >= start && table + entry_size * count as u64 <= end
    };
    if !table_fits(names, 4, number_of_names)
        || !table_fits(ordinals, 2, number_of_names)
        || !table_fits(functions, 4, number_of_functions)
    {
        trace!("Export tables fall outside the export directory");
        return None;
    }

    let local = |table: u32| (table - rva) as usize;

    for i in 0..number_of_names as usize {
        let Some(name_rva) = le_u32(directory, local(names) + i * 4) else {
            continue;
        };
        if (name_rva as u64) < start || (name_rva as u64) >= end {
            continue;
        }
        let Some(ordinal) = le_u16(directory, local(ordinals) + i * 2) else {
            continue;
        };
        if ordinal as u32 >= number_of_functions {
            continue;
        }

        let Some(export_name) = directory.get(local(name_rva)..).map(until_nul) else {
            continue;
        };
        if export_name.eq_ignore_ascii_case(name.as_bytes()) {
            return le_u32(directory, local(functions) + ordinal as usize * 4)
                .filter(|&function| function != 0);
        }
    }
    None
}

/// Resolve an exported symbol of the image at `base` to a virtual address.
pub fn resolve_export<P: PhysicalMemory + ?Sized>(
    translator: AddressTranslator<'_, P>,
    base: u64,
    root: u64,
    name: &str,
) -> Option<u64> {
    let mut header = vec![0u8; HEADER_SIZE];
    if let Err(e) = translator.read_virtual(base, root, &mut header) {
        debug!("Failed to read image header at 0x{:X}: {}", base, e);
        return None;
    }

    let export = match parse_export_directory(&header, base) {
        Ok(export) => export,
        Err(e) => {
            debug!("{}", e);
            return None;
        }
    };
    if export.size < EXPORT_DIRECTORY_SIZE
        || export.size > MAX_EXPORT_DIRECTORY_SIZE
        || export.rva == 0
    {
        debug!(
            "Export directory at 0x{:X} rejected (rva 0x{:X}, size 0x{:X})",
            base, export.rva, export.size
        );
        return None;
    }

    // Page-rounded copy; unreadable pages stay zeroed
    let copy_size = ((export.size as u64 & !PAGE_OFFSET_MASK) + PAGE_SIZE) as usize;
    let mut directory = vec![0u8; copy_size];
    let directory_va = base.wrapping_add(export.rva as u64);
    for (i, chunk) in directory.chunks_mut(PAGE_SIZE as usize).enumerate() {
        let va = directory_va.wrapping_add(i as u64 * PAGE_SIZE);
        if translator.read_virtual(va, root, chunk).is_err() {
            trace!("Export directory page at 0x{:X} unreadable", va);
        }
    }

    let function = find_export_rva(&directory, export.rva, export.size, name);
    match function {
        Some(function) => {
            let address = base.wrapping_add(function as u64);
            debug!("  {}: 0x{:X}", name, address);
            Some(address)
        }
        None => {
            debug!("Export {} not found in image at 0x{:X}", name, base);
            None
        }
    }
}

/// [`resolve_export`] as a `Result`, for the bootstrap stages
pub fn require_export<P: PhysicalMemory + ?Sized>(
    translator: AddressTranslator<'_, P>,
    base: u64,
    root: u64,
    name: &str,
) -> Result<u64> {
    resolve_export(translator, base, root, name)
        .ok_or_else(|| Error::ExportNotFound(name.to_string()))
}

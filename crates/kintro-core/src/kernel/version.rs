//! Kernel version and build recovery
//!
//! The version routine fills a version-info structure with immediate
//! stores; the major and minor versions are read straight out of those
//! instructions. The build number comes from the exported build variable,
//! or from the routine's build store when the export is unusable.

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::kernel::pe::require_export;
use crate::layout::version::*;
use crate::memory::PhysicalMemory;
use crate::memory::bytes::le_u32;
use crate::translate::AddressTranslator;

/// Decode `major * 100 + minor` from the version routine's code bytes
pub fn decode_version(code: &[u8]) -> Option<u16> {
    let mut major: u16 = 0;
    let mut minor: u16 = 0;

    for b in 0..SCAN_LIMIT.min(code.len()) {
        let Some(value) = le_u32(code, b) else {
            break;
        };

        if major == 0 && minor == 0 && value == COMBINED_STORE {
            let high = *code.get(b + 4)? as u16;
            let low = (*code.get(b + 5)? & 0xF) as u16;
            return Some(high * 100 + low);
        }
        if major == 0 && value & STORE_MASK == MAJOR_STORE {
            major = *code.get(b + 3)? as u16;
        }
        if minor == 0 && value & STORE_MASK == MINOR_STORE {
            minor = *code.get(b + 3)? as u16;
        }
    }

    if minor >= 100 {
        minor = 0;
    }
    let version = major * 100 + minor;
    (version != 0).then_some(version)
}

/// Find the build store in the version routine's code bytes
pub fn decode_build_fallback(code: &[u8]) -> Option<u32> {
    (0..SCAN_LIMIT.min(code.len()))
        .filter_map(|b| Some((b, le_u32(code, b)?)))
        .find(|(_, value)| {
            let masked = value & BUILD_STORE_MASK;
            masked == BUILD_STORE || masked == BUILD_STORE_ALT
        })
        .and_then(|(b, _)| le_u32(code, b + 3))
        .filter(|build| *build != 0)
}

fn version_routine_code<P: PhysicalMemory + ?Sized>(
    translator: AddressTranslator<'_, P>,
    kernel_base: u64,
    root: u64,
) -> Result<Vec<u8>> {
    let routine = require_export(translator, kernel_base, root, VERSION_ROUTINE)?;
    let mut code = vec![0u8; CODE_SIZE];
    translator.read_virtual(routine, root, &mut code)?;
    Ok(code)
}

pub fn kernel_version<P: PhysicalMemory + ?Sized>(
    translator: AddressTranslator<'_, P>,
    kernel_base: u64,
    root: u64,
) -> Result<u16> {
    let code = version_routine_code(translator, kernel_base, root)
        .map_err(|e| Error::bootstrap("kernel version", e.to_string()))?;
    let version = decode_version(&code)
        .ok_or_else(|| Error::bootstrap("kernel version", "no version stores recognised"))?;

    info!("Kernel version: {}.{}", version / 100, version % 100);
    Ok(version)
}

pub fn kernel_build<P: PhysicalMemory + ?Sized>(
    translator: AddressTranslator<'_, P>,
    kernel_base: u64,
    root: u64,
) -> Result<u32> {
    let exported = require_export(translator, kernel_base, root, BUILD_NUMBER)
        .and_then(|address| translator.read_virtual_u32(address, root))
        .map(|value| value & BUILD_NUMBER_MASK);

    let build = match exported {
        Ok(build) if build != 0 => build,
        other => {
            debug!("Exported build number unusable ({:?}), scanning version routine", other);
            let code = version_routine_code(translator, kernel_base, root)
                .map_err(|e| Error::bootstrap("kernel build", e.to_string()))?;
            decode_build_fallback(&code)
                .ok_or_else(|| Error::bootstrap("kernel build", "no build store recognised"))?
        }
    };

    info!("Kernel build: {}", build);
    Ok(build)
}

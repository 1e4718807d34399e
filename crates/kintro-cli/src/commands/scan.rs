//! Scan command implementation.

use anyhow::{Result, bail};
use kintro_core::{EngineConfig, PHYSICAL_WILDCARD, Pattern, ScanOptions};
use owo_colors::OwoColorize;

use super::hex_utils::{format_hex_address, parse_hex_address};
use crate::session::{self, SessionArgs};

/// Where a pattern is searched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanTarget {
    Physical,
    Virtual {
        root: String,
        extra: i64,
        rip_relative: bool,
        subtract: bool,
    },
}

/// Byte form of a pattern for physical scans, wildcards as [`PHYSICAL_WILDCARD`]
fn physical_bytes(pattern: &Pattern) -> Vec<u8> {
    pattern
        .as_slice()
        .iter()
        .map(|b| b.unwrap_or(PHYSICAL_WILDCARD))
        .collect()
}

/// Run the scan command
pub fn run(
    args: &SessionArgs,
    config: EngineConfig,
    pattern: &str,
    base: &str,
    size: &str,
    target: ScanTarget,
) -> Result<()> {
    let pattern = Pattern::parse(pattern)?;
    let base = parse_hex_address(base)?;
    let size = parse_hex_address(size)?;
    let engine = session::open(args, config)?;
    let scanner = engine.scanner();

    match target {
        ScanTarget::Physical => {
            let bytes = physical_bytes(&pattern);
            let Some(address) = scanner.scan_physical(base, size, &bytes, PHYSICAL_WILDCARD)
            else {
                bail!("Pattern {} not found in physical memory", pattern);
            };
            println!("Match: {}", format_hex_address(address).green());
        }
        ScanTarget::Virtual {
            root,
            extra,
            rip_relative,
            subtract,
        } => {
            let root = parse_hex_address(&root)?;
            let options = ScanOptions {
                extra,
                rip_relative,
                subtract_base: subtract,
            };
            let Some(result) = scanner.scan_virtual(base, size, root, &pattern, options) else {
                bail!("Pattern {} not found", pattern);
            };
            println!("Result:   {}", format_hex_address(result));
            println!(
                "Absolute: {}",
                format_hex_address(result.wrapping_add(base)).green()
            );
        }
    }

    Ok(())
}

//! Hexdump command implementation.
//!
//! Displays raw physical memory, or virtual memory through a page-table
//! root, in traditional hexdump format.
//!
//! # Output Format
//!
//! ```text
//! 0x1000: 4D 5A 90 00 03 00 00 00  04 00 00 00 FF FF 00 00  |MZ..............|
//! ```

use anyhow::Result;
use kintro_core::{Access, EngineConfig};

use super::hex_utils::{hexdump_rows, parse_hex_address};
use crate::session::{self, SessionArgs};

/// Run the hexdump command
pub fn run(
    args: &SessionArgs,
    config: EngineConfig,
    address: &str,
    size: usize,
    root: Option<&str>,
    ascii: bool,
) -> Result<()> {
    let address = parse_hex_address(address)?;
    let engine = session::open(args, config)?;

    let bytes = match root {
        Some(root) => {
            let root = parse_hex_address(root)?;
            let mut bytes = vec![0u8; size];
            engine.translator().read_virtual(address, root, &mut bytes)?;
            println!(
                "Hexdump at virtual 0x{:X} (root 0x{:X}, {} bytes):",
                address, root, size
            );
            bytes
        }
        None => {
            let bytes = engine.guard().read_bytes(address, size, Access::Checked)?;
            println!("Hexdump at physical 0x{:X} ({} bytes):", address, size);
            bytes
        }
    };
    println!();

    for row in hexdump_rows(address, &bytes, ascii) {
        println!("{}", row);
    }

    Ok(())
}

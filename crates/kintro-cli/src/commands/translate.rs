//! Translate command implementation.

use anyhow::{Result, bail};
use kintro_core::{Access, EngineConfig};
use owo_colors::OwoColorize;

use super::hex_utils::{format_hex_address, parse_hex_address};
use crate::session::{self, SessionArgs};

/// Human-readable page size
fn page_size_name(size: u64) -> &'static str {
    match size {
        0x1000 => "4 KiB",
        0x20_0000 => "2 MiB",
        0x4000_0000 => "1 GiB",
        _ => "?",
    }
}

/// Run the translate command
pub fn run(
    args: &SessionArgs,
    config: EngineConfig,
    root: &str,
    va: &str,
    unchecked: bool,
) -> Result<()> {
    let root = parse_hex_address(root)?;
    let va = parse_hex_address(va)?;
    let engine = session::open(args, config)?;

    let access = if unchecked {
        Access::Unchecked
    } else {
        Access::Checked
    };

    let Some(translation) = engine.translator().walk(va, root, access) else {
        bail!(
            "0x{:X} does not translate through root 0x{:X}",
            va,
            root
        );
    };

    println!("Virtual:  {}", format_hex_address(va));
    println!(
        "Physical: {}",
        format_hex_address(translation.physical_address).green()
    );
    println!("Entry:    {}", format_hex_address(translation.entry_address));
    println!("Page:     {}", page_size_name(translation.page_size));

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_size_name() {
        assert_eq!(page_size_name(0x1000), "4 KiB");
        assert_eq!(page_size_name(0x20_0000), "2 MiB");
        assert_eq!(page_size_name(0x4000_0000), "1 GiB");
        assert_eq!(page_size_name(3), "?");
    }
}

//! Memmap command implementation.

use anyhow::Result;
use kintro_core::EngineConfig;
use owo_colors::OwoColorize;

use crate::session::{self, SessionArgs};

/// Run the memmap command
pub fn run(args: &SessionArgs, config: &EngineConfig) -> Result<()> {
    let image_size = match &args.image {
        Some(_) => session::open_image(args)?.size(),
        None => 0,
    };
    let map = session::load_memory_map(args, config, image_size)?;

    println!(
        "{} ({} regions, {} pages)",
        "Memory map".bold(),
        map.len(),
        map.total_pages()
    );
    println!();
    println!("{:>18}  {:>18}  {:>10}  Kind", "Start", "End", "Pages");
    for region in map.regions() {
        println!(
            "{:>18}  {:>18}  {:>10}  {}",
            format!("0x{:X}", region.physical_start),
            format!("0x{:X}", region.end()),
            region.page_count,
            region.kind.cyan()
        );
    }

    if !map.validate() {
        println!();
        println!(
            "{}",
            "Fewer than 3 populated regions; a firmware map would be rejected".yellow()
        );
    }

    Ok(())
}

//! Module list command implementation.

use anyhow::Result;
use kintro_core::EngineConfig;
use owo_colors::OwoColorize;

use crate::session::{self, SessionArgs};

/// Run the modules command.
///
/// Without `module` every loaded module name is listed.
pub fn run(
    args: &SessionArgs,
    config: EngineConfig,
    process: &str,
    module: Option<&str>,
) -> Result<()> {
    let mut engine = session::open(args, config)?;

    let Some(module) = module else {
        let names = engine.dump_module_names(process)?;
        println!("{} ({} modules)", process.bold(), names.len());
        for name in &names {
            println!("  {}", name);
        }
        return Ok(());
    };

    let record = engine.dump_module(process, module)?;
    println!("Module:      {}", record.name.bold());
    println!("Base:        0x{:X}", record.base_address);
    println!("Entry point: 0x{:X}", record.entry_point);
    println!("Size:        0x{:X}", record.size_of_image);
    println!("Load count:  {}", record.load_count);

    Ok(())
}

//! Bootstrap command implementation.
//!
//! Builds the kernel context and writes it out as a JSON dump.

use std::path::Path;

use anyhow::Result;
use kintro_core::{ContextDump, EngineConfig};
use owo_colors::OwoColorize;
use tracing::info;

use crate::session::{self, SessionArgs};

/// Run the bootstrap command
pub fn run(
    args: &SessionArgs,
    config: EngineConfig,
    output: Option<&Path>,
    processes: bool,
) -> Result<()> {
    let mut engine = session::open(args, config)?;
    let context = engine.ensure_context()?.clone();

    println!("Kernel:      {}", context.version_string().bold());
    println!("Base:        0x{:X}", context.kernel_base);
    println!("Root:        0x{:X}", context.page_table_root);
    println!(
        "System:      0x{:X} (physical 0x{:X})",
        context.initial_process.virtual_address, context.initial_process.physical_address
    );

    let mut dump = ContextDump::from_context(&context, engine.translator());
    if processes {
        let list = engine.list_processes()?;
        println!("Processes:   {}", list.len());
        dump = dump.with_processes(&list);
    }

    match output {
        Some(path) => {
            dump.save(path)?;
            info!("Context dump saved to {}", path.display());
            println!("Saved to {}", path.display().green());
        }
        None => {
            println!();
            println!("{}", serde_json::to_string_pretty(&dump)?);
        }
    }

    Ok(())
}

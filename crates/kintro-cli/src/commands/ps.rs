//! Process list command implementation.

use anyhow::Result;
use kintro_core::EngineConfig;
use owo_colors::OwoColorize;

use crate::session::{self, SessionArgs};

/// Run the ps command
pub fn run(args: &SessionArgs, config: EngineConfig) -> Result<()> {
    let mut engine = session::open(args, config)?;
    let processes = engine.list_processes()?;

    println!(
        "{:>8}  {:<16}  {:>18}  {:>18}",
        "PID", "Name", "Object", "Root"
    );
    for process in &processes {
        println!(
            "{:>8}  {:<16}  {:>18}  {:>18}",
            process.pid,
            process.name.cyan(),
            format!("0x{:X}", process.virtual_address),
            format!("0x{:X}", process.page_table_root)
        );
    }
    println!();
    println!("{} processes", processes.len());

    Ok(())
}

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod session;

use session::SessionArgs;

#[derive(Parser)]
#[command(name = "kintro")]
#[command(about = "Kernel introspection over raw physical memory images")]
#[command(version)]
struct Cli {
    /// Raw physical memory image (file offset = physical address)
    #[arg(short, long, global = true, env = "KINTRO_IMAGE")]
    image: Option<PathBuf>,

    /// Memory map as a JSON list of regions
    #[arg(long, global = true, conflicts_with = "efi_map")]
    memmap: Option<PathBuf>,

    /// Captured firmware memory descriptor table
    #[arg(long, global = true)]
    efi_map: Option<PathBuf>,

    /// Descriptor stride of --efi-map
    #[arg(long, global = true, default_value_t = 48)]
    descriptor_size: usize,

    /// Engine configuration (TOML)
    #[arg(short, long, global = true, default_value = "kintro.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the normalised memory map
    Memmap,

    /// Translate one virtual address
    Translate {
        /// Page-table root (hex)
        #[arg(long)]
        root: String,
        /// Virtual address (hex)
        #[arg(long)]
        va: String,
        /// Skip memory map validation of the table reads
        #[arg(long)]
        unchecked: bool,
    },

    /// Dump physical memory, or virtual memory when --root is given
    Hexdump {
        /// Start address (hex)
        #[arg(short, long)]
        address: String,
        /// Number of bytes
        #[arg(short, long, default_value_t = 256)]
        size: usize,
        /// Page-table root (hex) for a virtual dump
        #[arg(long)]
        root: Option<String>,
        /// Hide the ASCII column
        #[arg(long)]
        no_ascii: bool,
    },

    /// Search for a byte signature
    Scan {
        /// Hex bytes with `?` wildcards, e.g. "48 8B 05 ? ? ? ?"
        #[arg(short, long)]
        pattern: String,
        /// Start address (hex)
        #[arg(long)]
        base: String,
        /// Number of bytes to search (hex)
        #[arg(long)]
        size: String,
        /// Page-table root (hex); required unless --physical
        #[arg(long, required_unless_present = "physical")]
        root: Option<String>,
        /// Added to the result before the final base subtraction
        #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
        extra: i64,
        /// Follow the rip-relative displacement of the matched instruction
        #[arg(long)]
        rip_relative: bool,
        /// Subtract the base once more before adding --extra
        #[arg(long)]
        subtract: bool,
        /// Scan physical memory; `?` bytes become the 0xAA wildcard
        #[arg(long, conflicts_with_all = ["root", "rip_relative", "subtract"])]
        physical: bool,
    },

    /// Run the kernel bootstrap and print the context
    Bootstrap {
        /// Save the context dump as JSON
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Include the process list in the dump
        #[arg(long)]
        processes: bool,
    },

    /// List processes
    Ps,

    /// List the modules of a process, or show one module
    Modules {
        /// Process image name
        #[arg(short, long)]
        process: String,
        /// Module name to look up
        #[arg(short, long)]
        module: Option<String>,
    },
}

fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("kintro=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = session::load_config(&cli.config);
    let args = SessionArgs {
        image: cli.image,
        memmap: cli.memmap,
        efi_map: cli.efi_map,
        descriptor_size: cli.descriptor_size,
    };

    match cli.command {
        Command::Memmap => commands::memmap::run(&args, &config),
        Command::Translate {
            root,
            va,
            unchecked,
        } => commands::translate::run(&args, config, &root, &va, unchecked),
        Command::Hexdump {
            address,
            size,
            root,
            no_ascii,
        } => commands::hexdump::run(&args, config, &address, size, root.as_deref(), !no_ascii),
        Command::Scan {
            pattern,
            base,
            size,
            root,
            extra,
            rip_relative,
            subtract,
            physical,
        } => {
            let target = if physical {
                commands::scan::ScanTarget::Physical
            } else {
                commands::scan::ScanTarget::Virtual {
                    root: root.unwrap_or_default(),
                    extra,
                    rip_relative,
                    subtract,
                }
            };
            commands::scan::run(&args, config, &pattern, &base, &size, target)
        }
        Command::Bootstrap { output, processes } => {
            commands::bootstrap::run(&args, config, output.as_deref(), processes)
        }
        Command::Ps => commands::ps::run(&args, config),
        Command::Modules { process, module } => {
            commands::modules::run(&args, config, &process, module.as_deref())
        }
    }
}

//! Kernel bootstrap
//!
//! Builds a [`KernelContext`] from nothing but physical memory:
//!
//! 1. processor start block below 1 MiB (page-table root, kernel entry)
//! 2. kernel image base near the entry point
//! 3. kernel version from the version routine
//! 4. kernel build number
//! 5. process structure offsets for that version/build
//! 6. the System process as the list anchor
//!
//! Stages run strictly in order and any failure aborts the bootstrap; the
//! caller is expected to retry on a later entry.

mod context;
mod image;
mod low_stub;
mod offsets;
mod pe;
mod version;

#[cfg(test)]
pub mod mock;

use tracing::{debug, info};

pub use context::{KernelContext, ProcessRecord};
pub use image::{find_kernel_base, is_kernel_header};
pub use low_stub::{LowStub, find_low_stub, match_low_stub};
pub use offsets::StructOffsets;
pub use pe::{ExportDirectory, find_export_rva, parse_export_directory, resolve_export};
pub use version::{decode_build_fallback, decode_version, kernel_build, kernel_version};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::layout::version::INITIAL_SYSTEM_PROCESS;
use crate::memory::{MemoryAccessGuard, PhysicalMemory};
use crate::translate::AddressTranslator;

pub struct KernelBootstrap<'a, P: ?Sized> {
    translator: AddressTranslator<'a, P>,
    config: &'a EngineConfig,
}

impl<'a, P: PhysicalMemory + ?Sized> KernelBootstrap<'a, P> {
    pub fn new(translator: AddressTranslator<'a, P>, config: &'a EngineConfig) -> Self {
        Self { translator, config }
    }

    pub fn run(&self) -> Result<KernelContext> {
        debug!("Starting kernel bootstrap...");

        // Phase 1: start block
        debug!("Phase 1: Searching processor start block...");
        let stub = find_low_stub(self.translator.guard(), self.config.low_stub_limit)?;
        let root = stub.page_table_root;
        debug!("  Root: 0x{:X}", root);

        // Phase 2: kernel image
        debug!("Phase 2: Searching kernel image...");
        let kernel_base = find_kernel_base(
            self.translator,
            stub.kernel_entry,
            root,
            self.config.kernel_search_ahead,
            self.config.kernel_search_behind,
        )?;
        debug!("  Kernel: 0x{:X}", kernel_base);

        // Phase 3: version
        debug!("Phase 3: Reading kernel version...");
        let kernel_version = kernel_version(self.translator, kernel_base, root)?;

        // Phase 4: build
        debug!("Phase 4: Reading kernel build...");
        let kernel_build = kernel_build(self.translator, kernel_base, root)?;

        // Phase 5: offsets
        debug!("Phase 5: Selecting structure offsets...");
        let offsets = StructOffsets::select(kernel_version, kernel_build).ok_or(
            Error::UnsupportedKernel {
                version: kernel_version,
                build: kernel_build,
            },
        )?;
        debug!("  ActiveProcessLinks: 0x{:X}", offsets.apl);

        // Phase 6: anchor process
        debug!("Phase 6: Resolving initial system process...");
        let initial_process = self.initial_process(kernel_base, root)?;
        debug!(
            "  System process: 0x{:X} (physical 0x{:X})",
            initial_process.virtual_address, initial_process.physical_address
        );

        let context = KernelContext {
            offsets,
            initial_process,
            kernel_version,
            kernel_build,
            kernel_base,
            page_table_root: root,
        };
        info!("Kernel context ready: {}", context.version_string());
        Ok(context)
    }

    fn initial_process(&self, kernel_base: u64, root: u64) -> Result<ProcessRecord> {
        let stage = |e: Error| Error::bootstrap("anchor process", e.to_string());

        let pointer = pe::require_export(self.translator, kernel_base, root, INITIAL_SYSTEM_PROCESS)
            .map_err(stage)?;
        let virtual_address = self
            .translator
            .read_virtual_u64(pointer, root)
            .map_err(stage)?;
        let physical_address = self
            .translator
            .translate(virtual_address, root)
            .ok_or_else(|| {
                stage(Error::TranslationFailed {
                    address: virtual_address,
                    root,
                })
            })?;

        Ok(ProcessRecord {
            virtual_address,
            physical_address,
            ..Default::default()
        })
    }
}

/// Run every bootstrap stage against `guard`
pub fn bootstrap_kernel_context<P: PhysicalMemory + ?Sized>(
    guard: MemoryAccessGuard<'_, P>,
    config: &EngineConfig,
) -> Result<KernelContext> {
    KernelBootstrap::new(AddressTranslator::new(guard), config).run()
}

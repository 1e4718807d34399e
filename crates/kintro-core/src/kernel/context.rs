use serde::{Deserialize, Serialize};

use crate::kernel::offsets::StructOffsets;

/// A process as read from the kernel process list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRecord {
    pub virtual_address: u64,
    pub physical_address: u64,
    /// Directory table base (CR3) of the process
    pub page_table_root: u64,
    pub pid: u64,
    pub virtual_size: u64,
    pub vad_root: u64,
    pub name: String,
}

/// Everything the walkers need to know about the running kernel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelContext {
    pub offsets: StructOffsets,
    /// The System process; only its addresses are filled in
    pub initial_process: ProcessRecord,
    /// `major * 100 + minor`
    pub kernel_version: u16,
    pub kernel_build: u32,
    pub kernel_base: u64,
    /// Kernel page-table root from the start block
    pub page_table_root: u64,
}

impl KernelContext {
    pub fn version_string(&self) -> String {
        format!(
            "{}.{} (build {})",
            self.kernel_version / 100,
            self.kernel_version % 100,
            self.kernel_build
        )
    }
}

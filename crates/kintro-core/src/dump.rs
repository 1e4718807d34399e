use std::fs;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, Local};
use serde::Serialize;

use crate::kernel::{KernelContext, ProcessRecord};
use crate::memory::PhysicalMemory;
use crate::translate::AddressTranslator;

/// Kernel context dump for diagnostic purposes
#[derive(Debug, Clone, Serialize)]
pub struct ContextDump {
    pub captured_at: DateTime<Local>,
    pub kernel_version: String,
    pub kernel_build: u32,
    pub kernel_base: String,
    pub page_table_root: String,
    pub initial_process: ProcessAddresses,
    pub offsets: OffsetValues,
    pub memory_samples: MemorySamples,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processes: Option<Vec<ProcessSummary>>,
}

/// Virtual and physical address of one process object
#[derive(Debug, Clone, Serialize)]
pub struct ProcessAddresses {
    pub virtual_address: String,
    pub physical_address: String,
}

/// Process structure offsets in hex string format
#[derive(Debug, Clone, Serialize)]
pub struct OffsetValues {
    pub active_process_links: String,
    pub unique_process_id: String,
    pub image_file_name: String,
    pub stack_count: String,
    pub directory_table_base: String,
    pub environment_block: String,
    pub virtual_size: String,
    pub vad_root: String,
}

/// Memory samples at the kernel image and the initial process
#[derive(Debug, Clone, Serialize)]
pub struct MemorySamples {
    pub kernel_header_32bytes: String,
    pub initial_process_32bytes: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProcessSummary {
    pub name: String,
    pub pid: u64,
    pub virtual_address: String,
    pub page_table_root: String,
}

impl From<&ProcessRecord> for ProcessSummary {
    fn from(record: &ProcessRecord) -> Self {
        Self {
            name: record.name.clone(),
            pid: record.pid,
            virtual_address: format!("0x{:X}", record.virtual_address),
            page_table_root: format!("0x{:X}", record.page_table_root),
        }
    }
}

impl ContextDump {
    /// Create a dump from a context, sampling memory through `translator`
    pub fn from_context<P: PhysicalMemory + ?Sized>(
        context: &KernelContext,
        translator: AddressTranslator<'_, P>,
    ) -> Self {
        let o = &context.offsets;
        let offsets = OffsetValues {
            active_process_links: format!("0x{:X}", o.apl),
            unique_process_id: format!("0x{:X}", o.pid()),
            image_file_name: format!("0x{:X}", o.image_file_name),
            stack_count: format!("0x{:X}", o.stack_count),
            directory_table_base: format!("0x{:X}", o.dir_base),
            environment_block: format!("0x{:X}", o.peb),
            virtual_size: format!("0x{:X}", o.virtual_size),
            vad_root: format!("0x{:X}", o.vad_root),
        };

        let root = context.page_table_root;
        let memory_samples = MemorySamples {
            kernel_header_32bytes: Self::read_memory_hex(translator, context.kernel_base, root, 32),
            initial_process_32bytes: Self::read_memory_hex(
                translator,
                context.initial_process.virtual_address,
                root,
                32,
            ),
        };

        Self {
            captured_at: Local::now(),
            kernel_version: context.version_string(),
            kernel_build: context.kernel_build,
            kernel_base: format!("0x{:X}", context.kernel_base),
            page_table_root: format!("0x{:X}", root),
            initial_process: ProcessAddresses {
                virtual_address: format!("0x{:X}", context.initial_process.virtual_address),
                physical_address: format!("0x{:X}", context.initial_process.physical_address),
            },
            offsets,
            memory_samples,
            processes: None,
        }
    }

    /// Attach a process listing
    pub fn with_processes(mut self, processes: &[ProcessRecord]) -> Self {
        self.processes = Some(processes.iter().map(ProcessSummary::from).collect());
        self
    }

    fn read_memory_hex<P: PhysicalMemory + ?Sized>(
        translator: AddressTranslator<'_, P>,
        address: u64,
        root: u64,
        size: usize,
    ) -> String {
        if address == 0 {
            return "(address is 0)".to_string();
        }

        let mut bytes = vec![0u8; size];
        match translator.read_virtual(address, root, &mut bytes) {
            Ok(()) => bytes
                .iter()
                .map(|b| format!("{:02X}", b))
                .collect::<Vec<_>>()
                .join(" "),
            Err(_) => "(read failed)".to_string(),
        }
    }

    /// Save dump to JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

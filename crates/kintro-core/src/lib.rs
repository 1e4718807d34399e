//! # kintro-core
//!
//! Kernel introspection from raw physical memory.
//!
//! This crate provides:
//! - A validated memory map snapshot and guarded physical copies
//! - x86-64 4-level address translation with a page translation cache
//! - Wildcard signature scanning in virtual and physical memory
//! - Symbol-less kernel bootstrap (page-table root, image base, version,
//!   structure offsets, System process)
//! - Process and loaded-module enumeration over the kernel's live lists
//!
//! [`Introspector`] ties these together and owns all mutable state.

pub mod config;
pub mod dump;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod layout;
pub mod memory;
pub mod scan;
pub mod translate;
pub mod walker;

pub use config::{EngineConfig, EngineConfigBuilder};
pub use dump::ContextDump;
pub use engine::Introspector;
pub use error::{Error, Result};
pub use kernel::{
    KernelBootstrap, KernelContext, ProcessRecord, StructOffsets, bootstrap_kernel_context,
};
pub use memory::{
    Access, DumpFile, EfiDescriptorTable, MapQuery, MemoryAccessGuard, MemoryMap,
    MemoryMapSource, MemoryRegion, PhysicalMemory, RawImage, RegionKind,
};
pub use scan::{PHYSICAL_WILDCARD, Pattern, ScanOptions, SignatureScanner, compare};
pub use translate::{AddressTranslator, Translation, TranslationCache};
pub use walker::{
    CircularList, EnvironmentBlock, LoaderLayout, ModuleRecord, ModuleScan, ModuleWalker,
    ProcessWalker,
};

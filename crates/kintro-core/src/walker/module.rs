//! Loader module list walk
//!
//! A process's environment block points at its loader data, whose
//! in-memory-order list links one entry per loaded image. Processes running
//! 32-bit code under the compatibility layer keep a second, 32-bit
//! environment block one page above the native one; its presence is
//! signalled by the `wow64.dll` shim in the native list.

use serde::{Deserialize, Serialize};
use strum::{Display, IntoStaticStr};
use tracing::{debug, trace};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::kernel::{KernelContext, ProcessRecord};
use crate::layout::module::{MAX_NAME_LEN, NAME_READ_SIZE, WOW64_SHIM};
use crate::layout::{peb32, peb64};
use crate::memory::bytes::{le_u16, le_u32, le_u64};
use crate::memory::{Access, PhysicalMemory};
use crate::translate::AddressTranslator;
use crate::walker::list::CircularList;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, IntoStaticStr,
)]
pub enum LoaderLayout {
    #[strum(serialize = "64-bit")]
    Native64,
    #[strum(serialize = "32-bit")]
    Wow32,
}

impl LoaderLayout {
    fn pointer_size(self) -> usize {
        match self {
            Self::Native64 => 8,
            Self::Wow32 => 4,
        }
    }

    fn block_size(self) -> usize {
        match self {
            Self::Native64 => peb64::SIZE,
            Self::Wow32 => peb32::SIZE,
        }
    }

    fn list_head(self) -> u64 {
        match self {
            Self::Native64 => peb64::LDR_IN_MEMORY_ORDER,
            Self::Wow32 => peb32::LDR_IN_MEMORY_ORDER,
        }
    }

    fn entry_link(self) -> u64 {
        match self {
            Self::Native64 => peb64::ENTRY_LINK,
            Self::Wow32 => peb32::ENTRY_LINK,
        }
    }

    fn entry_size(self) -> usize {
        match self {
            Self::Native64 => peb64::ENTRY_SIZE,
            Self::Wow32 => peb32::ENTRY_SIZE,
        }
    }

    /// Read a pointer-sized field, zero-extended
    fn pointer(self, buf: &[u8], offset: usize) -> Option<u64> {
        match self {
            Self::Native64 => le_u64(buf, offset),
            Self::Wow32 => le_u32(buf, offset).map(u64::from),
        }
    }
}

/// The fields of a process environment block the walker uses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentBlock {
    pub image_base_address: u64,
    pub loader_data: u64,
    pub being_debugged: bool,
    pub layout: LoaderLayout,
}

impl EnvironmentBlock {
    fn parse(block: &[u8], layout: LoaderLayout) -> Option<Self> {
        let (image_base, ldr, debugged) = match layout {
            LoaderLayout::Native64 => (
                peb64::IMAGE_BASE_ADDRESS,
                peb64::LDR,
                peb64::BEING_DEBUGGED,
            ),
            LoaderLayout::Wow32 => (peb32::IMAGE_BASE_ADDRESS, peb32::LDR, peb32::BEING_DEBUGGED),
        };
        Some(Self {
            image_base_address: layout.pointer(block, image_base as usize)?,
            loader_data: layout.pointer(block, ldr as usize)?,
            being_debugged: *block.get(debugged as usize)? != 0,
            layout,
        })
    }
}

/// A loaded image as recorded in a loader list entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub base_address: u64,
    pub entry_point: u64,
    pub size_of_image: u32,
    pub name: String,
    pub load_count: u16,
}

/// Outcome of one loader list walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModuleScan {
    /// The target module, when one was requested and found
    pub found: Option<ModuleRecord>,
    /// Whether the compatibility shim was seen
    pub wow64: bool,
}

/// Decode a UTF-16LE short name by keeping every second byte.
///
/// Stops at the first NUL; at most 31 characters are kept. Characters
/// outside Latin-1 are not preserved.
pub fn decode_module_name(raw: &[u8]) -> String {
    raw.iter()
        .step_by(2)
        .take_while(|&&b| b != 0)
        .take(MAX_NAME_LEN)
        .map(|&b| b as char)
        .collect()
}

fn parse_entry(entry: &[u8], layout: LoaderLayout) -> Option<(ModuleRecord, u64)> {
    let (dll_base, entry_point, size_of_image, name_buffer, load_count) = match layout {
        LoaderLayout::Native64 => (
            peb64::ENTRY_DLL_BASE,
            peb64::ENTRY_ENTRY_POINT,
            peb64::ENTRY_SIZE_OF_IMAGE,
            peb64::ENTRY_BASE_NAME_BUFFER,
            peb64::ENTRY_LOAD_COUNT,
        ),
        LoaderLayout::Wow32 => (
            peb32::ENTRY_DLL_BASE,
            peb32::ENTRY_ENTRY_POINT,
            peb32::ENTRY_SIZE_OF_IMAGE,
            peb32::ENTRY_BASE_NAME_BUFFER,
            peb32::ENTRY_LOAD_COUNT,
        ),
    };

    let record = ModuleRecord {
        base_address: layout.pointer(entry, dll_base)?,
        entry_point: layout.pointer(entry, entry_point)?,
        size_of_image: le_u32(entry, size_of_image)?,
        name: String::new(),
        load_count: le_u16(entry, load_count)?,
    };
    Some((record, layout.pointer(entry, name_buffer)?))
}

pub struct ModuleWalker<'a, P: ?Sized> {
    translator: AddressTranslator<'a, P>,
    config: &'a EngineConfig,
}

impl<'a, P: PhysicalMemory + ?Sized> ModuleWalker<'a, P> {
    pub fn new(translator: AddressTranslator<'a, P>, config: &'a EngineConfig) -> Self {
        Self { translator, config }
    }

    fn read_environment_block(
        &self,
        ctx: &KernelContext,
        process: &ProcessRecord,
        layout: LoaderLayout,
    ) -> Option<EnvironmentBlock> {
        if ctx.offsets.peb == 0 || process.physical_address == 0 {
            return None;
        }

        let pointer = self
            .translator
            .guard()
            .read_u64(
                process.physical_address.wrapping_add(ctx.offsets.peb),
                Access::Unchecked,
            )
            .ok()?;
        if pointer == 0 {
            return None;
        }

        let address = match layout {
            LoaderLayout::Native64 => pointer,
            LoaderLayout::Wow32 => pointer.wrapping_add(peb32::BLOCK_DISTANCE),
        };
        let mut block = vec![0u8; layout.block_size()];
        if let Err(e) =
            self.translator
                .read_virtual_unchecked(address, process.page_table_root, &mut block)
        {
            trace!("Environment block at 0x{:X} unreadable: {}", address, e);
            return None;
        }
        EnvironmentBlock::parse(&block, layout)
    }

    /// Native environment block of `process`
    pub fn environment_block(
        &self,
        ctx: &KernelContext,
        process: &ProcessRecord,
    ) -> Option<EnvironmentBlock> {
        self.read_environment_block(ctx, process, LoaderLayout::Native64)
    }

    /// 32-bit environment block of `process`
    pub fn environment_block32(
        &self,
        ctx: &KernelContext,
        process: &ProcessRecord,
    ) -> Option<EnvironmentBlock> {
        self.read_environment_block(ctx, process, LoaderLayout::Wow32)
    }

    /// Walk the loader list of `process` once.
    ///
    /// Every decoded name is appended to `names` while it holds fewer than
    /// `module_name_capacity` entries. The walk returns as soon as `target`
    /// matches (ASCII case-insensitive).
    pub fn fill_module_list(
        &self,
        ctx: &KernelContext,
        process: &ProcessRecord,
        layout: LoaderLayout,
        target: Option<&str>,
        mut names: Option<&mut Vec<String>>,
    ) -> Result<ModuleScan> {
        if process.page_table_root == 0
            || process.physical_address == 0
            || process.virtual_address == 0
        {
            return Err(Error::ZeroAddress);
        }

        let root = process.page_table_root;
        let block = self
            .read_environment_block(ctx, process, layout)
            .ok_or(Error::EnvironmentBlockUnavailable { pid: process.pid })?;
        if block.loader_data == 0 || self.translator.translate(block.loader_data, root).is_none() {
            debug!(
                "Loader data of pid {} not present at 0x{:X}",
                process.pid, block.loader_data
            );
            return Err(Error::EnvironmentBlockUnavailable { pid: process.pid });
        }

        let translator = self.translator;
        let pointer_size = layout.pointer_size();
        let read_link = |link: u64| {
            let mut buf = [0u8; 8];
            translator
                .read_virtual_unchecked(link, root, &mut buf[..pointer_size])
                .ok()?;
            layout.pointer(&buf, 0)
        };

        let head = block.loader_data.wrapping_add(layout.list_head());
        let list = CircularList::from_head(
            head,
            layout.entry_link(),
            self.config.module_walk_limit,
            read_link,
        );

        let mut scan = ModuleScan::default();
        let mut entry = vec![0u8; layout.entry_size()];
        let mut raw_name = [0u8; NAME_READ_SIZE];

        for node in list {
            if translator
                .read_virtual_unchecked(node, root, &mut entry)
                .is_err()
            {
                trace!("Loader entry at 0x{:X} unreadable", node);
                continue;
            }
            let Some((mut module, name_buffer)) = parse_entry(&entry, layout) else {
                continue;
            };
            if name_buffer == 0 {
                continue;
            }
            raw_name.fill(0);
            if translator
                .read_virtual_unchecked(name_buffer, root, &mut raw_name)
                .is_err()
            {
                continue;
            }
            module.name = decode_module_name(&raw_name);

            if let Some(names) = names.as_deref_mut()
                && names.len() < self.config.module_name_capacity
            {
                names.push(module.name.clone());
            }
            if module.name.eq_ignore_ascii_case(WOW64_SHIM) {
                scan.wow64 = true;
            }
            if target.is_some_and(|t| module.name.eq_ignore_ascii_case(t)) {
                debug!(
                    "Module {} ({}): base 0x{:X}, size 0x{:X}",
                    module.name, layout, module.base_address, module.size_of_image
                );
                scan.found = Some(module);
                return Ok(scan);
            }
        }

        Ok(scan)
    }

    /// Find a module in the native list, then in the 32-bit list if the
    /// process runs under the compatibility layer.
    pub fn dump_module(
        &self,
        ctx: &KernelContext,
        process: &ProcessRecord,
        name: &str,
    ) -> Result<ModuleRecord> {
        let native =
            self.fill_module_list(ctx, process, LoaderLayout::Native64, Some(name), None)?;
        if let Some(module) = native.found {
            return Ok(module);
        }

        if native.wow64 {
            let wow =
                self.fill_module_list(ctx, process, LoaderLayout::Wow32, Some(name), None)?;
            if let Some(module) = wow.found {
                return Ok(module);
            }
        }

        Err(Error::ModuleNotFound(name.to_string()))
    }

    /// Names of every module in the native list, followed by the 32-bit
    /// list when the compatibility shim is loaded
    pub fn dump_module_names(
        &self,
        ctx: &KernelContext,
        process: &ProcessRecord,
    ) -> Result<Vec<String>> {
        let mut names = Vec::new();
        let native =
            self.fill_module_list(ctx, process, LoaderLayout::Native64, None, Some(&mut names))?;
        if native.wow64 {
            self.fill_module_list(ctx, process, LoaderLayout::Wow32, None, Some(&mut names))?;
        }
        Ok(names)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::bootstrap_kernel_context;
    use crate::kernel::mock::{LOAD_COUNT, MockKernel};
    use crate::memory::{MemoryAccessGuard, MemoryMap, MockPhysicalMemory};
    use crate::walker::ProcessWalker;

    struct Fixture {
        kernel: MockKernel,
        map: MemoryMap,
        config: EngineConfig,
    }

    impl Fixture {
        fn new(kernel: MockKernel) -> Self {
            let kernel = kernel.finish();
            let map = kernel.memory_map();
            Self {
                kernel,
                map,
                config: EngineConfig::default(),
            }
        }

        fn translator(&self) -> AddressTranslator<'_, MockPhysicalMemory> {
            AddressTranslator::new(MemoryAccessGuard::new(&self.kernel.machine.memory, &self.map))
        }

        fn walker(&self) -> ModuleWalker<'_, MockPhysicalMemory> {
            ModuleWalker::new(self.translator(), &self.config)
        }

        fn process(&self, name: &str) -> (KernelContext, ProcessRecord) {
            let ctx = bootstrap_kernel_context(self.translator().guard(), &self.config).unwrap();
            let record = ProcessWalker::new(self.translator(), &self.config)
                .dump_process(&ctx, name)
                .unwrap();
            (ctx, record)
        }
    }

    fn native_process() -> Fixture {
        let mut kernel = MockKernel::new();
        let game = kernel.add_user_process("game.exe", 0x1F00);
        kernel.add_modules64(
            &game,
            &[
                ("game.exe", 0x7FF6_4000_0000, 0x0120_0000),
                ("ntdll.dll", 0x7FFE_1000_0000, 0x1F_8000),
                ("", 0x7FFE_2000_0000, 0x1000),
                ("KERNEL32.DLL", 0x7FFE_0F00_0000, 0xC_0000),
            ],
        );
        Fixture::new(kernel)
    }

    #[test]
    fn test_decode_module_name() {
        let raw: Vec<u8> = "ntdll.dll".encode_utf16().flat_map(|c| c.to_le_bytes()).collect();
        assert_eq!(decode_module_name(&raw), "ntdll.dll");

        let long = [b'a', 0].repeat(40);
        assert_eq!(decode_module_name(&long).len(), 31);
        assert_eq!(decode_module_name(&[0, 0, b'x', 0]), "");
    }

    #[test]
    fn test_environment_blocks() {
        let fixture = native_process();
        let (ctx, game) = fixture.process("game.exe");
        let walker = fixture.walker();

        let block = walker.environment_block(&ctx, &game).unwrap();
        assert_eq!(block.image_base_address, 0x7FF6_4000_0000);
        assert_ne!(block.loader_data, 0);
        assert!(!block.being_debugged);
        assert_eq!(block.layout, LoaderLayout::Native64);

        // no 32-bit loader data was written
        let block32 = walker.environment_block32(&ctx, &game).unwrap();
        assert_eq!(block32.loader_data, 0);

        let (_, system) = fixture.process("System");
        assert!(walker.environment_block(&ctx, &system).is_none());
    }

    #[test]
    fn test_dump_module_native() {
        let fixture = native_process();
        let (ctx, game) = fixture.process("game.exe");
        let walker = fixture.walker();

        let module = walker.dump_module(&ctx, &game, "kernel32.dll").unwrap();
        assert_eq!(module.name, "KERNEL32.DLL");
        assert_eq!(module.base_address, 0x7FFE_0F00_0000);
        assert_eq!(module.entry_point, 0x7FFE_0F00_1A40);
        assert_eq!(module.size_of_image, 0xC_0000);
        assert_eq!(module.load_count, LOAD_COUNT);

        assert!(matches!(
            walker.dump_module(&ctx, &game, "user32.dll"),
            Err(Error::ModuleNotFound(_))
        ));
    }

    #[test]
    fn test_dump_module_names_skips_unnamed_entries() {
        let fixture = native_process();
        let (ctx, game) = fixture.process("game.exe");

        let names = fixture.walker().dump_module_names(&ctx, &game).unwrap();
        assert_eq!(names, vec!["game.exe", "ntdll.dll", "KERNEL32.DLL"]);
    }

    #[test]
    fn test_module_name_capacity() {
        let mut fixture = native_process();
        fixture.config = EngineConfig::builder().module_name_capacity(2).build();
        let (ctx, game) = fixture.process("game.exe");

        let names = fixture.walker().dump_module_names(&ctx, &game).unwrap();
        assert_eq!(names, vec!["game.exe", "ntdll.dll"]);
    }

    #[test]
    fn test_wow64_process_walks_both_lists() {
        let mut kernel = MockKernel::new();
        let game = kernel.add_user_process("game32.exe", 0x2200);
        kernel.add_modules64(
            &game,
            &[
                ("game32.exe", 0x40_0000, 0x80_0000),
                ("ntdll.dll", 0x7FFE_1000_0000, 0x1F_8000),
                ("wow64.dll", 0x7FFE_3000_0000, 0x5_8000),
            ],
        );
        kernel.add_modules32(
            &game,
            &[
                ("game32.exe", 0x40_0000, 0x80_0000),
                ("ntdll.dll", 0x7790_0000, 0x1A_0000),
                ("d3d9.dll", 0x6F00_0000, 0x20_0000),
            ],
        );
        let fixture = Fixture::new(kernel);
        let (ctx, process) = fixture.process("game32.exe");
        let walker = fixture.walker();

        let scan = walker
            .fill_module_list(&ctx, &process, LoaderLayout::Native64, None, None)
            .unwrap();
        assert!(scan.wow64);
        assert!(scan.found.is_none());

        let module = walker.dump_module(&ctx, &process, "d3d9.dll").unwrap();
        assert_eq!(module.base_address, 0x6F00_0000);
        assert_eq!(module.entry_point, 0x6F00_1A40);

        let block32 = walker.environment_block32(&ctx, &process).unwrap();
        assert_eq!(block32.image_base_address, 0x40_0000);
        assert_eq!(block32.layout, LoaderLayout::Wow32);

        let names = walker.dump_module_names(&ctx, &process).unwrap();
        assert_eq!(names.len(), 6);
        assert_eq!(names[3..], ["game32.exe", "ntdll.dll", "d3d9.dll"]);
    }

    #[test]
    fn test_fill_module_list_requires_addresses() {
        let fixture = native_process();
        let (ctx, mut game) = fixture.process("game.exe");
        game.page_table_root = 0;

        let err = fixture
            .walker()
            .fill_module_list(&ctx, &game, LoaderLayout::Native64, None, None)
            .unwrap_err();
        assert!(matches!(err, Error::ZeroAddress));
    }

    #[test]
    fn test_fill_module_list_without_loader_data() {
        let mut kernel = MockKernel::new();
        kernel.add_user_process("early.exe", 0x3000);
        let fixture = Fixture::new(kernel);
        let (ctx, early) = fixture.process("early.exe");
        let block = fixture.walker().environment_block(&ctx, &early).unwrap();
        assert_eq!(block.loader_data, 0);

        let err = fixture.walker().dump_module_names(&ctx, &early).unwrap_err();
        assert!(matches!(err, Error::EnvironmentBlockUnavailable { pid: 0x3000 }));
    }
}

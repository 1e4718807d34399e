//! Memory layout constants for paging and kernel data structures
//!
//! This module centralizes every fixed offset, mask and magic value the
//! engine reads memory with. Constants are organized by structure type.

/// Paging constants for x86-64 4-level translation
pub mod paging {
    pub const PAGE_SIZE: u64 = 0x1000;
    pub const PAGE_OFFSET_MASK: u64 = PAGE_SIZE - 1;

    /// Physical frame bits of a table entry (bits 12..48)
    pub const PHYS_MASK: u64 = 0x0000_FFFF_FFFF_F000;

    pub const PRESENT: u64 = 1 << 0;
    /// Set on PDPT / PD entries that map a large page directly
    pub const PAGE_SIZE_FLAG: u64 = 1 << 7;

    /// Offset bits inside a 2 MiB page
    pub const LARGE_PAGE_MASK: u64 = 0x1F_FFFF;
    /// Offset bits inside a 1 GiB page
    pub const HUGE_PAGE_MASK: u64 = 0x3FFF_FFFF;

    /// Low bits of CR3 that are flags, not address
    pub const ROOT_FLAGS_MASK: u64 = 0xF;
    /// Highest physical address a table can live at (48-bit)
    pub const PHYS_ADDRESS_LIMIT: u64 = 0x0000_FFFF_FFFF_FFFF;

    pub const ENTRY_SIZE: u64 = 8;
    pub const INDEX_MASK: u64 = 0x1FF;

    pub const PML4_SHIFT: u64 = 39;
    pub const PDPT_SHIFT: u64 = 30;
    pub const PD_SHIFT: u64 = 21;
    pub const PT_SHIFT: u64 = 12;
}

/// Firmware memory descriptor layout
pub mod descriptor {
    pub const KIND: usize = 0;
    pub const PHYSICAL_START: usize = 8;
    pub const VIRTUAL_START: usize = 16;
    pub const PAGE_COUNT: usize = 24;
    pub const ATTRIBUTE: usize = 32;

    /// Smallest descriptor the fields above fit in
    pub const MIN_SIZE: usize = 40;
}

/// Low-memory processor start block (the real-mode trampoline page)
pub mod low_stub {
    pub const FIRST_PAGE: u64 = 0x1000;
    /// Bytes of each candidate page that are inspected
    pub const PROBE_SIZE: usize = 0xA8;

    pub const JMP_OFFSET: usize = 0x00;
    pub const JMP_MASK: u64 = 0xFFFF_FFFF_FFFF_00FF;
    pub const JMP_VALUE: u64 = 0x0000_0001_0006_00E9;

    pub const KERNEL_ENTRY_OFFSET: usize = 0x70;
    pub const KERNEL_ENTRY_MASK: u64 = 0xFFFF_F800_0000_0003;
    pub const KERNEL_ENTRY_VALUE: u64 = 0xFFFF_F800_0000_0000;

    pub const ROOT_OFFSET: usize = 0xA0;
    pub const ROOT_MASK: u64 = 0xFFFF_FF00_0000_0FFF;
}

/// Kernel image search around the kernel entry point
pub mod kernel_image {
    /// Alignment stride between candidate windows (2 MiB)
    pub const STRIDE: u64 = 0x20_0000;
    pub const STRIDE_MASK: u64 = STRIDE - 1;

    /// First (widest) alignment mask tried; narrowed by 4 bits per pass
    pub const INITIAL_ALIGN_MASK: u64 = 0xF_FFFF;
    pub const MIN_ALIGN_MASK: u64 = 0xFFF;

    /// Section names that only appear in the kernel image header page
    pub const KDBG_MARKER: &[u8; 8] = b"INITKDBG";
    pub const POOLCODE_MARKER: &[u8; 8] = b"POOLCODE";
}

/// PE image header layout
pub mod pe {
    pub const HEADER_SIZE: usize = 0x1000;

    pub const DOS_MAGIC: u16 = 0x5A4D;
    pub const LFANEW_OFFSET: usize = 0x3C;
    /// Largest accepted e_lfanew (headers must fit in the first page)
    pub const MAX_LFANEW: usize = HEADER_SIZE - 0x200;

    pub const NT_SIGNATURE: u32 = 0x0000_4550;
    pub const OPTIONAL_HEADER_OFFSET: usize = 0x18;

    pub const PE32_MAGIC: u16 = 0x10B;
    pub const PE32_PLUS_MAGIC: u16 = 0x20B;

    /// Offset of DataDirectory[EXPORT] inside the optional header
    pub const PE32_EXPORT_DIRECTORY: usize = 0x60;
    pub const PE32_PLUS_EXPORT_DIRECTORY: usize = 0x70;

    pub const EXPORT_DIRECTORY_SIZE: u32 = 40;
    pub const MAX_EXPORT_DIRECTORY_SIZE: u32 = 0x7F_FFFF;

    // IMAGE_EXPORT_DIRECTORY fields
    pub const NUMBER_OF_FUNCTIONS: usize = 0x14;
    pub const NUMBER_OF_NAMES: usize = 0x18;
    pub const ADDRESS_OF_FUNCTIONS: usize = 0x1C;
    pub const ADDRESS_OF_NAMES: usize = 0x20;
    pub const ADDRESS_OF_NAME_ORDINALS: usize = 0x24;
}

/// Instruction encodings used to recover the kernel version and build
pub mod version {
    /// Bytes of the version routine that are copied
    pub const CODE_SIZE: usize = 0x100;
    /// Bytes of the version routine that are scanned
    pub const SCAN_LIMIT: usize = 0xF0;

    /// `mov qword ptr [rcx+4], imm32` storing major and minor at once
    pub const COMBINED_STORE: u32 = 0x0441_C748;
    /// `mov dword ptr [rcx+4], imm32` (major)
    pub const MAJOR_STORE: u32 = 0x4_41C7;
    /// `mov dword ptr [rcx+8], imm32` (minor)
    pub const MINOR_STORE: u32 = 0x8_41C7;
    pub const STORE_MASK: u32 = 0xF_FFFF;

    /// `mov dword ptr [rcx+0Ch], imm32` (build)
    pub const BUILD_STORE: u32 = 0x0C_41C7;
    pub const BUILD_STORE_ALT: u32 = 0x05_C01B;
    pub const BUILD_STORE_MASK: u32 = 0xFF_FFFF;

    /// Mask applied to the exported build number (drops the checked/free flags)
    pub const BUILD_NUMBER_MASK: u32 = 0xFF_FFFF;

    pub const VERSION_ROUTINE: &str = "RtlGetVersion";
    pub const BUILD_NUMBER: &str = "NtBuildNumber";
    pub const INITIAL_SYSTEM_PROCESS: &str = "PsInitialSystemProcess";
}

/// Kernel process object
pub mod process {
    /// Length of the image file name field
    pub const IMAGE_NAME_LEN: usize = 15;
    /// The pid sits directly before the active-process link
    pub const PID_BEFORE_LINK: u64 = 8;
    /// Process id of the System process
    pub const SYSTEM_PID: u64 = 4;
}

/// Process environment block and loader data, 64-bit layout
pub mod peb64 {
    pub const IMAGE_BASE_ADDRESS: u64 = 0x10;
    pub const LDR: u64 = 0x18;
    pub const BEING_DEBUGGED: u64 = 0x02;
    pub const SIZE: usize = 0x20;

    pub const LDR_IN_MEMORY_ORDER: u64 = 0x20;

    /// Offset of InMemoryOrderLinks inside a loader entry
    pub const ENTRY_LINK: u64 = 0x10;
    pub const ENTRY_DLL_BASE: usize = 0x30;
    pub const ENTRY_ENTRY_POINT: usize = 0x38;
    pub const ENTRY_SIZE_OF_IMAGE: usize = 0x40;
    pub const ENTRY_BASE_NAME_BUFFER: usize = 0x60;
    pub const ENTRY_LOAD_COUNT: usize = 0x6C;
    pub const ENTRY_SIZE: usize = 0x70;
}

/// Process environment block and loader data, 32-bit (WoW64) layout
pub mod peb32 {
    /// The 32-bit block lives one page after the native one
    pub const BLOCK_DISTANCE: u64 = 0x1000;
    pub const IMAGE_BASE_ADDRESS: u64 = 0x08;
    pub const LDR: u64 = 0x0C;
    pub const BEING_DEBUGGED: u64 = 0x02;
    pub const SIZE: usize = 0x10;

    pub const LDR_IN_MEMORY_ORDER: u64 = 0x14;

    pub const ENTRY_LINK: u64 = 0x08;
    pub const ENTRY_DLL_BASE: usize = 0x18;
    pub const ENTRY_ENTRY_POINT: usize = 0x1C;
    pub const ENTRY_SIZE_OF_IMAGE: usize = 0x20;
    pub const ENTRY_BASE_NAME_BUFFER: usize = 0x30;
    pub const ENTRY_LOAD_COUNT: usize = 0x38;
    pub const ENTRY_SIZE: usize = 0x3C;
}

/// Loader module names
pub mod module {
    /// Bytes of the UTF-16 name buffer that are read
    pub const NAME_READ_SIZE: usize = 0x40;
    /// Longest decoded name kept (one slot is reserved for the terminator)
    pub const MAX_NAME_LEN: usize = 0x1F;
    /// Module whose presence marks a 32-bit process under WoW64
    pub const WOW64_SHIM: &str = "wow64.dll";
}

//! Synthetic kernel for testing
//!
//! Lays out a start block, a kernel image with the exports the bootstrap
//! needs, a circular process list and per-process loader data on top of
//! [`MockMachine`].

use crate::kernel::low_stub::tests::write_low_stub;
use crate::kernel::offsets::StructOffsets;
use crate::kernel::pe::tests::build_image;
use crate::layout::paging::{ENTRY_SIZE, PAGE_SIZE};
use crate::layout::process::IMAGE_NAME_LEN;
use crate::layout::{peb32, peb64};
use crate::memory::{MemoryMap, MockMachine, PhysicalMemory};

pub const KERNEL_BASE: u64 = 0xFFFF_F803_1200_0000;
pub const KERNEL_ENTRY: u64 = 0xFFFF_F803_1240_5A10;
pub const BUILD: u32 = 19045;
pub const START_BLOCK: u64 = 0x13000;

const VERSION_RVA: u32 = 0x3000;
const BUILD_NUMBER_RVA: u32 = 0x3100;
const SYSTEM_PROCESS_RVA: u32 = 0x3108;

const PROCESS_OBJECTS: u64 = 0xFFFF_A50F_0000_0000;

pub const PEB: u64 = 0x0000_0000_7FFD_E000;
const LDR64: u64 = 0x0000_7FFA_1000_0000;
const ENTRIES64: u64 = 0x0000_0200_0000_0000;
const LDR32: u64 = 0x0077_0000;
const ENTRIES32: u64 = 0x0078_0000;
const NAME_OFFSET64: u64 = 0x80;
const NAME_OFFSET32: u64 = 0x40;

/// First kernel-half slot of a PML4
const KERNEL_HALF: u64 = 256;

/// Loader count written into every mock module entry
pub const LOAD_COUNT: u16 = 6;

/// A process with its own address space
#[derive(Debug, Clone, Copy)]
pub struct MockProcess {
    pub virtual_address: u64,
    pub root: u64,
}

pub struct MockKernel {
    pub machine: MockMachine,
    pub root: u64,
    pub offsets: StructOffsets,
    pub system_process: u64,
    processes: Vec<u64>,
    user_roots: Vec<u64>,
}

impl MockKernel {
    /// Start block, kernel image and a System process
    pub fn new() -> Self {
        let mut machine = MockMachine::new(0x10_0000);
        let root = machine.new_root();
        write_low_stub(&mut machine.memory, START_BLOCK, root, KERNEL_ENTRY);

        let mut image = build_image(&[
            ("RtlGetVersion", VERSION_RVA),
            ("NtBuildNumber", BUILD_NUMBER_RVA),
            ("PsInitialSystemProcess", SYSTEM_PROCESS_RVA),
        ]);
        image[0x3A8..0x3B0].copy_from_slice(b"POOLCODE");
        image[0x420..0x428].copy_from_slice(b"INITKDBG");
        machine.write_virtual(root, KERNEL_BASE, &image);

        let offsets = StructOffsets::select(1000, BUILD).unwrap();
        let mut kernel = Self {
            machine,
            root,
            offsets,
            system_process: 0,
            processes: Vec::new(),
            user_roots: Vec::new(),
        };
        kernel.set_version(10, 0);
        kernel.machine.write_virtual_u32(
            root,
            KERNEL_BASE + BUILD_NUMBER_RVA as u64,
            0xF000_0000 | BUILD,
        );

        kernel.system_process = kernel.add_process("System", 4, 0, root);
        kernel.machine.write_virtual_u64(
            root,
            KERNEL_BASE + SYSTEM_PROCESS_RVA as u64,
            kernel.system_process,
        );
        kernel
    }

    /// Rewrite the version routine with separate major/minor stores and a build store
    pub fn set_version(&mut self, major: u8, minor: u8) {
        let mut code = vec![0x90u8; 0x100];
        code[0x10..0x17].copy_from_slice(&[0xC7, 0x41, 0x04, major, 0x00, 0x00, 0x00]);
        code[0x17..0x1E].copy_from_slice(&[0xC7, 0x41, 0x08, minor, 0x00, 0x00, 0x00]);
        code[0x1E..0x21].copy_from_slice(&[0xC7, 0x41, 0x0C]);
        code[0x21..0x25].copy_from_slice(&BUILD.to_le_bytes());
        code[0x25] = 0xC3;
        self.machine
            .write_virtual(self.root, KERNEL_BASE + VERSION_RVA as u64, &code);
    }

    pub fn clear_build_number(&mut self) {
        self.machine
            .write_virtual_u32(self.root, KERNEL_BASE + BUILD_NUMBER_RVA as u64, 0);
    }

    /// Append a process object to the active-process list
    pub fn add_process(&mut self, name: &str, pid: u64, stack_count: u32, dir_base: u64) -> u64 {
        let va = PROCESS_OBJECTS + self.processes.len() as u64 * PAGE_SIZE;
        let o = self.offsets;
        let root = self.root;

        self.machine
            .write_virtual(root, va, &[0u8; PAGE_SIZE as usize]);
        self.machine.write_virtual_u64(root, va + o.pid(), pid);
        self.machine.write_virtual_u64(root, va + o.dir_base, dir_base);
        self.machine
            .write_virtual_u32(root, va + o.stack_count, stack_count);
        self.machine
            .write_virtual_u64(root, va + o.virtual_size, 0x20_0000 + pid * 0x1000);
        self.machine
            .write_virtual_u64(root, va + o.vad_root, 0xFFFF_B000_0000_0000 | pid << 12);
        let name = &name.as_bytes()[..name.len().min(IMAGE_NAME_LEN)];
        self.machine
            .write_virtual(root, va + o.image_file_name, name);

        self.processes.push(va);
        self.relink();
        va
    }

    /// Add a process with its own page-table root and an environment block
    pub fn add_user_process(&mut self, name: &str, pid: u64) -> MockProcess {
        let user_root = self.machine.new_root();
        self.user_roots.push(user_root);
        let va = self.add_process(name, pid, 1, user_root);

        self.machine
            .write_virtual_u64(self.root, va + self.offsets.peb, PEB);
        self.machine
            .write_virtual(user_root, PEB, &[0u8; 2 * PAGE_SIZE as usize]);
        self.machine.write_virtual_u64(
            user_root,
            PEB + peb64::IMAGE_BASE_ADDRESS,
            0x0000_7FF6_4000_0000,
        );

        MockProcess {
            virtual_address: va,
            root: user_root,
        }
    }

    /// Overwrite one 64-bit field of a process object
    pub fn patch_process(&mut self, va: u64, offset: u64, value: u64) {
        self.machine.write_virtual_u64(self.root, va + offset, value);
    }

    /// Native loader list of `process`: `(name, base, size)`; an empty name
    /// leaves the name buffer null
    pub fn add_modules64(&mut self, process: &MockProcess, modules: &[(&str, u64, u32)]) {
        let root = process.root;
        self.machine.write_virtual_u64(root, PEB + peb64::LDR, LDR64);
        self.machine.write_virtual(root, LDR64, &[0u8; 0x100]);

        let head = LDR64 + peb64::LDR_IN_MEMORY_ORDER;
        let links: Vec<u64> = (0..modules.len() as u64)
            .map(|k| ENTRIES64 + k * 0x100 + peb64::ENTRY_LINK)
            .collect();
        self.link_ring(root, head, &links);

        for (k, (name, base, size)) in modules.iter().enumerate() {
            let entry = ENTRIES64 + k as u64 * 0x100;
            self.machine.write_virtual_u64(
                root,
                entry + peb64::ENTRY_DLL_BASE as u64,
                *base,
            );
            self.machine.write_virtual_u64(
                root,
                entry + peb64::ENTRY_ENTRY_POINT as u64,
                base + 0x1A40,
            );
            self.machine.write_virtual_u32(
                root,
                entry + peb64::ENTRY_SIZE_OF_IMAGE as u64,
                *size,
            );
            self.machine.write_virtual_u16(
                root,
                entry + peb64::ENTRY_LOAD_COUNT as u64,
                LOAD_COUNT,
            );
            if !name.is_empty() {
                let buffer = entry + NAME_OFFSET64;
                self.machine.write_virtual_u16(root, entry + 0x58, name.len() as u16 * 2);
                self.machine.write_virtual_u64(
                    root,
                    entry + peb64::ENTRY_BASE_NAME_BUFFER as u64,
                    buffer,
                );
                self.machine.write_virtual(root, buffer, &utf16(name));
            }
        }
    }

    /// 32-bit loader list, one page above the native environment block
    pub fn add_modules32(&mut self, process: &MockProcess, modules: &[(&str, u32, u32)]) {
        let root = process.root;
        let block = PEB + peb32::BLOCK_DISTANCE;
        self.machine
            .write_virtual_u32(root, block + peb32::IMAGE_BASE_ADDRESS, 0x0040_0000);
        self.machine
            .write_virtual_u32(root, block + peb32::LDR, LDR32 as u32);
        self.machine.write_virtual(root, LDR32, &[0u8; 0x80]);

        let head = LDR32 + peb32::LDR_IN_MEMORY_ORDER;
        let links: Vec<u64> = (0..modules.len() as u64)
            .map(|k| ENTRIES32 + k * 0x80 + peb32::ENTRY_LINK)
            .collect();
        self.link_ring32(root, head, &links);

        for (k, (name, base, size)) in modules.iter().enumerate() {
            let entry = ENTRIES32 + k as u64 * 0x80;
            self.machine
                .write_virtual_u32(root, entry + peb32::ENTRY_DLL_BASE as u64, *base);
            self.machine.write_virtual_u32(
                root,
                entry + peb32::ENTRY_ENTRY_POINT as u64,
                base + 0x1A40,
            );
            self.machine
                .write_virtual_u32(root, entry + peb32::ENTRY_SIZE_OF_IMAGE as u64, *size);
            self.machine.write_virtual_u16(
                root,
                entry + peb32::ENTRY_LOAD_COUNT as u64,
                LOAD_COUNT,
            );
            if !name.is_empty() {
                let buffer = entry + NAME_OFFSET32;
                self.machine.write_virtual_u32(
                    root,
                    entry + peb32::ENTRY_BASE_NAME_BUFFER as u64,
                    buffer as u32,
                );
                self.machine.write_virtual(root, buffer, &utf16(name));
            }
        }
    }

    /// Share the kernel half of the kernel root with every user root.
    /// Call once all kernel-space memory is written.
    pub fn finish(mut self) -> Self {
        for &user_root in &self.user_roots {
            for slot in KERNEL_HALF..512 {
                let mut entry = [0u8; 8];
                self.machine
                    .memory
                    .read_raw(self.root + slot * ENTRY_SIZE, &mut entry)
                    .unwrap();
                self.machine
                    .memory
                    .write(user_root + slot * ENTRY_SIZE, &entry);
            }
        }
        self
    }

    pub fn memory_map(&self) -> MemoryMap {
        self.machine.memory_map()
    }

    fn relink(&mut self) {
        let apl = self.offsets.apl;
        let n = self.processes.len();
        for i in 0..n {
            let va = self.processes[i];
            let next = self.processes[(i + 1) % n];
            let prev = self.processes[(i + n - 1) % n];
            self.machine.write_virtual_u64(self.root, va + apl, next + apl);
            self.machine
                .write_virtual_u64(self.root, va + apl + 8, prev + apl);
        }
    }

    /// head -> links[0] -> ... -> head, with back links
    fn link_ring(&mut self, root: u64, head: u64, links: &[u64]) {
        let ring: Vec<u64> = std::iter::once(head).chain(links.iter().copied()).collect();
        let n = ring.len();
        for i in 0..n {
            self.machine
                .write_virtual_u64(root, ring[i], ring[(i + 1) % n]);
            self.machine
                .write_virtual_u64(root, ring[i] + 8, ring[(i + n - 1) % n]);
        }
    }

    fn link_ring32(&mut self, root: u64, head: u64, links: &[u64]) {
        let ring: Vec<u64> = std::iter::once(head).chain(links.iter().copied()).collect();
        let n = ring.len();
        for i in 0..n {
            self.machine
                .write_virtual_u32(root, ring[i], ring[(i + 1) % n] as u32);
            self.machine
                .write_virtual_u32(root, ring[i] + 4, ring[(i + n - 1) % n] as u32);
        }
    }
}

fn utf16(name: &str) -> Vec<u8> {
    name.encode_utf16().flat_map(|c| c.to_le_bytes()).collect()
}

//! Kernel process structure offsets per version

use serde::{Deserialize, Serialize};

/// Byte offsets into the kernel process object
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StructOffsets {
    /// Active-process list link; the pid sits 8 bytes before it
    pub apl: u64,
    pub image_file_name: u64,
    /// Zero when the version has no usable stack-count field
    pub stack_count: u64,
    pub dir_base: u64,
    pub peb: u64,
    pub virtual_size: u64,
    pub vad_root: u64,
}

const fn offsets(
    apl: u64,
    image_file_name: u64,
    stack_count: u64,
    peb: u64,
    virtual_size: u64,
    vad_root: u64,
) -> StructOffsets {
    StructOffsets {
        apl,
        image_file_name,
        stack_count,
        dir_base: 0x28,
        peb,
        virtual_size,
        vad_root,
    }
}

/// Builds a table row applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Builds {
    AtLeast(u32),
    Exactly(u32),
}

impl Builds {
    fn contains(self, build: u32) -> bool {
        match self {
            Self::AtLeast(min) => build >= min,
            Self::Exactly(exact) => build == exact,
        }
    }
}

/// `(version, builds, offsets)`; the last matching row wins
const OFFSET_TABLE: &[(u16, Builds, StructOffsets)] = &[
    (601, Builds::AtLeast(0), offsets(0x188, 0x2E0, 0, 0x338, 0, 0)),
    // SP1
    (601, Builds::Exactly(7601), offsets(0x188, 0x2D8, 0, 0x338, 0, 0)),
    (602, Builds::AtLeast(0), offsets(0x2E8, 0x438, 0, 0x338, 0, 0)),
    (603, Builds::AtLeast(0), offsets(0x2E8, 0x438, 0, 0x338, 0, 0)),
    (1000, Builds::AtLeast(0), offsets(0x2E8, 0x450, 0x23C, 0x3F8, 0x338, 0x628)),
    (1000, Builds::AtLeast(18362), offsets(0x2F0, 0x450, 0x23C, 0x3F8, 0x340, 0x658)),
    (1000, Builds::AtLeast(19041), offsets(0x448, 0x5A8, 0x348, 0x550, 0x498, 0x7D8)),
    (1000, Builds::AtLeast(26100), offsets(0x1D8, 0x338, 0x108, 0x2E0, 0x228, 0x558)),
];

impl StructOffsets {
    /// Offsets for a kernel version and build
    pub fn select(version: u16, build: u32) -> Option<Self> {
        OFFSET_TABLE
            .iter()
            .rev()
            .find(|(v, builds, _)| *v == version && builds.contains(build))
            .map(|(_, _, offsets)| *offsets)
    }

    /// Offset of the process id field
    pub fn pid(&self) -> u64 {
        self.apl.saturating_sub(crate::layout::process::PID_BEFORE_LINK)
    }
}

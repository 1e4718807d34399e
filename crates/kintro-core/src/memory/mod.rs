pub(crate) mod bytes;
mod guard;
pub mod map;
mod physical;

#[cfg(test)]
pub mod mock;

pub use guard::{Access, MemoryAccessGuard};
pub use map::{EfiDescriptorTable, MapQuery, MemoryMap, MemoryMapSource, MemoryRegion, RegionKind};
pub use physical::{DumpFile, PhysicalMemory, RawImage};

#[cfg(test)]
pub use mock::{MockMachine, MockPhysicalMemory};

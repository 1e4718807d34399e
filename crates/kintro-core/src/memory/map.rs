//! Boot-time snapshot of the physical memory map
//!
//! The firmware map is queried once, decoded by the descriptor size the
//! firmware reports, sorted by physical start and coalesced. Afterwards the
//! snapshot is immutable and answers "is this physical address backed".

use serde::{Deserialize, Serialize};
use strum::{Display, FromRepr, IntoStaticStr};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::layout::{descriptor, paging::PAGE_SIZE};
use crate::memory::bytes::{le_u32, le_u64};

/// Minimum number of populated regions a plausible firmware map has
pub const MIN_POPULATED_REGIONS: usize = 3;

#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    FromRepr,
    IntoStaticStr,
    Display,
)]
#[repr(u32)]
pub enum RegionKind {
    Reserved = 0,
    LoaderCode = 1,
    LoaderData = 2,
    BootServicesCode = 3,
    BootServicesData = 4,
    RuntimeServicesCode = 5,
    RuntimeServicesData = 6,
    Conventional = 7,
    Unusable = 8,
    AcpiReclaim = 9,
    AcpiNvs = 10,
    MemoryMappedIo = 11,
    MemoryMappedIoPortSpace = 12,
    PalCode = 13,
    Persistent = 14,
    Unaccepted = 15,
    /// OEM/OS-defined or unknown type value
    Other = 0x7FFF_FFFF,
}

impl RegionKind {
    pub fn from_raw(value: u32) -> Self {
        Self::from_repr(value).unwrap_or(Self::Other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryRegion {
    pub physical_start: u64,
    pub page_count: u64,
    pub kind: RegionKind,
}

impl MemoryRegion {
    pub fn new(physical_start: u64, page_count: u64, kind: RegionKind) -> Self {
        Self {
            physical_start,
            page_count,
            kind,
        }
    }

    /// Exclusive end address
    pub fn end(&self) -> u64 {
        self.physical_start
            .saturating_add(self.page_count.saturating_mul(PAGE_SIZE))
    }

    pub fn contains(&self, address: u64) -> bool {
        self.physical_start <= address && address < self.end()
    }

    pub fn is_populated(&self) -> bool {
        self.physical_start != 0 || self.page_count != 0
    }
}

/// Result of one firmware "get memory map" call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapQuery {
    /// The map was written to the buffer
    Complete {
        map_size: usize,
        descriptor_size: usize,
    },
    /// The buffer must grow to at least `required` bytes
    BufferTooSmall { required: usize },
    Failed(String),
}

/// Firmware memory map service
pub trait MemoryMapSource {
    fn query(&self, buffer: &mut [u8]) -> MapQuery;
}

/// A captured firmware descriptor table (raw bytes plus descriptor stride)
#[derive(Debug, Clone)]
pub struct EfiDescriptorTable {
    bytes: Vec<u8>,
    descriptor_size: usize,
}

impl EfiDescriptorTable {
    pub fn new(bytes: Vec<u8>, descriptor_size: usize) -> Self {
        Self {
            bytes,
            descriptor_size,
        }
    }
}

impl MemoryMapSource for EfiDescriptorTable {
    fn query(&self, buffer: &mut [u8]) -> MapQuery {
        if buffer.len() < self.bytes.len() {
            return MapQuery::BufferTooSmall {
                required: self.bytes.len(),
            };
        }
        buffer[..self.bytes.len()].copy_from_slice(&self.bytes);
        MapQuery::Complete {
            map_size: self.bytes.len(),
            descriptor_size: self.descriptor_size,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryMap {
    regions: Vec<MemoryRegion>,
}

impl MemoryMap {
    /// Query the firmware, decode, sanity-check and normalise the map.
    ///
    /// The buffer is grown to the size the firmware asks for, at most
    /// `attempts` times.
    pub fn build<S: MemoryMapSource + ?Sized>(source: &S, attempts: usize) -> Result<Self> {
        let mut buffer = Vec::new();

        for attempt in 1..=attempts {
            match source.query(&mut buffer) {
                MapQuery::Complete {
                    map_size,
                    descriptor_size,
                } => {
                    let table = &buffer[..map_size.min(buffer.len())];
                    let mut map = Self::decode(table, descriptor_size)?;

                    let populated = map.populated_count();
                    if populated < MIN_POPULATED_REGIONS {
                        return Err(Error::MemoryMapTooSmall { count: populated });
                    }

                    map.sort();
                    map.merge_adjacent();
                    info!(
                        "Memory map: {} regions ({} descriptors of {} bytes)",
                        map.len(),
                        populated,
                        descriptor_size
                    );
                    return Ok(map);
                }
                MapQuery::BufferTooSmall { required } => {
                    debug!(
                        "Memory map query {}: buffer too small ({} < {})",
                        attempt,
                        buffer.len(),
                        required
                    );
                    if required <= buffer.len() {
                        return Err(Error::MemoryMapQueryFailed(format!(
                            "firmware requested {} bytes but buffer already holds {}",
                            required,
                            buffer.len()
                        )));
                    }
                    buffer.resize(required, 0);
                }
                MapQuery::Failed(message) => return Err(Error::MemoryMapQueryFailed(message)),
            }
        }

        Err(Error::MemoryMapQueryFailed(format!(
            "buffer size did not converge after {} attempts",
            attempts
        )))
    }

    /// Normalise a caller-supplied region list (no population floor)
    pub fn from_regions(regions: Vec<MemoryRegion>) -> Self {
        let mut map = Self { regions };
        map.sort();
        map.merge_adjacent();
        map
    }

    fn decode(table: &[u8], descriptor_size: usize) -> Result<Self> {
        if descriptor_size < descriptor::MIN_SIZE {
            return Err(Error::MemoryMapQueryFailed(format!(
                "descriptor size {} is smaller than {}",
                descriptor_size,
                descriptor::MIN_SIZE
            )));
        }

        let regions = table
            .chunks_exact(descriptor_size)
            .filter_map(|entry| {
                Some(MemoryRegion {
                    kind: RegionKind::from_raw(le_u32(entry, descriptor::KIND)?),
                    physical_start: le_u64(entry, descriptor::PHYSICAL_START)?,
                    page_count: le_u64(entry, descriptor::PAGE_COUNT)?,
                })
            })
            .collect();

        Ok(Self { regions })
    }

    pub fn regions(&self) -> &[MemoryRegion] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    fn populated_count(&self) -> usize {
        self.regions.iter().filter(|r| r.is_populated()).count()
    }

    /// Whether the map looks like a real firmware map
    pub fn validate(&self) -> bool {
        self.populated_count() >= MIN_POPULATED_REGIONS
    }

    pub fn sort(&mut self) {
        self.regions.sort_by_key(|r| r.physical_start);
    }

    /// Coalesce physically contiguous regions of the same kind.
    ///
    /// Assumes the regions are sorted.
    pub fn merge_adjacent(&mut self) {
        self.regions.dedup_by(|next, prev| {
            if prev.kind == next.kind && prev.end() == next.physical_start {
                prev.page_count += next.page_count;
                true
            } else {
                false
            }
        });
    }

    /// Whether `address` lies inside some region. Zero is never valid.
    pub fn is_valid(&self, address: u64) -> bool {
        if address == 0 {
            return false;
        }

        self.regions
            .iter()
            .take_while(|r| r.physical_start <= address)
            .any(|r| r.contains(address))
    }

    pub fn total_pages(&self) -> u64 {
        self.regions.iter().map(|r| r.page_count).sum()
    }
}

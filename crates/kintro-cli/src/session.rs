//! Opening a physical memory image together with its memory map

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use kintro_core::layout::paging::PAGE_SIZE;
use kintro_core::{
    DumpFile, EfiDescriptorTable, EngineConfig, Introspector, MemoryMap, MemoryRegion, RegionKind,
};
use tracing::{debug, info, warn};

/// Where the memory image and its map come from
#[derive(Debug, Clone, Default)]
pub struct SessionArgs {
    pub image: Option<PathBuf>,
    pub memmap: Option<PathBuf>,
    pub efi_map: Option<PathBuf>,
    pub descriptor_size: usize,
}

/// Load the engine configuration, falling back to defaults
pub fn load_config(path: &Path) -> EngineConfig {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config at {:?}, using defaults", path);
            return EngineConfig::default();
        }
        Err(e) => {
            warn!("Failed to read config {:?}: {}, using defaults", path, e);
            return EngineConfig::default();
        }
    };

    match toml::from_str(&text) {
        Ok(config) => {
            info!("Loaded config from {:?}", path);
            config
        }
        Err(e) => {
            warn!("Failed to parse config {:?}: {}, using defaults", path, e);
            EngineConfig::default()
        }
    }
}

/// Memory map from JSON, from a firmware descriptor table, or one region
/// covering the whole image
pub fn load_memory_map(
    args: &SessionArgs,
    config: &EngineConfig,
    image_size: u64,
) -> Result<MemoryMap> {
    if let Some(path) = &args.memmap {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read memory map {:?}", path))?;
        let regions: Vec<MemoryRegion> = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse memory map {:?}", path))?;
        return Ok(MemoryMap::from_regions(regions));
    }

    if let Some(path) = &args.efi_map {
        let bytes =
            fs::read(path).with_context(|| format!("Failed to read descriptor table {:?}", path))?;
        let table = EfiDescriptorTable::new(bytes, args.descriptor_size);
        return Ok(MemoryMap::build(&table, config.map_query_attempts)?);
    }

    debug!("No memory map given, treating the whole image as conventional memory");
    Ok(MemoryMap::from_regions(vec![MemoryRegion::new(
        0,
        image_size / PAGE_SIZE,
        RegionKind::Conventional,
    )]))
}

pub fn open_image(args: &SessionArgs) -> Result<DumpFile> {
    let path = args
        .image
        .as_ref()
        .ok_or_else(|| anyhow!("No memory image given (use --image or KINTRO_IMAGE)"))?;
    DumpFile::open(path).with_context(|| format!("Failed to open memory image {:?}", path))
}

/// Open the image and its map as an engine
pub fn open(args: &SessionArgs, config: EngineConfig) -> Result<Introspector<DumpFile>> {
    let image = open_image(args)?;
    let map = load_memory_map(args, &config, image.size())?;
    if map.total_pages() == 0 {
        warn!("Memory map is empty; every physical read will be rejected");
    }
    Ok(Introspector::with_config(image, map, config))
}

//! The introspection engine as one owned value.
//!
//! [`Introspector`] holds everything that outlives a single call: the
//! physical memory, the memory map snapshot, the translation cache and the
//! kernel context. Mutation goes through `&mut self`, so a host entered on
//! several processors must serialize access itself (or keep one engine per
//! processor).
//!
//! ## Example
//!
//! ```ignore
//! use kintro_core::{DumpFile, EngineConfig, Introspector, MemoryMap};
//!
//! let memory = DumpFile::open("memory.raw")?;
//! let map = MemoryMap::from_regions(regions);
//! let mut engine = Introspector::with_config(memory, map, EngineConfig::default());
//!
//! let root = engine.find_process("game.exe")?;
//! let module = engine.dump_module("game.exe", "game.exe")?;
//! ```

use tracing::{info, warn};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::kernel::{KernelContext, ProcessRecord, bootstrap_kernel_context};
use crate::memory::{MemoryAccessGuard, MemoryMap, PhysicalMemory};
use crate::scan::SignatureScanner;
use crate::translate::{AddressTranslator, TranslationCache};
use crate::walker::{ModuleRecord, ModuleWalker, ProcessWalker};

pub struct Introspector<P> {
    memory: P,
    map: MemoryMap,
    cache: TranslationCache,
    /// Root the cached translations belong to
    cache_root: u64,
    context: Option<KernelContext>,
    config: EngineConfig,
}

impl<P: PhysicalMemory> Introspector<P> {
    pub fn new(memory: P, map: MemoryMap) -> Self {
        Self::with_config(memory, map, EngineConfig::default())
    }

    pub fn with_config(memory: P, map: MemoryMap, config: EngineConfig) -> Self {
        info!(
            "Introspector ready: {} regions, {} pages",
            map.len(),
            map.total_pages()
        );
        Self {
            memory,
            map,
            cache: TranslationCache::new(config.cache_capacity),
            cache_root: 0,
            context: None,
            config,
        }
    }

    pub fn memory(&self) -> &P {
        &self.memory
    }

    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn guard(&self) -> MemoryAccessGuard<'_, P> {
        MemoryAccessGuard::new(&self.memory, &self.map)
    }

    pub fn translator(&self) -> AddressTranslator<'_, P> {
        AddressTranslator::new(self.guard())
    }

    pub fn scanner(&self) -> SignatureScanner<'_, P> {
        SignatureScanner::new(self.translator())
    }

    pub fn process_walker(&self) -> ProcessWalker<'_, P> {
        ProcessWalker::new(self.translator(), &self.config)
    }

    pub fn module_walker(&self) -> ModuleWalker<'_, P> {
        ModuleWalker::new(self.translator(), &self.config)
    }

    /// Current kernel context, if one has been built
    pub fn context(&self) -> Option<&KernelContext> {
        self.context.as_ref()
    }

    /// Install a previously built context
    pub fn set_context(&mut self, context: KernelContext) {
        self.context = Some(context);
    }

    /// Drop the kernel context; the next walk bootstraps again
    pub fn invalidate_context(&mut self) {
        self.context = None;
    }

    fn bootstrap(&self) -> Result<KernelContext> {
        bootstrap_kernel_context(self.guard(), &self.config)
    }

    /// Return the kernel context, bootstrapping it first when absent
    pub fn ensure_context(&mut self) -> Result<&KernelContext> {
        let context = match self.context.take() {
            Some(context) => context,
            None => self.bootstrap()?,
        };
        Ok(self.context.insert(context))
    }

    /// Run `op` against the kernel context.
    ///
    /// When the walk misses the anchor process the context is rebuilt and
    /// `op` runs once more.
    fn with_context<T>(&mut self, op: impl Fn(&Self, &KernelContext) -> Result<T>) -> Result<T> {
        let context = match self.context.take() {
            Some(context) => context,
            None => self.bootstrap()?,
        };

        match op(self, &context) {
            Err(Error::AnchorProcessMissing) => {
                warn!("Anchor process not seen, rebuilding kernel context");
                let context = self.bootstrap()?;
                let result = op(self, &context);
                self.context = Some(context);
                result
            }
            result => {
                self.context = Some(context);
                result
            }
        }
    }

    /// Page-table root of the process named `name`
    pub fn find_process(&mut self, name: &str) -> Result<u64> {
        self.with_context(|engine, ctx| engine.process_walker().find_process(ctx, name))
    }

    pub fn dump_process(&mut self, name: &str) -> Result<ProcessRecord> {
        self.with_context(|engine, ctx| engine.process_walker().dump_process(ctx, name))
    }

    pub fn list_processes(&mut self) -> Result<Vec<ProcessRecord>> {
        self.with_context(|engine, ctx| engine.process_walker().list_processes(ctx))
    }

    /// Find `module` in the loader lists of the process named `process`
    pub fn dump_module(&mut self, process: &str, module: &str) -> Result<ModuleRecord> {
        self.with_context(|engine, ctx| {
            let record = engine.process_walker().dump_process(ctx, process)?;
            engine.module_walker().dump_module(ctx, &record, module)
        })
    }

    pub fn dump_module_names(&mut self, process: &str) -> Result<Vec<String>> {
        self.with_context(|engine, ctx| {
            let record = engine.process_walker().dump_process(ctx, process)?;
            engine.module_walker().dump_module_names(ctx, &record)
        })
    }

    /// Checked translation through the engine's cache.
    ///
    /// The cache holds translations for one root at a time and is reset
    /// when `root` differs from the last one used.
    pub fn translate_cached(&mut self, va: u64, root: u64) -> Option<u64> {
        self.switch_cache_root(root);
        let translator = AddressTranslator::new(MemoryAccessGuard::new(&self.memory, &self.map));
        translator.translate_with_cache(&mut self.cache, va, root)
    }

    /// Checked virtual read through the engine's cache
    pub fn read_virtual_cached(&mut self, va: u64, root: u64, dest: &mut [u8]) -> Result<()> {
        self.switch_cache_root(root);
        let translator = AddressTranslator::new(MemoryAccessGuard::new(&self.memory, &self.map));
        translator.read_virtual_cached(&mut self.cache, va, root, dest)
    }

    fn switch_cache_root(&mut self, root: u64) {
        if root != self.cache_root {
            self.cache.reset();
            self.cache_root = root;
        }
    }

    pub fn reset_cache(&mut self) {
        self.cache.reset();
    }

    pub fn cache(&self) -> &TranslationCache {
        &self.cache
    }
}

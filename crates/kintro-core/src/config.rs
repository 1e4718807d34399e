//! Engine configuration
//!
//! Every loop in the engine has an explicit ceiling; the ceilings and the
//! kernel search window are collected here so hosts can tune them.

use serde::{Deserialize, Serialize};

/// Default translation cache capacity
pub const DEFAULT_CACHE_CAPACITY: usize = 255;

/// Default ceiling on process list nodes visited per walk
pub const DEFAULT_PROCESS_WALK_LIMIT: usize = 4096;

/// Default ceiling on loader list nodes visited per walk
pub const DEFAULT_MODULE_WALK_LIMIT: usize = 1024;

/// Default maximum number of module names collected per process
pub const DEFAULT_MODULE_NAME_CAPACITY: usize = 127;

/// Last page probed for the low-memory start block
pub const DEFAULT_LOW_STUB_LIMIT: u64 = 0x10_0000;

/// Distance above the kernel entry point where the image search starts
pub const DEFAULT_KERNEL_SEARCH_AHEAD: u64 = 0x1000_0000;

/// Distance below the kernel entry point where the image search stops
pub const DEFAULT_KERNEL_SEARCH_BEHIND: u64 = 0x2000_0000;

/// Number of firmware memory map queries before giving up
pub const DEFAULT_MAP_QUERY_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cache_capacity: usize,
    pub process_walk_limit: usize,
    pub module_walk_limit: usize,
    pub module_name_capacity: usize,
    pub low_stub_limit: u64,
    pub kernel_search_ahead: u64,
    pub kernel_search_behind: u64,
    pub map_query_attempts: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_capacity: DEFAULT_CACHE_CAPACITY,
            process_walk_limit: DEFAULT_PROCESS_WALK_LIMIT,
            module_walk_limit: DEFAULT_MODULE_WALK_LIMIT,
            module_name_capacity: DEFAULT_MODULE_NAME_CAPACITY,
            low_stub_limit: DEFAULT_LOW_STUB_LIMIT,
            kernel_search_ahead: DEFAULT_KERNEL_SEARCH_AHEAD,
            kernel_search_behind: DEFAULT_KERNEL_SEARCH_BEHIND,
            map_query_attempts: DEFAULT_MAP_QUERY_ATTEMPTS,
        }
    }
}

impl EngineConfig {
    /// Create a builder for EngineConfig
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::default()
    }
}

/// Builder for EngineConfig
#[derive(Debug, Clone, Default)]
pub struct EngineConfigBuilder {
    cache_capacity: Option<usize>,
    process_walk_limit: Option<usize>,
    module_walk_limit: Option<usize>,
    module_name_capacity: Option<usize>,
    low_stub_limit: Option<u64>,
    kernel_search_ahead: Option<u64>,
    kernel_search_behind: Option<u64>,
    map_query_attempts: Option<usize>,
}

impl EngineConfigBuilder {
    /// Set the number of translation cache slots
    pub fn cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = Some(capacity);
        self
    }

    /// Set the process list step ceiling
    pub fn process_walk_limit(mut self, limit: usize) -> Self {
        self.process_walk_limit = Some(limit);
        self
    }

    /// Set the loader list step ceiling
    pub fn module_walk_limit(mut self, limit: usize) -> Self {
        self.module_walk_limit = Some(limit);
        self
    }

    pub fn module_name_capacity(mut self, capacity: usize) -> Self {
        self.module_name_capacity = Some(capacity);
        self
    }

    pub fn low_stub_limit(mut self, limit: u64) -> Self {
        self.low_stub_limit = Some(limit);
        self
    }

    /// Set the kernel image search window around the entry point
    pub fn kernel_search_window(mut self, ahead: u64, behind: u64) -> Self {
        self.kernel_search_ahead = Some(ahead);
        self.kernel_search_behind = Some(behind);
        self
    }

    pub fn map_query_attempts(mut self, attempts: usize) -> Self {
        self.map_query_attempts = Some(attempts);
        self
    }

    /// Build the configuration
    pub fn build(self) -> EngineConfig {
        let default = EngineConfig::default();
        EngineConfig {
            cache_capacity: self.cache_capacity.unwrap_or(default.cache_capacity),
            process_walk_limit: self
                .process_walk_limit
                .unwrap_or(default.process_walk_limit),
            module_walk_limit: self.module_walk_limit.unwrap_or(default.module_walk_limit),
            module_name_capacity: self
                .module_name_capacity
                .unwrap_or(default.module_name_capacity),
            low_stub_limit: self.low_stub_limit.unwrap_or(default.low_stub_limit),
            kernel_search_ahead: self
                .kernel_search_ahead
                .unwrap_or(default.kernel_search_ahead),
            kernel_search_behind: self
                .kernel_search_behind
                .unwrap_or(default.kernel_search_behind),
            map_query_attempts: self
                .map_query_attempts
                .unwrap_or(default.map_query_attempts),
        }
    }
}

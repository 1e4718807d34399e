use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Address is zero")]
    ZeroAddress,

    #[error("Length is zero")]
    ZeroLength,

    #[error("Physical address {address:#x} is outside every memory map region")]
    AddressNotMapped { address: u64 },

    #[error("Failed to translate virtual address {address:#x} with root {root:#x}")]
    TranslationFailed { address: u64, root: u64 },

    #[error("Failed to read physical memory at address {address:#x}: {message}")]
    MemoryReadFailed { address: u64, message: String },

    #[error("Memory map query failed: {0}")]
    MemoryMapQueryFailed(String),

    #[error("Memory map has too few populated regions: {count}")]
    MemoryMapTooSmall { count: usize },

    #[error("Invalid pattern: {0}")]
    InvalidPattern(String),

    #[error("Invalid image at {address:#x}: {message}")]
    InvalidImage { address: u64, message: String },

    #[error("Export not found: {0}")]
    ExportNotFound(String),

    #[error("Signature not found: {0}")]
    SignatureNotFound(String),

    #[error("Unsupported kernel: version {version}, build {build}")]
    UnsupportedKernel { version: u16, build: u32 },

    #[error("Kernel bootstrap failed at {stage}: {message}")]
    BootstrapFailed {
        stage: &'static str,
        message: String,
    },

    #[error("Process not found: {0}")]
    ProcessNotFound(String),

    #[error("Module not found: {0}")]
    ModuleNotFound(String),

    #[error("Environment block of process {pid} is unavailable")]
    EnvironmentBlockUnavailable { pid: u64 },

    #[error("Anchor process (pid 4) not observed during process walk")]
    AnchorProcessMissing,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is an expected "not found (yet)" outcome rather than a fault
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ProcessNotFound(_)
            | Error::ModuleNotFound(_)
            | Error::ExportNotFound(_)
            | Error::SignatureNotFound(_)
            | Error::EnvironmentBlockUnavailable { .. } => true,
            Error::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    pub(crate) fn bootstrap(stage: &'static str, message: impl Into<String>) -> Self {
        Error::BootstrapFailed {
            stage,
            message: message.into(),
        }
    }
}

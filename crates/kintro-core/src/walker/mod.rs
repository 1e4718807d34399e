//! Process and module enumeration over the kernel's live lists

pub mod list;
mod module;
mod process;

pub use list::CircularList;
pub use module::{
    EnvironmentBlock, LoaderLayout, ModuleRecord, ModuleScan, ModuleWalker, decode_module_name,
};
pub use process::{ProcessWalker, image_name_matches};

//! CLI command implementations.
//!
//! This module contains the implementation of each CLI command.

pub mod bootstrap;
pub mod hex_utils;
pub mod hexdump;
pub mod memmap;
pub mod modules;
pub mod ps;
pub mod scan;
pub mod translate;

//! Checker-visible configuration
//!
//! Owned by the driver, consulted read-only during checking. Argument
//! parsing and config-file loading live outside this crate.

use serde::{Deserialize, Serialize};

/// Compilation target; selects which backend-specific lowering applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Target {
    /// Native assembly via fasm
    #[default]
    FasmX86_64Linux,
    /// WebAssembly text, 64-bit memory ops
    Wat64,
}

/// Feature toggles read by the checker
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub target: Target,
    /// Emit runtime guards (array bounds, null pointers)
    pub re_enabled: bool,
    /// Struct packing may call an externally provided allocator
    pub struct_malloc: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            target: Target::default(),
            re_enabled: true,
            struct_malloc: true,
        }
    }
}

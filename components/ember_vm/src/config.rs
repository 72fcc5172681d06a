//! VM construction parameters.

use serde::{Deserialize, Serialize};

/// Tunable limits and feature switches, fixed at VM construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VmConfig {
    /// Operand stack capacity in slots
    pub stack_size: usize,
    /// Call frame stack capacity
    pub frame_stack_size: usize,
    /// Allocated bytes that trigger a collection
    pub gc_threshold: usize,
    /// Call count at which a function becomes a compile candidate
    pub jit_threshold: u32,
    /// Whether hot functions are handed to the JIT backend
    pub enable_jit: bool,
    /// Whether per-opcode execution counts and times are recorded
    pub enable_profiling: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_size: 8192,
            frame_stack_size: 256,
            gc_threshold: 1024 * 1024,
            jit_threshold: 100,
            enable_jit: true,
            enable_profiling: false,
        }
    }
}

//! VM configuration.
//!
//! The unified stack's fixed capacity, defaulting to 2048 slots. Mirrors the
//! builder shape of the compiler crate's configuration types, even though
//! the VM only has a single knob today.

#[derive(Debug, Clone)]
pub struct VmConfig {
    pub(crate) stack_capacity: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            stack_capacity: 2048,
        }
    }
}

impl VmConfig {
    pub fn new() -> Self {
        VmConfig::default()
    }

    pub fn with_stack_capacity(mut self, capacity: usize) -> Self {
        self.stack_capacity = capacity;
        self
    }
}

//! Channel configuration for executor communication

/// Channel buffer configuration for executor communication
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// Results channel buffer size (workers -> executor)
    pub results_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            results_buffer: 1_024,
        }
    }
}

impl ChannelConfig {
    /// Create a new channel config with a custom results buffer size
    pub fn with_results_buffer(mut self, size: usize) -> Self {
        self.results_buffer = size.max(1);
        self
    }
}

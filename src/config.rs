//! Configuration shared by the medium adapters and the primitive codec.

/// Default buffer size for path-based readers and writers (64KB).
pub const DEFAULT_BUFFER_SIZE: usize = 65536;

/// Default upper bound on the byte size of a single length-prefixed sequence.
pub const DEFAULT_MAX_ALLOC_BYTES: u64 = 1 << 40;

/// I/O configuration.
///
/// `max_alloc_bytes` is not part of the wire format: it only decides how large
/// a declared sequence may be before the decoder gives up on it as corrupt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IoConfig {
    /// Buffer size for file-backed adapters.
    pub buffer_size: usize,

    /// Largest sequence (in bytes) a decoder will accept.
    pub max_alloc_bytes: u64,
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_alloc_bytes: DEFAULT_MAX_ALLOC_BYTES,
        }
    }
}

impl IoConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the buffer size used by file-backed adapters.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Set the allocation guard for length-prefixed sequences.
    pub fn with_max_alloc_bytes(mut self, max_alloc_bytes: u64) -> Self {
        self.max_alloc_bytes = max_alloc_bytes;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_config_default() {
        let config = IoConfig::default();

        assert_eq!(config.buffer_size, 65536);
        assert_eq!(config.max_alloc_bytes, 1 << 40);
    }

    #[test]
    fn test_io_config_builders() {
        let config = IoConfig::new()
            .with_buffer_size(0)
            .with_max_alloc_bytes(1024);

        assert_eq!(config.buffer_size, 1);
        assert_eq!(config.max_alloc_bytes, 1024);
    }
}

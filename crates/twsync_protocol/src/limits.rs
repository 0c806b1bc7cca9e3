//! Size limits shared by the encoder and decoder.

/// Size of the big-endian length prefix in front of every message.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum size of one encoded message, prefix included.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Default maximum number of records in one message body.
pub const DEFAULT_MAX_RECORDS: usize = 10_000;

/// Limits enforced symmetrically when encoding and decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CodecLimits {
    /// Maximum encoded message size in bytes, including the length prefix.
    pub max_message_size: usize,
    /// Maximum number of records in a message body.
    pub max_records: usize,
}

impl CodecLimits {
    /// Creates limits with the given bounds.
    ///
    /// The message size is clamped to what the 32-bit prefix can describe.
    pub fn new(max_message_size: usize, max_records: usize) -> Self {
        Self {
            max_message_size: max_message_size.min(u32::MAX as usize),
            max_records,
        }
    }

    /// Sets the maximum message size.
    pub fn with_max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size.min(u32::MAX as usize);
        self
    }

    /// Sets the maximum record count.
    pub fn with_max_records(mut self, count: usize) -> Self {
        self.max_records = count;
        self
    }
}

impl Default for CodecLimits {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_MESSAGE_SIZE, DEFAULT_MAX_RECORDS)
    }
}

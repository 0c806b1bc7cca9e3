//! Configuration for sync sessions.

use std::time::Duration;
use twsync_protocol::{Account, CodecLimits, DEFAULT_MAX_RECORDS};
use twsync_tls::{ChannelConfig, ServerAddress, ValidatorConfig, DEFAULT_PORT};
use uuid::Uuid;

/// Default number of pending records sent in one round.
pub const DEFAULT_MAX_BATCH: usize = 500;

/// Configuration for sync rounds against one server account.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Server to connect to.
    pub server: ServerAddress,
    /// Account identity sent with every request.
    pub account: Account,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Secure channel options.
    pub channel: ChannelConfig,
    /// Server certificate checks.
    pub validator: ValidatorConfig,
    /// Maximum pending records sent in one round.
    pub max_batch: usize,
    /// Maximum records accepted in one response.
    pub max_inbound_records: usize,
}

impl SyncConfig {
    /// Creates a configuration for `account` on `server`.
    ///
    /// The server host is used as the TLS server name.
    pub fn new(server: ServerAddress, account: Account) -> Self {
        let channel = ChannelConfig::new(server.host.clone());
        Self {
            server,
            account,
            connect_timeout: Duration::from_secs(10),
            channel,
            validator: ValidatorConfig::default(),
            max_batch: DEFAULT_MAX_BATCH,
            max_inbound_records: DEFAULT_MAX_RECORDS,
        }
    }

    /// Sets the TCP connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Replaces the channel options.
    pub fn with_channel(mut self, channel: ChannelConfig) -> Self {
        self.channel = channel;
        self
    }

    /// Replaces the certificate checks.
    pub fn with_validator(mut self, validator: ValidatorConfig) -> Self {
        self.validator = validator;
        self
    }

    /// Sets the maximum pending records per round.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Sets the maximum records accepted per response.
    ///
    /// The channel's codec limit is raised to match if it is lower.
    pub fn with_max_inbound_records(mut self, limit: usize) -> Self {
        self.max_inbound_records = limit;
        if self.channel.limits.max_records < limit {
            self.channel.limits = self.channel.limits.with_max_records(limit);
        }
        self
    }

    /// Sets the codec limits of the channel.
    pub fn with_limits(mut self, limits: CodecLimits) -> Self {
        self.channel.limits = limits;
        self
    }

    /// Sets the handshake, read and write timeouts of the channel.
    pub fn with_timeouts(mut self, handshake: Duration, read: Duration, write: Duration) -> Self {
        self.channel = self
            .channel
            .with_handshake_timeout(handshake)
            .with_read_timeout(read)
            .with_write_timeout(write);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new(
            ServerAddress::new("localhost", DEFAULT_PORT),
            Account::new("", "", Uuid::nil()),
        )
    }
}

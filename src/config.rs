//! Per-connection parameters.

/// Default bit rate of the serial channel.
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default number of transmissions of a frame before giving up.
pub const DEFAULT_MAX_RETRANSMISSIONS: usize = 3;

/// Default time to wait for a reply to each transmission.
pub const DEFAULT_TIMEOUT_MS: u32 = 3000;

/// Default longest single blocking read on the serial device.
pub const DEFAULT_POLL_INTERVAL_MS: u32 = 100;

/// Link configuration, fixed for the lifetime of a connection.
///
/// ```rust
/// use arqlink::LinkConfig;
///
/// let config = LinkConfig::new("/dev/ttyS0")
///     .with_baud_rate(38400)
///     .with_timeout_ms(1000);
///
/// assert_eq!(config.channel, "/dev/ttyS0");
/// assert_eq!(config.max_retransmissions, 3);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct LinkConfig<'a> {
    /// Name of the serial channel, e.g. `/dev/ttyS0`.
    pub channel: &'a str,
    /// Bit rate of the serial channel.
    #[cfg_attr(feature = "serde", serde(default = "default_baud_rate"))]
    pub baud_rate: u32,
    /// How many times a frame is transmitted before the operation fails.
    #[cfg_attr(feature = "serde", serde(default = "default_max_retransmissions"))]
    pub max_retransmissions: usize,
    /// How long to wait for a reply after each transmission.
    #[cfg_attr(feature = "serde", serde(default = "default_timeout_ms"))]
    pub timeout_ms: u32,
    /// Longest single blocking read on the serial device. Bounds how late an
    /// expired timeout can be noticed.
    #[cfg_attr(feature = "serde", serde(default = "default_poll_interval_ms"))]
    pub poll_interval_ms: u32,
}

impl<'a> LinkConfig<'a> {
    /// Create a configuration for `channel` with default parameters.
    pub const fn new(channel: &'a str) -> Self {
        Self {
            channel,
            baud_rate: DEFAULT_BAUD_RATE,
            max_retransmissions: DEFAULT_MAX_RETRANSMISSIONS,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
        }
    }

    pub const fn with_baud_rate(mut self, baud_rate: u32) -> Self {
        self.baud_rate = baud_rate;
        self
    }

    pub const fn with_max_retransmissions(mut self, max_retransmissions: usize) -> Self {
        self.max_retransmissions = max_retransmissions;
        self
    }

    pub const fn with_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub const fn with_poll_interval_ms(mut self, poll_interval_ms: u32) -> Self {
        self.poll_interval_ms = poll_interval_ms;
        self
    }
}

#[cfg(feature = "serde")]
const fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

#[cfg(feature = "serde")]
const fn default_max_retransmissions() -> usize {
    DEFAULT_MAX_RETRANSMISSIONS
}

#[cfg(feature = "serde")]
const fn default_timeout_ms() -> u32 {
    DEFAULT_TIMEOUT_MS
}

#[cfg(feature = "serde")]
const fn default_poll_interval_ms() -> u32 {
    DEFAULT_POLL_INTERVAL_MS
}

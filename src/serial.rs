//! The byte transport underneath the link layer.
//!
//! The link layer never touches the physical medium itself. The client
//! provides a type implementing [`Serial`], which reads one byte at a time
//! with a bounded wait and writes bytes out. Opening a port by name is
//! optional and described by [`SerialOpen`].

/// Enumeration of possible serial device errors.
#[derive(Debug, PartialEq, Eq)]
pub enum SerialError<RE, WE> {
    /// Error occurred during serial read.
    ReadError(RE),
    /// Error occurred during serial write.
    WriteError(WE),
    /// No byte arrived within the given timeout. The link layer treats this
    /// as "nothing available yet" and polls again, so implementations MUST
    /// map their own timeout condition to this variant.
    Timeout,
}

/// A serial device.
pub trait Serial {
    /// Error type reported by reads.
    type ReadError;
    /// Error type reported by writes.
    type WriteError;

    /// Read a byte, waiting at most `timeout_ms` milliseconds for it.
    ///
    /// # Returns
    /// - `Ok(u8)`: The byte read.
    /// - [`Err(SerialError::Timeout)`](SerialError): No byte arrived in time.
    /// - `Err(SerialError)`: The device failed.
    fn read_byte_with_timeout(
        &mut self,
        timeout_ms: u32,
    ) -> Result<u8, SerialError<Self::ReadError, Self::WriteError>>;

    /// Write a byte.
    fn write_byte(
        &mut self,
        byte: u8,
    ) -> Result<(), SerialError<Self::ReadError, Self::WriteError>>;

    /// Write all given bytes and return how many were written.
    fn write_bytes(
        &mut self,
        bytes: &[u8],
    ) -> Result<usize, SerialError<Self::ReadError, Self::WriteError>> {
        for &byte in bytes {
            self.write_byte(byte)?;
        }
        Ok(bytes.len())
    }

    /// Release the device. Called exactly once when a connection is torn
    /// down, whether or not the peer confirmed the teardown.
    fn close(&mut self) -> Result<(), SerialError<Self::ReadError, Self::WriteError>> {
        Ok(())
    }
}

/// A serial device that can be opened by channel name and bit rate.
pub trait SerialOpen: Serial + Sized {
    /// Error type reported when the channel cannot be opened.
    type OpenError: core::fmt::Debug;

    /// Open the channel.
    fn open(channel: &str, baud_rate: u32) -> Result<Self, Self::OpenError>;
}

//! Implementation of the link layer plumbing. The link sits between the
//! connection logic and the serial device: it writes encoded frames out, and
//! feeds incoming bytes through a [`FrameDecoder`] until a whole frame
//! arrives.
//!
//! Waiting is bounded in two ways. When the retransmission countdown is
//! armed, [`Link::receive_frame`] gives up with [`LinkError::Timeout`] once it
//! fires. When it is not armed, the link waits indefinitely, but never blocks
//! on the serial device for longer than the poll interval at a time, so a
//! countdown armed later is always observed promptly.
//!
//! Specifically,
//!
//! - Malformed frames are dropped here and never reach the caller.
//! - An information frame that fails its checksum is reported as
//!   [`LinkError::Clobbered`], since the receiver must answer it with REJ.
//! - Decoder progress survives across calls, so a frame that straddles a
//!   poll interval is not lost.

use crate::{
    frame::{
        encode_control, encode_information, Control, Frame, FrameDecoder, FrameError, Role,
        Sequence,
    },
    serial::{Serial, SerialError},
    timer::{RetransmitTimer, Timer},
};

/// Enumeration of possible link layer errors.
#[derive(Debug)]
pub(crate) enum LinkError<RE, WE> {
    /// Error occurred during serial read.
    SerialReadErr(RE),
    /// Error occurred during serial write.
    SerialWriteErr(WE),
    /// The retransmission countdown fired.
    Timeout,
    /// Received an information frame with a bad payload checksum.
    Clobbered { origin: Role, seq: Sequence },
}

/// Implement conversion from [`SerialError`] to [`LinkError`].
impl<RE, WE> From<SerialError<RE, WE>> for LinkError<RE, WE> {
    fn from(se: SerialError<RE, WE>) -> Self {
        match se {
            SerialError::ReadError(e) => LinkError::SerialReadErr(e),
            SerialError::WriteError(e) => LinkError::SerialWriteErr(e),
            SerialError::Timeout => LinkError::Timeout,
        }
    }
}

/// Waiting for a frame can end with the countdown firing, which the callers
/// treat as "try again" rather than as a failure. Convert
/// `Err(LinkError::Timeout)` into `Ok(None)` and wrap every other success in
/// `Some`.
pub(crate) trait TolerateTimeout<T, RE, WE> {
    fn tolerate_timeout(self) -> Result<Option<T>, LinkError<RE, WE>>;
}

impl<T, RE, WE> TolerateTimeout<T, RE, WE> for Result<T, LinkError<RE, WE>> {
    fn tolerate_timeout(self) -> Result<Option<T>, LinkError<RE, WE>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(LinkError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// The struct representing the link layer.
///
/// # Generic Parameters
/// - `N`: The largest payload an information frame may carry.
pub(crate) struct Link<S, T, const N: usize>
where
    S: Serial,
    T: Timer,
{
    serial: S,
    timer: T,
    retransmit: RetransmitTimer,
    decoder: FrameDecoder<N>,
    poll_interval_ms: u32,
}

impl<S, T, const N: usize> Link<S, T, N>
where
    S: Serial,
    T: Timer,
{
    /// Create a new link layer instance.
    ///
    /// # Parameters
    /// - `timeout_ms`: Duration of the retransmission countdown.
    /// - `poll_interval_ms`: Longest single wait on the serial device.
    pub(crate) const fn new(serial: S, timer: T, timeout_ms: u32, poll_interval_ms: u32) -> Self {
        Self {
            serial,
            timer,
            retransmit: RetransmitTimer::new(timeout_ms),
            decoder: FrameDecoder::new(),
            poll_interval_ms: if poll_interval_ms == 0 { 1 } else { poll_interval_ms },
        }
    }

    /// Send a control frame.
    pub(crate) fn send_control(
        &mut self,
        origin: Role,
        control: Control,
    ) -> Result<(), LinkError<S::ReadError, S::WriteError>> {
        self.serial.write_bytes(&encode_control(origin, control))?;
        Ok(())
    }

    /// Send an information frame, escaping on the fly.
    pub(crate) fn send_information(
        &mut self,
        origin: Role,
        seq: Sequence,
        payload: &[u8],
    ) -> Result<(), LinkError<S::ReadError, S::WriteError>> {
        for byte in encode_information(origin, seq, payload) {
            self.serial.write_byte(byte)?;
        }
        Ok(())
    }

    /// Start, or restart, the retransmission countdown.
    pub(crate) fn arm_timer(&mut self) {
        self.retransmit.arm(&mut self.timer);
    }

    /// Stop the retransmission countdown so that the next receive waits
    /// indefinitely.
    pub(crate) fn disarm_timer(&mut self) {
        self.retransmit.disarm();
    }

    /// Receive the next well-formed frame.
    ///
    /// # Returns
    /// - `Ok(Frame)`: A frame arrived. For information frames the payload can
    ///   be fetched with [`payload`](Self::payload).
    /// - [`Err(LinkError::Timeout)`](LinkError): The countdown was armed and
    ///   fired first.
    /// - [`Err(LinkError::Clobbered)`](LinkError): An information frame
    ///   arrived with a bad checksum.
    /// - `Err(LinkError)`: The serial device failed.
    pub(crate) fn receive_frame(
        &mut self,
    ) -> Result<Frame, LinkError<S::ReadError, S::WriteError>> {
        loop {
            let wait_ms = if self.retransmit.is_armed() {
                self.retransmit
                    .remaining(&mut self.timer)
                    .ok_or(LinkError::Timeout)?
                    .min(self.poll_interval_ms)
            } else {
                self.poll_interval_ms
            };

            let byte = match self.serial.read_byte_with_timeout(wait_ms) {
                Ok(byte) => byte,
                // Nothing arrived yet. Check the countdown again.
                Err(SerialError::Timeout) => continue,
                Err(e) => return Err(e.into()),
            };

            match self.decoder.feed(byte) {
                Ok(Some(frame)) => return Ok(frame),
                Ok(None) => {}
                Err(FrameError::Malformed) => log::trace!("dropped malformed frame"),
                Err(FrameError::Checksum { origin, seq }) => {
                    return Err(LinkError::Clobbered { origin, seq })
                }
            }
        }
    }

    /// Payload of the last information frame returned by
    /// [`receive_frame`](Self::receive_frame).
    pub(crate) fn payload(&self, len: usize) -> &[u8] {
        self.decoder.payload(len)
    }

    /// Release the serial device.
    pub(crate) fn close(&mut self) -> Result<(), LinkError<S::ReadError, S::WriteError>> {
        self.serial.close()?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn serial_mut(&mut self) -> &mut S {
        &mut self.serial
    }
}

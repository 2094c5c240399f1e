//! Stop-and-wait data transfer. The figure below outlines one block moving
//! from the sender to the receiver, including a lost acknowledgement.
//!
//! ```plain
//!          |                                  |
//!   send() |--------I(Ns=0) "block A"-------->| receive() returns "block A"
//!          |    X<----------RR(Nr=1)----------|
//!          |        (countdown fires)         |
//!          |--------I(Ns=0) "block A"-------->| duplicate, not delivered
//!          |<-----------RR(Nr=1)--------------|
//!          |                                  |
//!   send() |--------I(Ns=1) "block B"-------->| receive() returns "block B"
//!          |<-----------RR(Nr=0)--------------|
//!          |                                  |
//! ```
//!
//! The sender keeps a single frame outstanding. It retransmits when the
//! countdown fires or when the receiver rejects the frame, up to the
//! configured number of transmissions. The receiver delivers a frame only if
//! it carries the expected sequence number, and acknowledges every well-formed
//! frame with the sequence number it expects next.

use crate::{
    connection::{Connection, ConnectionError, ConnectionState},
    frame::{Control, Sequence},
    link::{LinkError, TolerateTimeout},
    serial::Serial,
    timer::Timer,
};

/// Outcome of waiting for the receiver's answer to an information frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Acknowledge {
    /// RR for the next sequence number.
    Ack,
    /// REJ for the frame just sent.
    Nack,
}

/// Data transfer.
impl<'a, S, T, const MAX_PAYLOAD: usize> Connection<'a, S, T, MAX_PAYLOAD>
where
    S: Serial,
    T: Timer,
{
    /// Send one block of data and wait until the peer acknowledges it.
    ///
    /// # Parameters
    /// - `payload`: Between 1 and `MAX_PAYLOAD` bytes.
    ///
    /// # Returns
    /// - `Ok(usize)`: Number of bytes sent and acknowledged.
    /// - [`Err(ConnectionError::TransferFailed)`](ConnectionError): The peer
    ///   did not acknowledge the block within the retransmission budget.
    /// - [`Err(ConnectionError::NotConnected)`](ConnectionError): The peer has
    ///   started teardown.
    /// - `Err(ConnectionError)`: Another error occurred.
    pub fn send(
        &mut self,
        payload: &[u8],
    ) -> Result<usize, ConnectionError<S::ReadError, S::WriteError>> {
        if self.state != ConnectionState::Established {
            return Err(ConnectionError::NotConnected);
        }
        if payload.is_empty() {
            return Err(ConnectionError::EmptyPayload);
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(ConnectionError::Oversize);
        }

        let seq = self.tx_seq;
        let attempts = self.config.max_retransmissions;

        for attempt in 1..=attempts {
            log::debug!(
                "sending I frame (Ns={}, {} bytes, attempt {}/{})",
                seq,
                payload.len(),
                attempt,
                attempts
            );
            self.link.send_information(self.role, seq, payload)?;
            self.link.arm_timer();

            match self.wait_for_acknowledge(seq).tolerate_timeout()? {
                Some(Acknowledge::Ack) => {
                    self.link.disarm_timer();
                    self.tx_seq = seq.toggled();
                    return Ok(payload.len());
                }
                Some(Acknowledge::Nack) => log::warn!("frame {} rejected, retransmitting", seq),
                None => log::warn!(
                    "frame {} not acknowledged within {} ms",
                    seq,
                    self.config.timeout_ms
                ),
            }
        }

        log::error!("transfer failed after {} attempts", attempts);
        Err(ConnectionError::TransferFailed)
    }

    /// Receive one block of data. Blocks until a new block arrives or the
    /// peer starts teardown.
    ///
    /// # Parameters
    /// - `buffer`: Where to store the block. Bytes beyond the returned length
    ///   are left unspecified.
    ///
    /// # Returns
    /// - `Ok(usize)`: Number of bytes received, or 0 if the peer sent DISC.
    ///   Every later call also returns 0.
    /// - [`Err(ConnectionError::BufferTooSmall)`](ConnectionError): The block
    ///   does not fit. It was not acknowledged and will be sent again.
    /// - `Err(ConnectionError)`: Another error occurred.
    pub fn receive(
        &mut self,
        buffer: &mut [u8],
    ) -> Result<usize, ConnectionError<S::ReadError, S::WriteError>> {
        if self.state == ConnectionState::CloseWait {
            return Ok(0);
        }

        self.link.disarm_timer();
        let peer = self.role.peer();

        loop {
            let frame = match self.link.receive_frame() {
                Ok(frame) => frame,
                // Ask for the expected frame again.
                Err(LinkError::Clobbered { origin, seq }) if origin == peer => {
                    log::warn!("BCC2 error in frame {}, sending REJ{}", seq, self.rx_seq);
                    self.link
                        .send_control(self.role, Control::Reject(self.rx_seq))?;
                    continue;
                }
                Err(LinkError::Clobbered { .. }) => continue,
                Err(e) => return Err(e.into()),
            };

            if frame.origin != peer {
                log::trace!("ignoring {:?} from {}", frame.control, frame.origin);
                continue;
            }

            match frame.control {
                Control::Information(seq) if seq == self.rx_seq => {
                    let len = frame.payload_len;
                    if len > buffer.len() {
                        return Err(ConnectionError::BufferTooSmall { required: len });
                    }

                    buffer[..len].copy_from_slice(self.link.payload(len));
                    self.rx_seq = seq.toggled();
                    self.link
                        .send_control(self.role, Control::ReceiveReady(self.rx_seq))?;
                    log::debug!(
                        "received I frame (Ns={}, {} bytes), sent RR{}",
                        seq,
                        len,
                        self.rx_seq
                    );
                    return Ok(len);
                }
                // Our acknowledgement got lost and the peer sent the frame
                // again. Acknowledge it again without delivering it twice.
                Control::Information(seq) => {
                    log::warn!("duplicate frame {}, sending RR{} again", seq, self.rx_seq);
                    self.link
                        .send_control(self.role, Control::ReceiveReady(self.rx_seq))?;
                }
                // Our UA got lost and the initiator is still opening.
                Control::Set => {
                    log::warn!("SET received again, sending UA again");
                    self.link.send_control(self.role, Control::Ua)?;
                }
                Control::Disc => {
                    log::info!("received DISC, peer is closing the link");
                    self.state = ConnectionState::CloseWait;
                    return Ok(0);
                }
                control => log::trace!("ignoring {:?} while receiving", control),
            }
        }
    }

    /// Wait until the peer acknowledges or rejects the frame with sequence
    /// number `seq`. Acknowledgements for other frames are stale and ignored
    /// without restarting the countdown.
    ///
    /// # Returns
    /// - [`Ok(Acknowledge)`](Acknowledge): The peer's verdict.
    /// - [`Err(LinkError::Timeout)`](LinkError): The countdown fired first.
    /// - `Err(LinkError)`: The serial device failed.
    fn wait_for_acknowledge(
        &mut self,
        seq: Sequence,
    ) -> Result<Acknowledge, LinkError<S::ReadError, S::WriteError>> {
        let peer = self.role.peer();

        loop {
            let frame = match self.link.receive_frame() {
                Ok(frame) => frame,
                Err(LinkError::Clobbered { .. }) => continue,
                Err(e) => return Err(e),
            };

            if frame.origin != peer {
                continue;
            }

            match frame.control {
                Control::ReceiveReady(next) if next == seq.toggled() => return Ok(Acknowledge::Ack),
                Control::Reject(rejected) if rejected == seq => return Ok(Acknowledge::Nack),
                control => log::trace!(
                    "ignoring {:?} while waiting for RR{}",
                    control,
                    seq.toggled()
                ),
            }
        }
    }
}

//! Connection establishment and teardown. The figure below outlines both
//! handshakes in time sequence.
//!
//! ```plain
//!           |                                    |
//!    open() |-----------------SET--------------->| open()
//!           |<-----------------UA----------------|
//!           |                                    |
//!           |          send() / receive()        |
//!           |                ...                 |
//!           |                                    |
//!   close() |-----------------DISC-------------->| receive() returns 0
//!           |<----------------DISC---------------| close()
//!           |------------------UA--------------->|
//!           |                                    |
//! INITIATOR                                        RESPONDER
//! ```
//!
//! The initiator drives both handshakes: it retransmits SET and DISC every
//! time the retransmission countdown fires, up to the configured number of
//! attempts. The responder only answers. Teardown always releases the serial
//! device, even when the peer never confirms it.

use crate::{
    config::LinkConfig,
    frame::{Control, Role, Sequence},
    link::{Link, LinkError, TolerateTimeout},
    serial::{Serial, SerialOpen},
    timer::Timer,
};

/// Enumeration of possible connection errors.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError<RE, WE> {
    /// Error occurred during serial read.
    #[error("serial read error: {0:?}")]
    SerialReadErr(RE),
    /// Error occurred during serial write.
    #[error("serial write error: {0:?}")]
    SerialWriteErr(WE),
    /// The serial channel could not be opened or released.
    #[error("serial channel unavailable")]
    ChannelUnavailable,
    /// The peer never answered a handshake within the retransmission budget.
    #[error("no response from peer")]
    NoResponse,
    /// The peer never acknowledged a data frame within the retransmission
    /// budget.
    #[error("data transfer failed")]
    TransferFailed,
    /// The peer has started teardown. Only closing is possible.
    #[error("not connected")]
    NotConnected,
    /// The payload is larger than the link's maximum payload size.
    #[error("payload exceeds the maximum payload size")]
    Oversize,
    /// Information frames must carry at least one byte.
    #[error("empty payload")]
    EmptyPayload,
    /// The receive buffer cannot hold the incoming payload. The frame is left
    /// unacknowledged so the peer will send it again.
    #[error("receive buffer too small, {required} bytes required")]
    BufferTooSmall { required: usize },
}

#[doc(hidden)]
/// Implement conversion from [`LinkError`] to [`ConnectionError`].
impl<RE, WE> From<LinkError<RE, WE>> for ConnectionError<RE, WE> {
    fn from(le: LinkError<RE, WE>) -> Self {
        match le {
            LinkError::SerialReadErr(e) => ConnectionError::SerialReadErr(e),
            LinkError::SerialWriteErr(e) => ConnectionError::SerialWriteErr(e),
            // Callers absorb both of these while waiting for a reply. Reaching
            // here means the reply never came.
            LinkError::Timeout => ConnectionError::NoResponse,
            LinkError::Clobbered { .. } => ConnectionError::NoResponse,
        }
    }
}

/// Where the connection stands after establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Handshake complete; data transfer in progress.
    Established,
    /// The peer's DISC was consumed by [`receive`](Connection::receive). No
    /// more data will arrive and nothing more can be sent.
    CloseWait,
}

/// A live connection over a serial device.
///
/// # Generic Parameters
/// - `MAX_PAYLOAD`: Largest payload of a single [`send`](Connection::send) or
///   [`receive`](Connection::receive). Both ends must agree on it.
pub struct Connection<'a, S, T, const MAX_PAYLOAD: usize = 512>
where
    S: Serial,
    T: Timer,
{
    /// The underlying link layer instance.
    pub(crate) link: Link<S, T, MAX_PAYLOAD>,
    pub(crate) role: Role,
    pub(crate) config: LinkConfig<'a>,
    /// Sequence number of the next information frame to send (`Ns`).
    pub(crate) tx_seq: Sequence,
    /// Sequence number of the next information frame expected (`Nr`).
    pub(crate) rx_seq: Sequence,
    pub(crate) state: ConnectionState,
}

/// Public functions and methods.
impl<'a, S, T, const MAX_PAYLOAD: usize> Connection<'a, S, T, MAX_PAYLOAD>
where
    S: Serial,
    T: Timer,
{
    /// Open a connection over an already opened serial device.
    ///
    /// As the [`Initiator`](Role::Initiator), send SET until the peer answers
    /// with UA or the retransmission budget runs out. As the
    /// [`Responder`](Role::Responder), wait, without a timeout, for SET and
    /// answer it with UA.
    ///
    /// # Returns
    /// - `Ok(Connection)`: The connection is established.
    /// - [`Err(ConnectionError::NoResponse)`](ConnectionError): The peer never
    ///   answered. The serial device has been released.
    /// - `Err(ConnectionError)`: Another error occurred.
    pub fn open(
        serial: S,
        timer: T,
        config: LinkConfig<'a>,
        role: Role,
    ) -> Result<Self, ConnectionError<S::ReadError, S::WriteError>> {
        let mut conn = Self {
            link: Link::new(serial, timer, config.timeout_ms, config.poll_interval_ms),
            role,
            config,
            tx_seq: Sequence::Even,
            rx_seq: Sequence::Even,
            state: ConnectionState::Established,
        };

        let established = match role {
            Role::Initiator => conn.request(Control::Set, Control::Ua),
            Role::Responder => conn.accept_set().map(|()| true),
        };

        match established {
            Ok(true) => {
                log::info!(
                    "connection on {} established as the {}",
                    config.channel,
                    role
                );
                Ok(conn)
            }
            Ok(false) => {
                log::error!(
                    "no UA on {} after {} attempts",
                    config.channel,
                    config.max_retransmissions
                );
                // The handshake already failed. Releasing is best effort.
                let _ = conn.link.close();
                Err(ConnectionError::NoResponse)
            }
            Err(e) => {
                let _ = conn.link.close();
                Err(e)
            }
        }
    }

    /// Open the serial channel named in `config` and then open a connection
    /// over it, see [`open`](Self::open).
    ///
    /// # Returns
    /// - [`Err(ConnectionError::ChannelUnavailable)`](ConnectionError): The
    ///   serial channel could not be opened.
    pub fn open_channel(
        config: LinkConfig<'a>,
        role: Role,
        timer: T,
    ) -> Result<Self, ConnectionError<S::ReadError, S::WriteError>>
    where
        S: SerialOpen,
    {
        let serial = S::open(config.channel, config.baud_rate).map_err(|e| {
            log::error!("cannot open serial channel {}: {:?}", config.channel, e);
            ConnectionError::ChannelUnavailable
        })?;

        Self::open(serial, timer, config, role)
    }

    /// Tear the connection down and release the serial device.
    ///
    /// As the [`Initiator`](Role::Initiator), send DISC until the peer answers
    /// with DISC, then confirm with UA. As the [`Responder`](Role::Responder),
    /// wait for DISC unless [`receive`](Self::receive) already consumed it,
    /// answer with DISC and wait for the final UA.
    ///
    /// The serial device is released in every case.
    ///
    /// # Returns
    /// - `Ok(())`: Teardown confirmed by the peer.
    /// - [`Err(ConnectionError::NoResponse)`](ConnectionError): The peer did
    ///   not confirm within the retransmission budget.
    /// - [`Err(ConnectionError::ChannelUnavailable)`](ConnectionError): The
    ///   serial device could not be released.
    /// - `Err(ConnectionError)`: Another error occurred.
    pub fn close(mut self) -> Result<(), ConnectionError<S::ReadError, S::WriteError>> {
        log::debug!(
            "closing connection on {} as the {}",
            self.config.channel,
            self.role
        );

        let confirmed = match self.role {
            Role::Initiator => self.close_as_initiator(),
            Role::Responder => self.close_as_responder(),
        };

        let released = self.link.close().map_err(|_| {
            log::error!("cannot release serial channel {}", self.config.channel);
            ConnectionError::ChannelUnavailable
        });

        confirmed?;
        released?;
        log::info!("connection on {} closed", self.config.channel);
        Ok(())
    }

    /// The role this end plays.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The configuration the connection was opened with.
    pub fn config(&self) -> &LinkConfig<'a> {
        &self.config
    }

    /// Whether the peer has started teardown.
    pub fn state(&self) -> ConnectionState {
        self.state
    }
}

/// Private functions and methods.
impl<'a, S, T, const MAX_PAYLOAD: usize> Connection<'a, S, T, MAX_PAYLOAD>
where
    S: Serial,
    T: Timer,
{
    /// Send `request` and wait for `reply` from the peer, retransmitting the
    /// request every time the countdown fires.
    ///
    /// # Returns
    /// - `Ok(true)`: The reply arrived.
    /// - `Ok(false)`: No reply after `max_retransmissions` transmissions.
    /// - `Err(ConnectionError)`: The serial device failed.
    pub(crate) fn request(
        &mut self,
        request: Control,
        reply: Control,
    ) -> Result<bool, ConnectionError<S::ReadError, S::WriteError>> {
        let attempts = self.config.max_retransmissions;

        for attempt in 1..=attempts {
            log::debug!("sending {:?} (attempt {}/{})", request, attempt, attempts);
            self.link.send_control(self.role, request)?;
            self.link.arm_timer();

            if self.wait_for_control(reply)? {
                self.link.disarm_timer();
                return Ok(true);
            }

            log::warn!("no {:?} within {} ms", reply, self.config.timeout_ms);
        }

        Ok(false)
    }

    /// Wait until the peer sends the given control frame or the countdown
    /// fires. Any other frame is ignored and does not restart the countdown.
    ///
    /// # Returns
    /// - `Ok(true)`: Got the frame.
    /// - `Ok(false)`: The countdown fired. Never happens when it is not
    ///   armed.
    fn wait_for_control(
        &mut self,
        expected: Control,
    ) -> Result<bool, ConnectionError<S::ReadError, S::WriteError>> {
        let peer = self.role.peer();

        loop {
            let frame = match self.link.receive_frame().tolerate_timeout() {
                Ok(Some(frame)) => frame,
                Ok(None) => return Ok(false),
                // A data frame with a bad checksum. Not what we wait for.
                Err(LinkError::Clobbered { .. }) => continue,
                Err(e) => return Err(e.into()),
            };

            if frame.origin == peer && frame.control == expected {
                return Ok(true);
            }

            log::trace!("ignoring {:?} from {}", frame.control, frame.origin);
        }
    }

    /// Block until the initiator's SET arrives, then answer with UA.
    fn accept_set(&mut self) -> Result<(), ConnectionError<S::ReadError, S::WriteError>> {
        log::debug!("waiting for SET on {}", self.config.channel);
        self.link.disarm_timer();

        if self.wait_for_control(Control::Set)? {
            self.link.send_control(self.role, Control::Ua)?;
        }
        Ok(())
    }

    fn close_as_initiator(&mut self) -> Result<(), ConnectionError<S::ReadError, S::WriteError>> {
        if !self.request(Control::Disc, Control::Disc)? {
            log::error!(
                "no DISC reply after {} attempts",
                self.config.max_retransmissions
            );
            return Err(ConnectionError::NoResponse);
        }

        self.link.send_control(self.role, Control::Ua)?;
        Ok(())
    }

    fn close_as_responder(&mut self) -> Result<(), ConnectionError<S::ReadError, S::WriteError>> {
        if self.state == ConnectionState::CloseWait {
            log::debug!("DISC already received while reading");
        } else {
            self.await_disc()?;
            self.state = ConnectionState::CloseWait;
        }

        // The initiator answers our DISC with UA. A lost DISC makes it send
        // its own DISC again, which the next attempt answers.
        if !self.request(Control::Disc, Control::Ua)? {
            log::warn!("teardown of {} not confirmed by UA", self.config.channel);
            return Err(ConnectionError::NoResponse);
        }
        Ok(())
    }

    /// Block until the initiator's DISC arrives. Retransmitted information
    /// frames are acknowledged again so that the initiator's last send can
    /// complete; new ones are dropped since nobody reads them anymore.
    fn await_disc(&mut self) -> Result<(), ConnectionError<S::ReadError, S::WriteError>> {
        log::debug!("waiting for DISC on {}", self.config.channel);
        self.link.disarm_timer();
        let peer = self.role.peer();

        loop {
            let frame = match self.link.receive_frame() {
                Ok(frame) => frame,
                Err(LinkError::Clobbered { .. }) => continue,
                Err(e) => return Err(e.into()),
            };

            if frame.origin != peer {
                continue;
            }

            match frame.control {
                Control::Disc => return Ok(()),
                Control::Information(seq) if seq != self.rx_seq => {
                    log::warn!("duplicate frame {} while closing, acknowledging again", seq);
                    self.link
                        .send_control(self.role, Control::ReceiveReady(self.rx_seq))?;
                }
                control => log::trace!("ignoring {:?} while closing", control),
            }
        }
    }
}

/// Unit tests for the [`connection`](crate::connection) module.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_control, encode_information};
    use crate::tests::{init_logger, ScriptedSerial, UnpluggedSerial};
    use crate::timer::tests::SteppingTimer;

    const SET: [u8; 5] = encode_control(Role::Initiator, Control::Set);
    const UA_FROM_RESPONDER: [u8; 5] = encode_control(Role::Responder, Control::Ua);
    const UA_FROM_INITIATOR: [u8; 5] = encode_control(Role::Initiator, Control::Ua);
    const DISC_FROM_INITIATOR: [u8; 5] = encode_control(Role::Initiator, Control::Disc);
    const DISC_FROM_RESPONDER: [u8; 5] = encode_control(Role::Responder, Control::Disc);
    const RR1: [u8; 5] = encode_control(Role::Responder, Control::ReceiveReady(Sequence::Odd));

    fn config() -> LinkConfig<'static> {
        LinkConfig::new("scripted")
            .with_max_retransmissions(3)
            .with_timeout_ms(1000)
            .with_poll_interval_ms(10)
    }

    /// Simple Test: The peer answers only the second SET. Open succeeds after
    /// exactly two SET frames.
    #[test]
    fn open_on_second_attempt() {
        init_logger();
        let serial = ScriptedSerial::new(|index, _frame| {
            (index == 1).then(|| UA_FROM_RESPONDER.to_vec())
        });
        let wire = serial.wire();

        let conn: Connection<_, _, 16> =
            Connection::open(serial, SteppingTimer::new(10), config(), Role::Initiator).unwrap();

        assert_eq!(conn.state(), ConnectionState::Established);
        assert_eq!(wire.frames(), [SET.to_vec(), SET.to_vec()]);
    }

    /// Simple Test: A UA from our own direction is not an answer.
    #[test]
    fn open_ignores_wrong_address() {
        init_logger();
        let serial = ScriptedSerial::new(|index, _frame| match index {
            0 => Some(UA_FROM_INITIATOR.to_vec()),
            _ => Some(UA_FROM_RESPONDER.to_vec()),
        });
        let wire = serial.wire();

        let _conn: Connection<_, _, 16> =
            Connection::open(serial, SteppingTimer::new(10), config(), Role::Initiator).unwrap();

        assert_eq!(wire.frames().len(), 2);
    }

    /// Simple Test: Nobody answers: exactly `max_retransmissions` SET frames,
    /// then `NoResponse`, and the port is released.
    #[test]
    fn open_exhausts_retries() {
        init_logger();
        let serial = ScriptedSerial::silent();
        let wire = serial.wire();

        let res: Result<Connection<_, _, 16>, _> =
            Connection::open(serial, SteppingTimer::new(10), config(), Role::Initiator);

        match res {
            Err(ConnectionError::NoResponse) => (),
            Err(e) => panic!("Expected NoResponse error, Found {:?}", e),
            Ok(_) => panic!("Expected NoResponse error, Found a connection"),
        }
        assert_eq!(wire.frames(), vec![SET.to_vec(); 3]);
        assert!(wire.is_closed());
    }

    /// Simple Test: The responder skips noise until SET and answers with
    /// exactly one UA.
    #[test]
    fn open_as_responder() {
        init_logger();
        let serial = ScriptedSerial::silent();
        let wire = serial.wire();
        wire.inject(&[0x00, 0x7e, 0x42]);
        wire.inject(&SET);

        let conn: Connection<_, _, 16> =
            Connection::open(serial, SteppingTimer::new(10), config(), Role::Responder).unwrap();

        assert_eq!(conn.role(), Role::Responder);
        assert_eq!(wire.frames(), [UA_FROM_RESPONDER.to_vec()]);
    }

    /// Simple Test: The channel cannot be opened.
    #[test]
    fn open_channel_unavailable() {
        init_logger();
        let res: Result<Connection<UnpluggedSerial, _, 16>, _> =
            Connection::open_channel(config(), Role::Initiator, SteppingTimer::new(10));

        match res {
            Err(ConnectionError::ChannelUnavailable) => (),
            Err(e) => panic!("Expected ChannelUnavailable error, Found {:?}", e),
            Ok(_) => panic!("Expected ChannelUnavailable error, Found a connection"),
        }
    }

    /// Simple Test: Initiator teardown: DISC, wait for DISC, final UA, port
    /// released.
    #[test]
    fn close_as_initiator() {
        init_logger();
        let serial = ScriptedSerial::new(|_index, frame| match frame {
            f if f == SET => Some(UA_FROM_RESPONDER.to_vec()),
            f if f == DISC_FROM_INITIATOR => Some(DISC_FROM_RESPONDER.to_vec()),
            _ => None,
        });
        let wire = serial.wire();

        let conn: Connection<_, _, 16> =
            Connection::open(serial, SteppingTimer::new(10), config(), Role::Initiator).unwrap();
        conn.close().unwrap();

        assert_eq!(
            wire.frames(),
            [
                SET.to_vec(),
                DISC_FROM_INITIATOR.to_vec(),
                UA_FROM_INITIATOR.to_vec()
            ]
        );
        assert!(wire.is_closed());
    }

    /// Simple Test: The responder never answers DISC: exactly
    /// `max_retransmissions` DISC frames, no UA, `NoResponse`, and the port is
    /// still released.
    #[test]
    fn close_exhausts_retries() {
        init_logger();
        let serial = ScriptedSerial::new(|index, _frame| {
            (index == 0).then(|| UA_FROM_RESPONDER.to_vec())
        });
        let wire = serial.wire();

        let conn: Connection<_, _, 16> =
            Connection::open(serial, SteppingTimer::new(10), config(), Role::Initiator).unwrap();

        match conn.close() {
            Err(ConnectionError::NoResponse) => (),
            res => panic!("Expected NoResponse error, Found {:?}", res),
        }

        let frames = wire.frames();
        assert_eq!(frames.len(), 4);
        assert_eq!(frames[1..], vec![DISC_FROM_INITIATOR.to_vec(); 3]);
        assert!(wire.is_closed());
    }

    /// Extensive Test: Responder teardown: wait for DISC, answer with DISC,
    /// wait for UA.
    #[test]
    fn close_as_responder() {
        init_logger();
        let serial = ScriptedSerial::new(|_index, frame| {
            (frame == DISC_FROM_RESPONDER).then(|| UA_FROM_INITIATOR.to_vec())
        });
        let wire = serial.wire();
        wire.inject(&SET);

        let conn: Connection<_, _, 16> =
            Connection::open(serial, SteppingTimer::new(10), config(), Role::Responder).unwrap();
        wire.inject(&DISC_FROM_INITIATOR);
        conn.close().unwrap();

        assert_eq!(
            wire.frames(),
            [UA_FROM_RESPONDER.to_vec(), DISC_FROM_RESPONDER.to_vec()]
        );
        assert!(wire.is_closed());
    }

    /// Simple Test: The initiator never sends the final UA. The responder
    /// reports it but still releases the port.
    #[test]
    fn close_as_responder_without_ua() {
        init_logger();
        let serial = ScriptedSerial::silent();
        let wire = serial.wire();
        wire.inject(&SET);

        let conn: Connection<_, _, 16> =
            Connection::open(serial, SteppingTimer::new(10), config(), Role::Responder).unwrap();
        wire.inject(&DISC_FROM_INITIATOR);

        match conn.close() {
            Err(ConnectionError::NoResponse) => (),
            res => panic!("Expected NoResponse error, Found {:?}", res),
        }
        assert_eq!(wire.frames().len(), 1 + 3);
        assert!(wire.is_closed());
    }

    /// Extensive Test: The RR for the last frame got lost, so the initiator
    /// resends the frame while the responder is already closing. The
    /// responder acknowledges it again before answering DISC.
    #[test]
    fn close_as_responder_acks_duplicate() {
        init_logger();
        let serial = ScriptedSerial::silent();
        let wire = serial.wire();
        wire.inject(&SET);

        let mut conn: Connection<_, _, 16> =
            Connection::open(serial, SteppingTimer::new(10), config(), Role::Responder).unwrap();

        let last: Vec<u8> = encode_information(Role::Initiator, Sequence::Even, b"last")
            .collect();
        wire.inject(&last);
        let mut buffer = [0u8; 16];
        assert_eq!(conn.receive(&mut buffer).unwrap(), 4);

        wire.inject(&last);
        wire.inject(&DISC_FROM_INITIATOR);
        wire.inject(&UA_FROM_INITIATOR);
        conn.close().unwrap();

        assert_eq!(
            wire.frames(),
            [UA_FROM_RESPONDER, RR1, RR1, DISC_FROM_RESPONDER]
        );
        assert!(wire.is_closed());
    }
}

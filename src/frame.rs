//! Frame codec. Maps payloads to on-wire frames and parses the incoming byte
//! stream back into frames.
//!
//! Every frame starts and ends with a [`FLAG`] byte. The header carries an
//! address byte telling which side sent the frame, a control byte telling the
//! frame type (and sequence bit, if any), and BCC1, the XOR of the two.
//!
//! ```plain
//! control frame (SET, UA, DISC, RR, REJ), always 5 bytes:
//! +------+---------+---------+------+------+
//! | FLAG | ADDRESS | CONTROL | BCC1 | FLAG |
//! +------+---------+---------+------+------+
//!
//! information frame:
//! +------+---------+-----------+------+-------------------+--------------+------+
//! | FLAG | ADDRESS | CONTROL_I | BCC1 | stuffed(PAYLOAD)  | stuffed(BCC2)| FLAG |
//! +------+---------+-----------+------+-------------------+--------------+------+
//! ```
//!
//! BCC2 is the XOR of all payload bytes. If the payload or BCC2 happens to
//! contain [`FLAG`] or [`ESCAPE`], the byte is replaced by [`ESCAPE`] followed
//! by the byte XORed with [`XOR_PATTERN`]. Header bytes are chosen so that
//! they never need escaping.
//!
//! Decoding is incremental: [`FrameDecoder::feed`] consumes one byte at a time
//! so the caller can interleave reading with timeout checks. A byte that does
//! not fit the frame being parsed throws the partial frame away and the
//! decoder resynchronizes on the next [`FLAG`].

use core::fmt;
use static_assertions::const_assert;

/// Frame delimiter.
pub const FLAG: u8 = 0x7e;

/// The escape byte.
pub const ESCAPE: u8 = 0x7d;

/// The xor byte pattern applied to each escaped byte.
pub const XOR_PATTERN: u8 = 0x20;

/// Return whether the given byte needs escape.
const fn need_escape(byte: u8) -> bool {
    byte == FLAG || byte == ESCAPE
}

/// The escape procedure is sound if escaping the bytes that need to be escaped
/// yields bytes that need not to be escaped.
#[allow(dead_code)]
const fn is_escape_sound() -> bool {
    need_escape(FLAG)
        && need_escape(ESCAPE)
        && !need_escape(FLAG ^ XOR_PATTERN)
        && !need_escape(ESCAPE ^ XOR_PATTERN)
}
const_assert!(is_escape_sound());

/// Control frames are sent unescaped, so no header byte may need escape.
#[allow(dead_code)]
const fn is_header_unescaped() -> bool {
    let addresses = [Role::Initiator.address(), Role::Responder.address()];
    let controls = [
        Control::Set,
        Control::Ua,
        Control::Disc,
        Control::Information(Sequence::Even),
        Control::Information(Sequence::Odd),
        Control::ReceiveReady(Sequence::Even),
        Control::ReceiveReady(Sequence::Odd),
        Control::Reject(Sequence::Even),
        Control::Reject(Sequence::Odd),
    ];

    let mut a = 0;
    while a < addresses.len() {
        if need_escape(addresses[a]) {
            return false;
        }
        let mut c = 0;
        while c < controls.len() {
            let control = controls[c].byte();
            if need_escape(control) || need_escape(addresses[a] ^ control) {
                return false;
            }
            c += 1;
        }
        a += 1;
    }
    true
}
const_assert!(is_header_unescaped());

/// Which end of the link a connection plays. Also identifies the sender of a
/// frame through the address byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Role {
    /// Sends SET to open and DISC to close.
    Initiator,
    /// Answers SET with UA and DISC with DISC.
    Responder,
}

impl Role {
    /// Address byte of frames sent by this role.
    pub const fn address(self) -> u8 {
        match self {
            Role::Initiator => 0x03,
            Role::Responder => 0x01,
        }
    }

    /// The role of the other end.
    pub const fn peer(self) -> Role {
        match self {
            Role::Initiator => Role::Responder,
            Role::Responder => Role::Initiator,
        }
    }

    const fn from_address(byte: u8) -> Option<Role> {
        match byte {
            0x03 => Some(Role::Initiator),
            0x01 => Some(Role::Responder),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Initiator => f.write_str("initiator"),
            Role::Responder => f.write_str("responder"),
        }
    }
}

/// Modulo-2 sequence number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sequence {
    Even,
    Odd,
}

impl Sequence {
    /// Return the other sequence number.
    pub const fn toggled(self) -> Self {
        match self {
            Sequence::Even => Sequence::Odd,
            Sequence::Odd => Sequence::Even,
        }
    }

    const fn from_bit(set: bool) -> Self {
        if set {
            Sequence::Odd
        } else {
            Sequence::Even
        }
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sequence::Even => f.write_str("0"),
            Sequence::Odd => f.write_str("1"),
        }
    }
}

/// The frame type carried by the control byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Connection request.
    Set,
    /// Unnumbered acknowledgement of SET or DISC.
    Ua,
    /// Disconnect.
    Disc,
    /// Information frame carrying payload with the sender's `Ns`.
    Information(Sequence),
    /// Positive acknowledgement carrying the next expected sequence number.
    ReceiveReady(Sequence),
    /// Negative acknowledgement of the given sequence number.
    Reject(Sequence),
}

impl Control {
    /// The on-wire control byte.
    pub const fn byte(self) -> u8 {
        match self {
            Control::Set => 0x03,
            Control::Ua => 0x07,
            Control::Disc => 0x0b,
            Control::Information(Sequence::Even) => 0x00,
            Control::Information(Sequence::Odd) => 0x40,
            Control::ReceiveReady(Sequence::Even) => 0x05,
            Control::ReceiveReady(Sequence::Odd) => 0x85,
            Control::Reject(Sequence::Even) => 0x01,
            Control::Reject(Sequence::Odd) => 0x81,
        }
    }

    const fn from_byte(byte: u8) -> Option<Control> {
        match byte {
            0x03 => Some(Control::Set),
            0x07 => Some(Control::Ua),
            0x0b => Some(Control::Disc),
            0x00 | 0x40 => Some(Control::Information(Sequence::from_bit(byte & 0x40 != 0))),
            0x05 | 0x85 => Some(Control::ReceiveReady(Sequence::from_bit(byte & 0x80 != 0))),
            0x01 | 0x81 => Some(Control::Reject(Sequence::from_bit(byte & 0x80 != 0))),
            _ => None,
        }
    }
}

/// A decoded frame. For information frames the payload stays in the
/// decoder, see [`FrameDecoder::payload`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    /// Who sent the frame.
    pub origin: Role,
    /// Frame type.
    pub control: Control,
    /// Number of payload bytes, zero for control frames.
    pub payload_len: usize,
}

/// Errors reported by [`FrameDecoder::feed`]. Both drop the partial frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    /// Header mismatch, unknown address or control byte, empty or overlong
    /// payload, or a lost escaped byte.
    #[error("malformed frame")]
    Malformed,
    /// The information frame was well delimited but BCC2 did not match.
    #[error("payload checksum mismatch in frame {seq} from {origin}")]
    Checksum { origin: Role, seq: Sequence },
}

/// Build a control frame.
pub const fn encode_control(origin: Role, control: Control) -> [u8; 5] {
    let address = origin.address();
    let control = control.byte();
    [FLAG, address, control, address ^ control, FLAG]
}

/// Build an information frame. The bytes are produced lazily so the frame can
/// be written straight to the serial device without a staging buffer.
///
/// The payload must not be empty.
pub fn encode_information<'p>(
    origin: Role,
    seq: Sequence,
    payload: &'p [u8],
) -> impl Iterator<Item = u8> + 'p {
    let address = origin.address();
    let control = Control::Information(seq).byte();
    let bcc2 = payload.iter().fold(0u8, |acc, &byte| acc ^ byte);

    [FLAG, address, control, address ^ control]
        .into_iter()
        .chain(
            payload
                .iter()
                .copied()
                .chain(core::iter::once(bcc2))
                .flat_map(stuff),
        )
        .chain(core::iter::once(FLAG))
}

/// Escape a single byte if needed.
fn stuff(byte: u8) -> impl Iterator<Item = u8> {
    let escaped = need_escape(byte);
    let byte = if escaped { byte ^ XOR_PATTERN } else { byte };
    core::iter::once(ESCAPE)
        .filter(move |_| escaped)
        .chain(core::iter::once(byte))
}

/// Where the decoder is within the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Idle,
    GotFlag,
    GotAddress(Role),
    GotControl(Role, Control),
    /// Header of a control frame checked, only the closing flag is missing.
    GotHeader(Role, Control),
    ReadingPayload(Role, Sequence),
    FoundEscape(Role, Sequence),
}

/// Incremental frame parser holding up to `N` payload bytes.
pub struct FrameDecoder<const N: usize> {
    state: ParseState,
    buffer: [u8; N],
    /// Destuffed bytes seen after the header, BCC2 included.
    byte_cnt: usize,
    /// XOR of all destuffed bytes after the header. Zero iff BCC2 matches.
    xor: u8,
}

impl<const N: usize> Default for FrameDecoder<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> FrameDecoder<N> {
    pub const fn new() -> Self {
        Self {
            state: ParseState::Idle,
            buffer: [0; N],
            byte_cnt: 0,
            xor: 0,
        }
    }

    /// Drop any partial frame.
    pub fn reset(&mut self) {
        self.state = ParseState::Idle;
    }

    /// Payload of the last decoded information frame.
    pub fn payload(&self, len: usize) -> &[u8] {
        &self.buffer[..len.min(N)]
    }

    /// Consume one byte from the wire.
    ///
    /// # Returns
    /// - `Ok(Some(Frame))`: The byte completed a frame.
    /// - `Ok(None)`: Need more bytes.
    /// - `Err(FrameError)`: The partial frame was dropped.
    pub fn feed(&mut self, byte: u8) -> Result<Option<Frame>, FrameError> {
        match self.state {
            ParseState::Idle => {
                if byte == FLAG {
                    self.state = ParseState::GotFlag;
                }
                Ok(None)
            }

            // Consecutive flags are idle fill or the end of a frame we missed.
            ParseState::GotFlag if byte == FLAG => Ok(None),

            ParseState::GotFlag => match Role::from_address(byte) {
                Some(origin) => {
                    self.state = ParseState::GotAddress(origin);
                    Ok(None)
                }
                None => self.drop_frame(byte),
            },

            ParseState::GotAddress(origin) => match Control::from_byte(byte) {
                Some(control) => {
                    self.state = ParseState::GotControl(origin, control);
                    Ok(None)
                }
                None => self.drop_frame(byte),
            },

            ParseState::GotControl(origin, control) => {
                if byte != origin.address() ^ control.byte() {
                    return self.drop_frame(byte);
                }

                self.state = match control {
                    Control::Information(seq) => {
                        self.byte_cnt = 0;
                        self.xor = 0;
                        ParseState::ReadingPayload(origin, seq)
                    }
                    control => ParseState::GotHeader(origin, control),
                };
                Ok(None)
            }

            ParseState::GotHeader(origin, control) => {
                if byte != FLAG {
                    return self.drop_frame(byte);
                }

                self.state = ParseState::Idle;
                Ok(Some(Frame {
                    origin,
                    control,
                    payload_len: 0,
                }))
            }

            ParseState::ReadingPayload(origin, seq) => match byte {
                ESCAPE => {
                    self.state = ParseState::FoundEscape(origin, seq);
                    Ok(None)
                }
                FLAG => self.finish_information(origin, seq),
                byte => self.push(byte),
            },

            ParseState::FoundEscape(origin, seq) => match byte {
                // The escaped byte was lost and another escape follows. Treat
                // the pair as a single escape.
                ESCAPE => Ok(None),
                // The escaped byte was lost right before the closing flag. The
                // frame cannot be recovered; the flag may open the next one.
                FLAG => self.drop_frame(byte),
                byte => {
                    self.state = ParseState::ReadingPayload(origin, seq);
                    self.push(byte ^ XOR_PATTERN)
                }
            },
        }
    }

    /// Abandon the current frame. A flag may start the next frame.
    fn drop_frame(&mut self, byte: u8) -> Result<Option<Frame>, FrameError> {
        self.state = if byte == FLAG {
            ParseState::GotFlag
        } else {
            ParseState::Idle
        };
        Err(FrameError::Malformed)
    }

    /// Append a destuffed byte. BCC2 is not known to be BCC2 until the closing
    /// flag, so every byte goes through here and the buffer only keeps the
    /// first `N`.
    fn push(&mut self, byte: u8) -> Result<Option<Frame>, FrameError> {
        // At most `N` payload bytes plus BCC2.
        if self.byte_cnt > N {
            self.state = ParseState::Idle;
            return Err(FrameError::Malformed);
        }

        if self.byte_cnt < N {
            self.buffer[self.byte_cnt] = byte;
        }
        self.byte_cnt += 1;
        self.xor ^= byte;
        Ok(None)
    }

    fn finish_information(
        &mut self,
        origin: Role,
        seq: Sequence,
    ) -> Result<Option<Frame>, FrameError> {
        self.state = ParseState::Idle;

        // Need at least one payload byte and BCC2.
        if self.byte_cnt < 2 {
            return Err(FrameError::Malformed);
        }

        if self.xor != 0 {
            return Err(FrameError::Checksum { origin, seq });
        }

        Ok(Some(Frame {
            origin,
            control: Control::Information(seq),
            payload_len: self.byte_cnt - 1,
        }))
    }
}

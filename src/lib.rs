//! A point-to-point data link over a serial line.
//!
//! Two ends, an [`Initiator`](Role::Initiator) and a
//! [`Responder`](Role::Responder), exchange byte-stuffed frames delimited by
//! [`FLAG`]. A connection is opened with a SET/UA handshake, carries data with
//! stop-and-wait ARQ using alternating sequence numbers, and is torn down with
//! a DISC/DISC/UA exchange. Every request is retransmitted on a timeout up to
//! a configured number of attempts.
//!
//! The client provides a serial device instance and a timer instance, which
//! respectively implement the [`Serial`] and [`Timer`] trait. With the `std`
//! feature, [`StdTimer`] can serve as the timer. The framing itself,
//! [`encode_control`], [`encode_information`] and [`FrameDecoder`], is usable
//! on its own.
//!
//! Below shows an example.
//!
//! ```rust
//! use arqlink::{Connection, LinkConfig, Role, Serial, SerialError, Timer};
//! use crossbeam::channel::{self, Receiver, RecvError, SendError, Sender};
//! use std::{
//!     thread,
//!     time::{Duration, SystemTime, UNIX_EPOCH},
//! };
//!
//! fn main() {
//!     // Create a pair of connected serial devices.
//!     let (serial0, serial1) = MockSerial::new_pair();
//!
//!     let config = LinkConfig::new("mock")
//!         .with_timeout_ms(500)
//!         .with_poll_interval_ms(10);
//!
//!     // Start a thread that receives until the initiator closes the link.
//!     let responder = thread::spawn(move || {
//!         let mut conn: Connection<_, _> =
//!             Connection::open(serial0, MockTimer, config, Role::Responder).unwrap();
//!
//!         let mut buffer = [0u8; 512];
//!         let len = conn.receive(&mut buffer).unwrap();
//!         assert_eq!(&buffer[..len], b"hello world!");
//!
//!         // The peer sent DISC.
//!         assert_eq!(conn.receive(&mut buffer).unwrap(), 0);
//!         conn.close().unwrap();
//!     });
//!
//!     // Start a thread that sends "hello world!" and then closes the link.
//!     let initiator = thread::spawn(move || {
//!         let mut conn: Connection<_, _> =
//!             Connection::open(serial1, MockTimer, config, Role::Initiator).unwrap();
//!
//!         conn.send(b"hello world!").unwrap();
//!         conn.close().unwrap();
//!     });
//!
//!     responder.join().unwrap();
//!     initiator.join().unwrap();
//! }
//!
//! /// Simulated timer.
//! struct MockTimer;
//!
//! impl Timer for MockTimer {
//!     /// Get the timestamp from the std library.
//!     fn get_timestamp_ms(&mut self) -> u32 {
//!         SystemTime::now()
//!             .duration_since(UNIX_EPOCH)
//!             .unwrap()
//!             .as_millis() as u32
//!     }
//! }
//!
//! /// Simulated serial device. It is simulated with `crossbeam`'s MPMC queues.
//! struct MockSerial {
//!     send: Sender<u8>,
//!     recv: Receiver<u8>,
//! }
//!
//! impl MockSerial {
//!     /// Get a pair of connected serial devices.
//!     fn new_pair() -> (Self, Self) {
//!         // Create channels to send in both directions.
//!         let (send0, recv0) = channel::unbounded();
//!         let (send1, recv1) = channel::unbounded();
//!
//!         // Deliberately keep extra endpoints alive, so that the surviving
//!         // end never sees a disconnection once the other end is dropped.
//!         std::mem::forget(send0.clone());
//!         std::mem::forget(send1.clone());
//!         std::mem::forget(recv0.clone());
//!         std::mem::forget(recv1.clone());
//!
//!         (
//!             Self {
//!                 send: send0,
//!                 recv: recv1,
//!             },
//!             Self {
//!                 send: send1,
//!                 recv: recv0,
//!             },
//!         )
//!     }
//! }
//!
//! impl Serial for MockSerial {
//!     type ReadError = RecvError;
//!     type WriteError = SendError<u8>;
//!
//!     /// Read a byte from the channel with a timeout.
//!     fn read_byte_with_timeout(
//!         &mut self,
//!         timeout_ms: u32,
//!     ) -> Result<u8, SerialError<Self::ReadError, Self::WriteError>> {
//!         // MUST map the timeout error to the specific `SerialError` variant
//!         // because the link treats it as "nothing arrived yet".
//!         self.recv
//!             .recv_timeout(Duration::from_millis(timeout_ms as u64))
//!             .map_err(|e| match e {
//!                 channel::RecvTimeoutError::Timeout => SerialError::Timeout,
//!                 channel::RecvTimeoutError::Disconnected => SerialError::ReadError(RecvError),
//!             })
//!     }
//!
//!     /// Write a byte to the channel.
//!     fn write_byte(
//!         &mut self,
//!         byte: u8,
//!     ) -> Result<(), SerialError<Self::ReadError, Self::WriteError>> {
//!         self.send.send(byte).map_err(|e| SerialError::WriteError(e))
//!     }
//! }
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

mod arq;
mod config;
mod connection;
mod frame;
mod link;
mod serial;
mod timer;


pub use config::{
    LinkConfig, DEFAULT_BAUD_RATE, DEFAULT_MAX_RETRANSMISSIONS, DEFAULT_POLL_INTERVAL_MS,
    DEFAULT_TIMEOUT_MS,
};
pub use connection::{Connection, ConnectionError, ConnectionState};
pub use frame::{
    encode_control, encode_information, Control, Frame, FrameDecoder, FrameError, Role, Sequence,
    ESCAPE, FLAG, XOR_PATTERN,
};
pub use serial::{Serial, SerialError, SerialOpen};
#[cfg(feature = "std")]
pub use timer::StdTimer;
pub use timer::Timer;

//! The FOSC binary protocol spoken by Foscam HD IP cameras
//!
//! Provides an async frame reader and writer, strict decoders for the command bodies we know about,
//! and a passive correlator that picks FOSC frames out of packet captures.
//!
//! The camera serves its HTTP/CGI interface and the binary protocol on the same TCP port (88 by default).
//! A client sends a `SERVERPUSH` request, and from then on both sides exchange FOSC frames on that connection.
//! The browser plugin uses it for video, audio in both directions, and a handful of notifications
//! (motion alerts, preset and cruise list changes, image settings) that have no CGI equivalent.
//!
//! ## Notice
//!
//! This crate is based on captures of the official browser plugin talking to a FI9821W V2.
//! The command layouts were reverse-engineered from a small number of samples, so expect
//! that some fields are misnamed, and that other firmware versions trip the strict checks.
//! That's intended: a failed check comes with the offending field and a hex dump, which is
//! usually the fastest way to learn something new about the protocol.
//!
//! ## What is in a FOSC frame?
//!
//! A 12 bytes header (little endian command id, the `"FOSC"` magic, little endian body length)
//! followed by a command-specific body of fixed layout.
//!
//! [`framing`](framing) handles the header and the stream. [`commands`](commands) names the command ids
//! and holds the immutable [`CommandRegistry`](commands::CommandRegistry) of decoders.
//! [`correlator`](correlator) runs the same registry over captured traffic, without taking part in the connection.

pub mod audio;
pub mod commands;
pub mod correlator;
pub mod framing;
pub mod hexdump;

pub use commands::{CommandId, CommandRegistry};
pub use correlator::{Correlator, CorrelatorConfig};
pub use framing::{Frame, FrameReader, FrameWriter};

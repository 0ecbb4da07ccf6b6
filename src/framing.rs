//! This module provides the [`Frame`](frame::Frame) structure, an async [`FrameReader`](reader::FrameReader)
//! that pulls frames out of a live byte stream, and a [`FrameWriter`](writer::FrameWriter) Sink.
//!
//! FOSC is a little endian, length-prefixed protocol. Every frame starts with a 12 bytes header:
//! a 32-bit command id, the literal `"FOSC"` and the 32-bit length of the body that follows.
//! The framing layer only checks the header. Interpreting the body is the job of the
//! [`CommandRegistry`](crate::commands::CommandRegistry).

pub mod frame;
mod reader;
mod writer;

pub use frame::{Frame, FrameHeader, HEADER_LEN, MAGIC};
pub use reader::{FrameReader, ReaderConfig, ReaderState, ReaderStats, Step};
pub use writer::FrameWriter;

use crate::commands::CommandRegistry;
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite, ReadHalf, WriteHalf};

/// Splits a camera connection into a reader half and a writer half
pub fn split<IO>(
    io: IO,
    registry: Arc<CommandRegistry>,
) -> (FrameReader<ReadHalf<IO>>, FrameWriter<WriteHalf<IO>>)
where
    IO: AsyncRead + AsyncWrite,
{
    let (read, write) = tokio::io::split(io);
    (FrameReader::new(read, registry), FrameWriter::new(write))
}

#[derive(Error, Debug)]
pub enum FramingError {
    #[error("Bad FOSC magic {}, expected {}", hex::encode(.0), hex::encode(MAGIC))]
    BadMagic([u8; 4]),
    #[error("Short FOSC header, got {0} bytes out of 12")]
    ShortHeader(usize),
    #[error("Bad FOSC body size {0:#x}, header announced {1:#x}")]
    BadSize(usize, usize),
    #[error("Stream closed with {remaining:#x} body bytes still expected")]
    ClosedMidFrame { remaining: usize },
    #[error("FOSC header announces a {announced:#x} bytes body, limit is {limit:#x}")]
    BodyTooLarge { announced: usize, limit: usize },
    #[error("FOSC IO error")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

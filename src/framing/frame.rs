use crate::commands::CommandId;
use crate::framing::FramingError;
use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use std::io::{Cursor, Read, Write};

/// Every frame carries this literal right after the command id
pub const MAGIC: &[u8; 4] = b"FOSC";
/// Command id, magic and body length
pub const HEADER_LEN: usize = 12;

/// The fixed 12 bytes that precede every frame body
#[derive(Eq, PartialEq, Debug, Copy, Clone)]
pub struct FrameHeader {
    pub command: u32,
    pub magic: [u8; 4],
    pub body_len: u32,
}

impl FrameHeader {
    /// Reads the first [`HEADER_LEN`](HEADER_LEN) bytes of `buf`.
    /// Anything after the header is ignored, so this also works on a captured packet payload.
    pub fn parse(buf: &[u8]) -> Result<Self, FramingError> {
        if buf.len() < HEADER_LEN {
            return Err(FramingError::ShortHeader(buf.len()));
        }
        let mut reader = Cursor::new(buf);
        let command = reader.read_u32::<LE>()?;
        let mut magic = [0; 4];
        reader.read_exact(&mut magic)?;
        let body_len = reader.read_u32::<LE>()?;
        Ok(Self {
            command,
            magic,
            body_len,
        })
    }

    /// Like [`parse`](Self::parse), but also rejects headers without the `FOSC` magic
    pub fn parse_checked(buf: &[u8]) -> Result<Self, FramingError> {
        let hdr = Self::parse(buf)?;
        if !hdr.has_magic() {
            return Err(FramingError::BadMagic(hdr.magic));
        }
        Ok(hdr)
    }

    pub fn has_magic(&self) -> bool {
        &self.magic == MAGIC
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0; HEADER_LEN];
        buf[..4].copy_from_slice(&self.command.to_le_bytes());
        buf[4..8].copy_from_slice(&self.magic);
        buf[8..].copy_from_slice(&self.body_len.to_le_bytes());
        buf
    }
}

/// One complete protocol message.
///
/// Frames are cheap and short-lived: the reader builds one per header/body cycle,
/// hands it to the registry and drops it.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Frame {
    pub command: u32,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(command: impl Into<u32>, body: Vec<u8>) -> Self {
        Self {
            command: command.into(),
            body,
        }
    }

    pub fn header(&self) -> FrameHeader {
        FrameHeader {
            command: self.command,
            magic: *MAGIC,
            body_len: self.body.len() as u32,
        }
    }

    /// Best effort name for the command, using the known [`CommandId`](CommandId) values
    pub fn command_string(&self) -> String {
        match CommandId::from_repr(self.command) {
            Some(id) => id.to_string(),
            None => format!("{:#X}", self.command),
        }
    }

    /// Parses a whole frame, the body must be exactly as long as the header announces
    pub fn from_buf(buf: &[u8]) -> Result<Self, FramingError> {
        let hdr = FrameHeader::parse_checked(buf)?;
        let remaining_size = buf.len() - HEADER_LEN;
        if remaining_size != hdr.body_len as usize {
            return Err(FramingError::BadSize(remaining_size, hdr.body_len as usize));
        }
        Ok(Self {
            command: hdr.command,
            body: buf[HEADER_LEN..].to_vec(),
        })
    }

    /// Header followed by the body, as sent on the wire
    pub fn to_buf(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_LEN + self.body.len());
        self.write_to(&mut buf).unwrap();
        buf
    }

    pub(crate) fn write_to(&self, writer: &mut dyn Write) -> std::io::Result<()> {
        writer.write_u32::<LE>(self.command)?;
        writer.write_all(MAGIC)?;
        writer.write_u32::<LE>(self.body.len() as u32)?;
        writer.write_all(&self.body)?;
        Ok(())
    }
}

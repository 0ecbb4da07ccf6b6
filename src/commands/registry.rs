use crate::commands::decoders::BUILTIN;
use crate::commands::fields::{DecodeError, DecodedFields};
use crate::framing::{Frame, FrameHeader, HEADER_LEN};
use crate::hexdump::hex_dump;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, trace, warn};

/// Takes the whole frame (header and body) and either accepts it or names the broken invariant
pub type DecodeFn = fn(&[u8]) -> Result<DecodedFields, DecodeError>;

/// Description returned for ids without a decoder
const UNKNOWN_DESCRIPTION: &str = "???";

#[derive(Error, Debug, Eq, PartialEq)]
pub enum RegistryError {
    #[error("A decoder is already registered for command {0}")]
    Duplicate(u32),
}

#[derive(Clone)]
pub struct CommandDescriptor {
    pub id: u32,
    pub description: String,
    pub decode: DecodeFn,
}

impl std::fmt::Debug for CommandDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDescriptor")
            .field("id", &self.id)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// What the registry made of one frame
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Outcome {
    Decoded(DecodedFields),
    /// The command has a decoder, and the frame broke one of its rules
    Invalid(DecodeError),
    /// No decoder for this command, we only have a hex dump of the body
    Unhandled { dump: String },
}

impl Outcome {
    pub fn is_invalid(&self) -> bool {
        matches!(self, Outcome::Invalid(_))
    }

    pub fn is_unhandled(&self) -> bool {
        matches!(self, Outcome::Unhandled { .. })
    }
}

/// Collects decoders before freezing them into a [`CommandRegistry`](CommandRegistry)
#[derive(Default)]
pub struct RegistryBuilder {
    commands: HashMap<u32, CommandDescriptor>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A builder that already holds every decoder this crate knows about
    pub fn with_builtin() -> Self {
        let commands = BUILTIN
            .iter()
            .map(|&(id, description, decode)| {
                let id = u32::from(id);
                let descriptor = CommandDescriptor {
                    id,
                    description: description.to_owned(),
                    decode,
                };
                (id, descriptor)
            })
            .collect();
        Self { commands }
    }

    /// Each id gets exactly one decoder, registering a second one is an error
    pub fn register(
        &mut self,
        id: impl Into<u32>,
        description: impl Into<String>,
        decode: DecodeFn,
    ) -> Result<&mut Self, RegistryError> {
        let id = id.into();
        if self.commands.contains_key(&id) {
            return Err(RegistryError::Duplicate(id));
        }
        self.commands.insert(
            id,
            CommandDescriptor {
                id,
                description: description.into(),
                decode,
            },
        );
        Ok(self)
    }

    pub fn build(self) -> CommandRegistry {
        CommandRegistry {
            commands: self.commands,
        }
    }
}

/// Read-only table from command id to decoder.
///
/// Build it once at startup and share it (usually behind an `Arc`) with every
/// [`FrameReader`](crate::framing::FrameReader) and [`Correlator`](crate::correlator::Correlator).
#[derive(Debug, Clone)]
pub struct CommandRegistry {
    commands: HashMap<u32, CommandDescriptor>,
}

impl Default for CommandRegistry {
    fn default() -> Self {
        RegistryBuilder::with_builtin().build()
    }
}

impl CommandRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn get(&self, id: u32) -> Option<&CommandDescriptor> {
        self.commands.get(&id)
    }

    pub fn description(&self, id: u32) -> &str {
        self.get(id)
            .map(|d| d.description.as_str())
            .unwrap_or(UNKNOWN_DESCRIPTION)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Decode `buf`, which starts with a frame header.
    ///
    /// Never fails: a bad header or a broken invariant come back as [`Outcome::Invalid`](Outcome::Invalid),
    /// an unknown command as [`Outcome::Unhandled`](Outcome::Unhandled) with a dump of the body.
    pub fn dispatch(&self, buf: &[u8]) -> Outcome {
        let hdr = match FrameHeader::parse_checked(buf) {
            Ok(hdr) => hdr,
            Err(e) => {
                warn!("Not dispatching bad frame: {}", e);
                return Outcome::Invalid(DecodeError::Header(e.to_string()));
            }
        };
        trace!(
            "Dispatching command {} with {:#x} bytes: {}",
            hdr.command,
            buf.len(),
            hex::encode(buf),
        );

        let descriptor = match self.get(hdr.command) {
            Some(d) => d,
            None => {
                let dump = hex_dump(&buf[HEADER_LEN..], &[]);
                warn!("Unhandled command {}, body:\n{}", hdr.command, dump);
                return Outcome::Unhandled { dump };
            }
        };

        match (descriptor.decode)(buf) {
            Ok(fields) => {
                debug!(
                    "command {} ({}): {}",
                    hdr.command, descriptor.description, fields
                );
                Outcome::Decoded(fields)
            }
            Err(e) => {
                let highlight: Vec<usize> = e.offset().into_iter().collect();
                warn!(
                    "Decode error in command {} ({}): {}\n{}",
                    hdr.command,
                    descriptor.description,
                    e,
                    hex_dump(buf, &highlight),
                );
                Outcome::Invalid(e)
            }
        }
    }

    pub fn dispatch_frame(&self, frame: &Frame) -> Outcome {
        self.dispatch(&frame.to_buf())
    }
}

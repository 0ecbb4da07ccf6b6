//! Command identifiers, the decoded field model, and the registry of per-command decoders.
//!
//! Each known command has a fixed body layout that was reverse-engineered from captures.
//! The decoders check those layouts strictly: padding after a string terminator must be zero,
//! reserved bytes must keep the value we have always seen, and enumerated fields must stay
//! within their known set. Any deviation is reported as a [`DecodeError`](DecodeError)
//! instead of being smoothed over, because a deviation is exactly what we want to learn about.

mod decoders;
mod fields;
mod registry;
mod request;
mod values;

pub use decoders::{audio_payload, AUDIO_SUBHEADERS_LEN};
pub use fields::{DecodeError, DecodedFields, FieldValue};
pub use registry::{
    CommandDescriptor, CommandRegistry, DecodeFn, Outcome, RegistryBuilder, RegistryError,
};
pub use request::{serverpush_preamble, Request, DEFAULT_CAMERA_PORT};
pub use values::{LoginResult, PowerFrequency, VideoStream};

use strum_macros::{AsRefStr, Display, FromRepr};

/// Names for the command ids seen so far, in either direction.
///
/// Not every named command has a decoder: some are only ever sent by the client
/// (see [`Request`](Request)), and video frames (`VideoIn`) are too large to be useful
/// without TCP reassembly.
/// Unknown ids are common, the camera has plenty of commands nobody has looked at yet.
#[derive(Eq, PartialEq, Debug, Copy, Clone, Display, AsRefStr, FromRepr)]
#[repr(u32)]
#[rustfmt::skip]
#[non_exhaustive]
pub enum CommandId {
    VideoOn =                0,
    Logoff =                 1,
    AudioOn =                2,
    AudioOff =               3,
    VideoOnAlt =             4,   // Same layout as VideoOn, purpose unclear
    UserPass5 =              5,
    AudioOut =               6,
    Login =                  12,
    LoginCheck =             15,  // Keep alive request
    SpeakerOffReply =        21,
    VideoIn =                26,
    AudioIn =                27,
    LoginCheckReply =        29,  // Keep alive answer
    PresetsAndCruises =      100,
    PresetListChanged =      106,
    CruiseListChanged =      107,
    MirrorFlip =             108,
    ColorSettings =          110,
    MotionAlert =            111,
    PowerFrequency =         112,
    StreamNo =               113,
}

impl From<CommandId> for u32 {
    fn from(id: CommandId) -> Self {
        id as u32
    }
}

impl PartialEq<u32> for CommandId {
    fn eq(&self, other: &u32) -> bool {
        *self as u32 == *other
    }
}

impl PartialEq<CommandId> for u32 {
    fn eq(&self, other: &CommandId) -> bool {
        *other as u32 == *self
    }
}

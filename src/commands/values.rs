//! Closed sets of values used by some command fields.
//! Values outside these sets have never been observed, so decoders treat them as errors.

use strum_macros::{Display, EnumCount, FromRepr};

/// Which video stream a `VideoOn` request asks for
#[repr(u32)]
#[derive(Eq, PartialEq, Debug, Copy, Clone, Display, EnumCount, FromRepr)]
pub enum VideoStream {
    Main = 0,
    Sub = 1,
}

/// Carried by the keep alive answer
#[repr(u32)]
#[derive(Eq, PartialEq, Debug, Copy, Clone, Display, EnumCount, FromRepr)]
pub enum LoginResult {
    #[strum(serialize = "ok")]
    Ok = 0,
    #[strum(serialize = "error")]
    Error = 1,
}

/// Anti-flicker setting of the image sensor
#[repr(u32)]
#[derive(Eq, PartialEq, Debug, Copy, Clone, Display, EnumCount, FromRepr)]
pub enum PowerFrequency {
    #[strum(serialize = "60 Hz")]
    Hz60 = 0,
    #[strum(serialize = "50 Hz")]
    Hz50 = 1,
    #[strum(serialize = "outdoor")]
    Outdoor = 2,
}

impl VideoStream {
    pub const ALLOWED: &'static [u32] = &[0, 1];
}

impl LoginResult {
    pub const ALLOWED: &'static [u32] = &[0, 1];
}

impl PowerFrequency {
    pub const ALLOWED: &'static [u32] = &[0, 1, 2];
}

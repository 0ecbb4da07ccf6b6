//! One decode function per known command.
//!
//! All of them take the whole frame, header included, and start reading right after the header.
//! Layout comments give the body in wire order, all integers little endian.

use crate::commands::fields::{DecodeError, DecodedFields, FieldReader};
use crate::commands::registry::DecodeFn;
use crate::commands::values::{LoginResult, PowerFrequency, VideoStream};
use crate::commands::CommandId;
use crate::framing::{FrameHeader, HEADER_LEN};

const USER_LEN: usize = 64;
const PASS_LEN: usize = 64;
const NAME_SLOT_LEN: usize = 32;
const PRESET_SLOTS: usize = 16;
const CRUISE_SLOTS: usize = 8;

/// The two sub-headers in front of the audio data of an `AudioIn` frame
pub const AUDIO_SUBHEADERS_LEN: usize = 12 + 24;
/// Only the first 32 audio bytes are required to be there, the rest may be cut off in captures
const AUDIO_MIN_LEN: usize = HEADER_LEN + AUDIO_SUBHEADERS_LEN + 32;

// Only the motion alert flags we've seen so far
const MOTION_ALERT_FLAGS: [u8; 4] = [0x01, 0x00, 0x00, 0x1e];
// The camera reports this, but doesn't let you change it
const DENOISE_LEVEL: u8 = 50;

#[rustfmt::skip]
pub(crate) const BUILTIN: &[(CommandId, &str, DecodeFn)] = &[
    (CommandId::VideoOn,            "U+P+ID 0",                 video_on),
    (CommandId::AudioOn,            "U+P 2",                    user_pass_reserved),
    (CommandId::AudioOff,           "U+P 3",                    user_pass_reserved),
    (CommandId::UserPass5,          "U+P 5",                    user_pass),
    (CommandId::Login,              "U+P+ID 12",                login),
    (CommandId::LoginCheck,         "keep alive request",       login_check),
    (CommandId::SpeakerOffReply,    "Speaker off reply",        speaker_off_reply),
    (CommandId::AudioIn,            "audio in",                 audio_in),
    (CommandId::LoginCheckReply,    "keep alive answer",        login_check_reply),
    (CommandId::PresetsAndCruises,  "presets, walks and more",  presets_and_cruises),
    (CommandId::PresetListChanged,  "preset points changed",    preset_list_changed),
    (CommandId::CruiseListChanged,  "cruises list changed",     cruise_list_changed),
    (CommandId::MirrorFlip,         "show mirror/flip",         mirror_flip),
    (CommandId::ColorSettings,      "show color settings",      color_settings),
    (CommandId::MotionAlert,        "motion detection alert",   motion_alert),
    (CommandId::PowerFrequency,     "show pwr freq",            power_frequency),
    (CommandId::StreamNo,           "show stream no",           stream_no),
];

/// byte video stream, char64 username, char64 password, int32 uid, char28 padding
fn video_on(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + 1 + USER_LEN + PASS_LEN + 4 + 28)?;
    let mut fields = DecodedFields::new();
    let raw_stream = rd.u8() as u32;
    let stream = VideoStream::from_repr(raw_stream).ok_or(DecodeError::NotInSet {
        field: "video stream",
        value: raw_stream,
        allowed: VideoStream::ALLOWED,
    })?;
    fields.push("video stream", stream.to_string());
    fields.push("username", rd.string("username", USER_LEN)?);
    fields.push("password", rd.string("password", PASS_LEN)?);
    fields.push("uid", rd.u32());
    rd.zeroes("padding", 28)?;
    Ok(fields)
}

/// byte unknown (zero), char64 username, char64 password, char32 padding
fn user_pass_reserved(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + 1 + USER_LEN + PASS_LEN + 32)?;
    let mut fields = DecodedFields::new();
    rd.reserved_u8("unknown", 0)?;
    fields.push("username", rd.string("username", USER_LEN)?);
    fields.push("password", rd.string("password", PASS_LEN)?);
    rd.zeroes("padding", 32)?;
    Ok(fields)
}

/// char64 username, char64 password, char32 padding. Same as Login, but without the uid.
fn user_pass(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + USER_LEN + PASS_LEN + 32)?;
    let mut fields = DecodedFields::new();
    fields.push("username", rd.string("username", USER_LEN)?);
    fields.push("password", rd.string("password", PASS_LEN)?);
    rd.zeroes("padding", 32)?;
    Ok(fields)
}

/// char64 username, char64 password, int32 uid, char32 padding
fn login(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + USER_LEN + PASS_LEN + 4 + 32)?;
    let mut fields = DecodedFields::new();
    fields.push("username", rd.string("username", USER_LEN)?);
    fields.push("password", rd.string("password", PASS_LEN)?);
    fields.push("uid", rd.u32());
    rd.zeroes("padding", 32)?;
    Ok(fields)
}

/// int32 uid
fn login_check(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + 4)?;
    let mut fields = DecodedFields::new();
    fields.push("uid", rd.u32());
    Ok(fields)
}

/// 36 bytes nobody understands yet
fn speaker_off_reply(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + 36)?;
    let mut fields = DecodedFields::new();
    fields.push("data", hex::encode(rd.bytes(36)));
    Ok(fields)
}

/// The raw audio carried by an `AudioIn` frame, clipped to the bytes actually present.
/// Returns `None` for other commands, or when the header can't hold the sub-headers.
pub fn audio_payload(frame: &[u8]) -> Option<&[u8]> {
    let hdr = FrameHeader::parse_checked(frame).ok()?;
    if hdr.command != CommandId::AudioIn {
        return None;
    }
    let audio_len = (hdr.body_len as usize).checked_sub(AUDIO_SUBHEADERS_LEN)?;
    let start = HEADER_LEN + AUDIO_SUBHEADERS_LEN;
    let end = start.saturating_add(audio_len).min(frame.len());
    frame.get(start..end)
}

/// char12 audio header 1, char24 audio header 2, then (body length - 36) bytes of audio
fn audio_in(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::prefix(frame, AUDIO_MIN_LEN)?;
    let body_len = FrameHeader::parse(frame)
        .map_err(|e| DecodeError::Header(e.to_string()))?
        .body_len as usize;
    let audio_len = body_len
        .checked_sub(AUDIO_SUBHEADERS_LEN)
        .ok_or(DecodeError::Length {
            needed: AUDIO_SUBHEADERS_LEN,
            actual: body_len,
            exact: false,
        })?;
    let mut fields = DecodedFields::new();
    fields.push("header 1", hex::encode(rd.bytes(12)));
    fields.push("header 2", hex::encode(rd.bytes(24)));
    fields.push("audio length", audio_len);
    let available = frame.len() - rd.position();
    fields.push("audio available", available.min(audio_len));
    // A capture may hold the start of the next frame right behind this one
    fields.push("trailing", available.saturating_sub(audio_len));
    Ok(fields)
}

/// int32 login result
fn login_check_reply(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + 4)?;
    let raw = rd.u32();
    let result = LoginResult::from_repr(raw).ok_or(DecodeError::NotInSet {
        field: "login result",
        value: raw,
        allowed: LoginResult::ALLOWED,
    })?;
    let mut fields = DecodedFields::new();
    fields.push("login", result.to_string());
    Ok(fields)
}

/// char8 reserved, byte preset count, 16 * char32 preset names, char32 reserved,
/// byte cruise count, 8 * char32 cruise names, char32 reserved, char92 reserved, char12 camera id
///
/// This one is only partially understood, so the reserved parts are not checked and the name
/// slots are read leniently. Only the first `count` slots are reported as names.
fn presets_and_cruises(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::prefix(
        frame,
        HEADER_LEN
            + 8
            + 1
            + PRESET_SLOTS * NAME_SLOT_LEN
            + 32
            + 1
            + CRUISE_SLOTS * NAME_SLOT_LEN
            + 32
            + 92
            + 12,
    )?;
    let mut fields = DecodedFields::new();
    rd.bytes(8);
    let preset_count = rd.u8();
    let presets: Vec<String> = (0..PRESET_SLOTS)
        .map(|_| rd.string_lenient(NAME_SLOT_LEN))
        .collect();
    let preset_reserved = rd.bytes(32);
    let cruise_count = rd.u8();
    let cruises: Vec<String> = (0..CRUISE_SLOTS)
        .map(|_| rd.string_lenient(NAME_SLOT_LEN))
        .collect();
    rd.bytes(32 + 92);
    let camera_id = rd.string_lenient(12);

    fields.push("preset count", preset_count);
    fields.push(
        "presets",
        presets[..(preset_count as usize).min(PRESET_SLOTS)].to_vec(),
    );
    fields.push("preset reserved", hex::encode(preset_reserved));
    fields.push("cruise count", cruise_count);
    fields.push(
        "cruises",
        cruises[..(cruise_count as usize).min(CRUISE_SLOTS)].to_vec(),
    );
    fields.push("camera id", camera_id);
    Ok(fields)
}

/// byte count, `slots` * char32 names, char32 reserved (zero).
/// Every slot is checked and reported, whatever the count says.
fn name_list(frame: &[u8], slots: usize, name: &'static str) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::prefix(frame, HEADER_LEN + 1 + slots * NAME_SLOT_LEN + 32)?;
    let mut fields = DecodedFields::new();
    let count = rd.u8();
    let names = (0..slots)
        .map(|_| rd.string(name, NAME_SLOT_LEN))
        .collect::<Result<Vec<_>, _>>()?;
    rd.zeroes("reserved", 32)?;
    fields.push("count", count);
    fields.push(name, names);
    Ok(fields)
}

fn preset_list_changed(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    name_list(frame, PRESET_SLOTS, "presets")
}

fn cruise_list_changed(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    name_list(frame, CRUISE_SLOTS, "cruises")
}

/// bool mirror, bool flip
fn mirror_flip(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + 2)?;
    let mut fields = DecodedFields::new();
    fields.push("mirror", rd.bool("mirror")?);
    fields.push("flip", rd.bool("flip")?);
    Ok(fields)
}

/// byte brightness, contrast, hue, saturation, sharpness, denoise level (always 50)
fn color_settings(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + 6)?;
    let mut fields = DecodedFields::new();
    for name in ["brightness", "contrast", "hue", "saturation", "sharpness"] {
        fields.push(name, rd.u8());
    }
    fields.push("denoise", rd.reserved_u8("denoise value", DENOISE_LEVEL)?);
    Ok(fields)
}

/// char4 flags
fn motion_alert(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + 4)?;
    rd.expect_bytes("flags", &MOTION_ALERT_FLAGS)?;
    let mut fields = DecodedFields::new();
    fields.push("flags", hex::encode(MOTION_ALERT_FLAGS));
    Ok(fields)
}

/// int32 mode (0: 60 Hz, 1: 50 Hz, 2: outdoor)
fn power_frequency(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + 4)?;
    let raw = rd.u32();
    let freq = PowerFrequency::from_repr(raw).ok_or(DecodeError::NotInSet {
        field: "pwr freq",
        value: raw,
        allowed: PowerFrequency::ALLOWED,
    })?;
    let mut fields = DecodedFields::new();
    fields.push("power frequency", freq.to_string());
    Ok(fields)
}

/// int32 stream
fn stream_no(frame: &[u8]) -> Result<DecodedFields, DecodeError> {
    let mut rd = FieldReader::exact(frame, HEADER_LEN + 4)?;
    let mut fields = DecodedFields::new();
    fields.push("stream", rd.u32());
    Ok(fields)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::commands::{FieldValue, Request};
    use crate::framing::Frame;

    fn padded(s: &str, width: usize) -> Vec<u8> {
        let mut v = s.as_bytes().to_vec();
        v.resize(width, 0);
        v
    }

    fn cmd0_body(stream: u8, user: &str, pass: &str, uid: u32) -> Vec<u8> {
        let mut body = vec![stream];
        body.extend(padded(user, USER_LEN));
        body.extend(padded(pass, PASS_LEN));
        body.extend_from_slice(&uid.to_le_bytes());
        body.extend_from_slice(&[0; 28]);
        body
    }

    fn name_list_body(count: u8, names: &[&str], slots: usize) -> Vec<u8> {
        let mut body = vec![count];
        for i in 0..slots {
            body.extend(padded(names.get(i).copied().unwrap_or(""), NAME_SLOT_LEN));
        }
        body.extend_from_slice(&[0; 32]);
        body
    }

    #[test_log::test]
    fn video_on_ok() {
        let frame = Frame::new(0u32, cmd0_body(1, "admin", "secret", 0xdeadbeef)).to_buf();
        let fields = video_on(&frame).unwrap();
        assert_eq!(fields.get("username").and_then(FieldValue::as_text), Some("admin"));
        assert_eq!(fields.get("password").and_then(FieldValue::as_text), Some("secret"));
        assert_eq!(fields.get("uid").and_then(FieldValue::as_int), Some(0xdeadbeef));
        assert_eq!(fields.get("video stream").and_then(FieldValue::as_text), Some("Sub"));
    }

    #[test_log::test]
    fn video_on_dirty_reserved_block() {
        let mut body = cmd0_body(0, "admin", "secret", 1);
        let last = body.len() - 1;
        body[last] = 0x01;
        let frame = Frame::new(0u32, body).to_buf();
        match video_on(&frame) {
            Err(DecodeError::Padding { field, offset, value }) => {
                assert_eq!(field, "padding");
                assert_eq!(offset, frame.len() - 1);
                assert_eq!(value, 1);
            }
            other => panic!("Expected a padding error, got {:?}", other),
        }
    }

    #[test_log::test]
    fn video_on_username_padding_violation() {
        let mut body = cmd0_body(0, "alice", "secret", 1);
        // Right after "alice\0"
        body[1 + 6] = b'x';
        let frame = Frame::new(0u32, body).to_buf();
        let err = video_on(&frame).unwrap_err();
        assert!(matches!(err, DecodeError::Padding { field: "username", .. }));
    }

    #[test]
    fn video_on_unknown_stream() {
        let frame = Frame::new(0u32, cmd0_body(2, "a", "b", 1)).to_buf();
        assert!(matches!(
            video_on(&frame),
            Err(DecodeError::NotInSet { field: "video stream", value: 2, .. })
        ));
    }

    #[test]
    fn video_on_wrong_length() {
        let mut body = cmd0_body(0, "a", "b", 1);
        body.push(0);
        let frame = Frame::new(0u32, body).to_buf();
        assert!(matches!(
            video_on(&frame),
            Err(DecodeError::Length { needed: 173, actual: 174, exact: true })
        ));
    }

    #[test]
    fn audio_on_reserved_byte() {
        let mut body = vec![0u8];
        body.extend(padded("admin", USER_LEN));
        body.extend(padded("pw", PASS_LEN));
        body.extend_from_slice(&[0; 32]);
        let frame = Frame::new(2u32, body.clone()).to_buf();
        assert!(user_pass_reserved(&frame).is_ok());

        body[0] = 3;
        let frame = Frame::new(2u32, body).to_buf();
        assert_eq!(
            user_pass_reserved(&frame).unwrap_err(),
            DecodeError::Reserved {
                field: "unknown",
                expected: 0,
                actual: 3
            }
        );
    }

    #[test]
    fn login_check_roundtrip() {
        let frame = Frame::from(Request::LoginCheck { uid: 42 }).to_buf();
        let fields = login_check(&frame).unwrap();
        assert_eq!(fields.get("uid").and_then(FieldValue::as_int), Some(42));
    }

    #[test]
    fn login_roundtrip() {
        let frame = Frame::from(Request::Login {
            username: "testadmin".into(),
            password: "testpassword".into(),
            uid: 7,
        })
        .to_buf();
        let fields = login(&frame).unwrap();
        assert_eq!(fields.get("username").and_then(FieldValue::as_text), Some("testadmin"));
        assert_eq!(fields.get("uid").and_then(FieldValue::as_int), Some(7));
    }

    #[test]
    fn login_reply_values() {
        let ok = Frame::new(29u32, 0u32.to_le_bytes().to_vec()).to_buf();
        assert_eq!(
            login_check_reply(&ok).unwrap().get("login").and_then(FieldValue::as_text),
            Some("ok")
        );
        let bad = Frame::new(29u32, 5u32.to_le_bytes().to_vec()).to_buf();
        assert!(matches!(
            login_check_reply(&bad),
            Err(DecodeError::NotInSet { value: 5, .. })
        ));
    }

    #[test]
    fn power_frequency_set() {
        for (raw, name) in [(0u32, "60 Hz"), (1, "50 Hz"), (2, "outdoor")] {
            let frame = Frame::new(112u32, raw.to_le_bytes().to_vec()).to_buf();
            let fields = power_frequency(&frame).unwrap();
            assert_eq!(fields.get("power frequency").and_then(FieldValue::as_text), Some(name));
        }
        let frame = Frame::new(112u32, 3u32.to_le_bytes().to_vec()).to_buf();
        assert!(power_frequency(&frame).is_err());
    }

    #[test]
    fn mirror_flip_bools() {
        let frame = Frame::new(108u32, vec![1, 0]).to_buf();
        let fields = mirror_flip(&frame).unwrap();
        assert_eq!(fields.get("mirror").and_then(FieldValue::as_bool), Some(true));
        assert_eq!(fields.get("flip").and_then(FieldValue::as_bool), Some(false));
        let frame = Frame::new(108u32, vec![0, 2]).to_buf();
        assert!(matches!(
            mirror_flip(&frame),
            Err(DecodeError::NotInSet { field: "flip", .. })
        ));
    }

    #[test]
    fn color_settings_denoise() {
        let frame = Frame::new(110u32, vec![50, 48, 50, 52, 30, 50]).to_buf();
        let fields = color_settings(&frame).unwrap();
        assert_eq!(fields.get("sharpness").and_then(FieldValue::as_int), Some(30));
        let frame = Frame::new(110u32, vec![50, 48, 50, 52, 30, 49]).to_buf();
        assert!(matches!(
            color_settings(&frame),
            Err(DecodeError::Reserved { field: "denoise value", expected: 50, actual: 49 })
        ));
    }

    #[test]
    fn motion_alert_flags() {
        let frame = Frame::new(111u32, MOTION_ALERT_FLAGS.to_vec()).to_buf();
        assert!(motion_alert(&frame).is_ok());
        let frame = Frame::new(111u32, vec![1, 0, 0, 0x1f]).to_buf();
        assert!(matches!(
            motion_alert(&frame),
            Err(DecodeError::BadBytes { field: "flags", .. })
        ));
    }

    #[test]
    fn preset_list_reports_every_slot() {
        let body = name_list_body(2, &["door", "window"], PRESET_SLOTS);
        let frame = Frame::new(106u32, body).to_buf();
        let fields = preset_list_changed(&frame).unwrap();
        assert_eq!(fields.get("count").and_then(FieldValue::as_int), Some(2));
        let presets = fields.get("presets").and_then(FieldValue::as_list).unwrap();
        assert_eq!(presets.len(), PRESET_SLOTS);
        assert_eq!(presets[1].as_text(), Some("window"));
        assert_eq!(presets[2].as_text(), Some(""));
    }

    #[test]
    fn preset_list_checks_slots_past_count() {
        let mut body = name_list_body(1, &["door"], PRESET_SLOTS);
        // Dirty padding in slot 5, which the count says is unused
        body[1 + 5 * NAME_SLOT_LEN + 3] = 0x20;
        body[1 + 5 * NAME_SLOT_LEN + 10] = 0x20;
        let frame = Frame::new(106u32, body).to_buf();
        assert!(matches!(
            preset_list_changed(&frame),
            Err(DecodeError::Padding { field: "presets", .. })
        ));
    }

    #[test]
    fn cruise_list_reserved() {
        let mut body = name_list_body(1, &["tour"], CRUISE_SLOTS);
        let frame = Frame::new(107u32, body.clone()).to_buf();
        let fields = cruise_list_changed(&frame).unwrap();
        assert_eq!(fields.get("cruises").and_then(FieldValue::as_list).map(|l| l.len()), Some(8));

        let last = body.len() - 1;
        body[last] = 9;
        let frame = Frame::new(107u32, body).to_buf();
        assert!(matches!(
            cruise_list_changed(&frame),
            Err(DecodeError::Padding { field: "reserved", .. })
        ));
    }

    #[test]
    fn presets_and_cruises_count_limits_names() {
        let mut body = vec![0xAA; 8];
        body.push(2);
        for i in 0..PRESET_SLOTS {
            // Garbage after the NUL is tolerated here
            let mut slot = padded(&format!("p{}", i), NAME_SLOT_LEN);
            slot[NAME_SLOT_LEN - 1] = 0xFF;
            body.extend(slot);
        }
        body.extend_from_slice(&[0; 32]);
        body.push(1);
        for i in 0..CRUISE_SLOTS {
            body.extend(padded(&format!("c{}", i), NAME_SLOT_LEN));
        }
        body.extend_from_slice(&[0; 32 + 92]);
        body.extend(padded("cam01", 12));
        let frame = Frame::new(100u32, body).to_buf();
        assert_eq!(frame.len(), 958);

        let fields = presets_and_cruises(&frame).unwrap();
        let presets = fields.get("presets").and_then(FieldValue::as_list).unwrap();
        assert_eq!(presets.len(), 2);
        assert_eq!(presets[1].as_text(), Some("p1"));
        let cruises = fields.get("cruises").and_then(FieldValue::as_list).unwrap();
        assert_eq!(cruises.len(), 1);
        assert_eq!(fields.get("camera id").and_then(FieldValue::as_text), Some("cam01"));
    }

    #[test]
    fn audio_in_lengths() {
        let mut body = vec![0x11; AUDIO_SUBHEADERS_LEN];
        body.extend((0..64u8).collect::<Vec<_>>());
        let frame = Frame::new(27u32, body).to_buf();
        let fields = audio_in(&frame).unwrap();
        assert_eq!(fields.get("audio length").and_then(FieldValue::as_int), Some(64));
        assert_eq!(fields.get("trailing").and_then(FieldValue::as_int), Some(0));
        assert_eq!(audio_payload(&frame).unwrap(), &(0..64u8).collect::<Vec<_>>()[..]);

        // Captured packet holding a cut off audio frame
        let cut = &frame[..AUDIO_MIN_LEN];
        assert_eq!(audio_payload(cut).unwrap().len(), 32);
        assert!(audio_in(cut).is_ok());
    }

    #[test]
    fn audio_payload_other_command() {
        let frame = Frame::new(15u32, vec![0; 4]).to_buf();
        assert_eq!(audio_payload(&frame), None);
    }

    #[test]
    fn builtin_ids_are_unique() {
        let mut ids: Vec<u32> = BUILTIN.iter().map(|(id, _, _)| (*id).into()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), BUILTIN.len());
    }
}

//! Passive analysis of captured traffic between a client and the camera.
//!
//! The [`Correlator`](Correlator) looks at one captured packet at a time, keeps the TCP payloads
//! going to or coming from the camera, and runs the ones that start with a FOSC header through
//! the [`CommandRegistry`](crate::commands::CommandRegistry). HTTP requests on the same port are
//! recorded too, so the order of CGI calls and binary commands can be compared.
//!
//! There is no TCP reassembly. A frame split over several packets, or one that doesn't start at
//! the beginning of a packet, is never seen. Large frames (video, audio) are mostly invisible.

mod packet;
mod source;
mod stats;

pub use packet::{http_request_uri, percent_decode, TcpSegment};
pub use source::{
    CaptureError, CaptureEvent, CaptureWriter, CapturedPacket, DropCounters, PacketSource,
    PcapFileSource, ReplaySource,
};
pub use stats::{Seen, Statistics};

use crate::audio::AudioSink;
use crate::commands::{CommandId, CommandRegistry, Outcome};
use crate::framing::{FrameHeader, HEADER_LEN};
use crate::hexdump::{hex_dump, BlockDiff};
use std::collections::BTreeSet;
use std::io::Write;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CorrelatorConfig {
    pub camera: Ipv4Addr,
    /// Never counted nor decoded
    pub ignored_commands: BTreeSet<u32>,
    /// When not empty, only these commands are counted and decoded
    pub focus: BTreeSet<u32>,
    /// Log every observation in full, instead of just the command id
    pub verbose: bool,
}

impl CorrelatorConfig {
    /// Ignores the keep alive request and answer, and the video stream
    pub fn new_simple(camera: Ipv4Addr) -> Self {
        Self::new_custom(
            camera,
            [
                CommandId::LoginCheck,
                CommandId::LoginCheckReply,
                CommandId::VideoIn,
            ]
            .into_iter()
            .map(u32::from)
            .collect(),
            BTreeSet::new(),
            true,
        )
    }

    pub fn new_custom(
        camera: Ipv4Addr,
        ignored_commands: BTreeSet<u32>,
        focus: BTreeSet<u32>,
        verbose: bool,
    ) -> Self {
        Self {
            camera,
            ignored_commands,
            focus,
            verbose,
        }
    }

    fn wants(&self, command: u32) -> bool {
        !self.ignored_commands.contains(&command)
            && (self.focus.is_empty() || self.focus.contains(&command))
    }
}

#[derive(Eq, PartialEq, Debug, Copy, Clone, Display)]
pub enum Direction {
    #[strum(serialize = "Camera -> User")]
    CameraToUser,
    #[strum(serialize = "User -> Camera")]
    UserToCamera,
}

/// Everything the correlator learned from one packet carrying a FOSC frame
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Observation {
    pub src: SocketAddrV4,
    pub dst: SocketAddrV4,
    pub direction: Direction,
    /// Position of the packet in the capture, starting at 1
    pub number: u64,
    /// Relative to the first packet of the capture
    pub timestamp: Duration,
    pub command: u32,
    pub description: String,
    /// TCP payload length
    pub payload_len: usize,
    /// Body length announced by the header
    pub body_len: u32,
    /// Bytes after the end of the frame. Usually the start of another frame.
    pub trailing: Vec<u8>,
    pub outcome: Outcome,
    /// Compared to the first payload seen for the same command
    pub diff: BlockDiff,
}

impl Observation {
    /// The packet doesn't hold exactly one frame
    pub fn length_mismatch(&self) -> bool {
        self.body_len as usize + HEADER_LEN != self.payload_len
    }
}

impl std::fmt::Display for Observation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{} -> {}", self.src, self.dst)?;
        writeln!(f, "{}", self.direction)?;
        writeln!(f, "#{} @ {:.6}:", self.number, self.timestamp.as_secs_f64())?;
        writeln!(f, "command {}: {}", self.command, self.description)?;
        writeln!(f, "tcp data length: {}", self.payload_len)?;
        write!(f, "datalen {}", self.body_len)?;
        if self.length_mismatch() {
            write!(
                f,
                "\nPacket length mismatch! Multiple commands in one packet/one command in multiple packets?"
            )?;
        }
        match &self.outcome {
            Outcome::Decoded(fields) => write!(f, "\n{}", fields)?,
            Outcome::Invalid(e) => write!(f, "\n*** Decode error: {}", e)?,
            Outcome::Unhandled { dump } => write!(f, "\n{}", dump)?,
        }
        if !self.trailing.is_empty() {
            write!(f, "\nAdditional data:\n{}", hex_dump(&self.trailing, &[]))?;
        }
        Ok(())
    }
}

/// Matches captured packets against the command registry and keeps [`Statistics`](Statistics)
pub struct Correlator {
    registry: Arc<CommandRegistry>,
    config: CorrelatorConfig,
    stats: Statistics,
    first_timestamp: Option<Duration>,
    audio: AudioSink,
}

impl Correlator {
    pub fn new(registry: Arc<CommandRegistry>, config: CorrelatorConfig) -> Self {
        Self {
            registry,
            config,
            stats: Statistics::new(),
            first_timestamp: None,
            audio: AudioSink::closed(),
        }
    }

    pub fn config(&self) -> &CorrelatorConfig {
        &self.config
    }

    pub fn stats(&self) -> &Statistics {
        &self.stats
    }

    pub fn into_stats(self) -> Statistics {
        self.stats
    }

    /// Audio of captured `AudioIn` frames goes here while it's open
    pub fn audio_mut(&mut self) -> &mut AudioSink {
        &mut self.audio
    }

    /// Looks at one link-layer frame. Returns an [`Observation`](Observation) if it carried a FOSC
    /// frame that was counted, `None` for everything else (HTTP requests are still recorded).
    pub fn process_packet(&mut self, packet: &CapturedPacket) -> Option<Observation> {
        self.stats.count_packet();
        let number = self.stats.packets();
        let first = *self.first_timestamp.get_or_insert(packet.timestamp);
        let timestamp = packet.timestamp.saturating_sub(first);

        let seg = TcpSegment::parse(&packet.data)?;
        if !seg.involves(self.config.camera) {
            return None;
        }
        let payload = seg.payload;

        if let Some(uri) = http_request_uri(payload) {
            info!("URL-Req: {}", uri);
            self.stats.record_request(uri);
            return None;
        }

        let hdr = match FrameHeader::parse_checked(payload) {
            Ok(hdr) => hdr,
            Err(e) => {
                trace!("Packet #{} is not a FOSC frame: {}", number, e);
                return None;
            }
        };
        if !self.config.wants(hdr.command) {
            trace!("Skipping command {} in packet #{}", hdr.command, number);
            return None;
        }

        let frame_end = payload.len().min(HEADER_LEN + hdr.body_len as usize);
        let (frame, trailing) = payload.split_at(frame_end);
        let diff = self.stats.record_command(hdr.command, payload);
        let outcome = self.registry.dispatch(frame);
        match &outcome {
            Outcome::Decoded(_) => {}
            Outcome::Invalid(_) => self.stats.record_error(hdr.command),
            Outcome::Unhandled { .. } => self.stats.record_unhandled(hdr.command),
        }
        if let Err(e) = self.audio.append(frame) {
            warn!("Failed to write to audio sink: {}", e);
        }

        let direction = if *seg.src.ip() == self.config.camera {
            Direction::CameraToUser
        } else {
            Direction::UserToCamera
        };
        let obs = Observation {
            src: seg.src,
            dst: seg.dst,
            direction,
            number,
            timestamp,
            command: hdr.command,
            description: self.registry.description(hdr.command).to_owned(),
            payload_len: payload.len(),
            body_len: hdr.body_len,
            trailing: trailing.to_vec(),
            outcome,
            diff,
        };
        if self.config.verbose {
            info!("\n{}", obs);
        } else {
            info!("{}", obs.command);
        }
        Some(obs)
    }

    /// Processes a stored capture until it's exhausted
    pub fn run_offline<S: PacketSource>(&mut self, source: &mut S) -> Result<(), CaptureError> {
        loop {
            match source.next_event()? {
                CaptureEvent::Packet(packet) => {
                    self.process_packet(&packet);
                }
                CaptureEvent::Timeout => continue,
                CaptureEvent::Exhausted => break,
            }
        }
        debug!("Capture exhausted after {} packets", self.stats.packets());
        Ok(())
    }

    /// Processes packets until `cancel` is triggered or the source runs dry,
    /// optionally recording every packet (matching or not) to `recorder`.
    /// Returns the source's drop counters.
    pub fn run_live<S, W>(
        &mut self,
        source: &mut S,
        mut recorder: Option<&mut CaptureWriter<W>>,
        cancel: &CancellationToken,
    ) -> Result<Option<DropCounters>, CaptureError>
    where
        S: PacketSource,
        W: Write,
    {
        loop {
            if cancel.is_cancelled() {
                info!("shutting down");
                break;
            }
            match source.next_event()? {
                CaptureEvent::Packet(packet) => {
                    if let Some(recorder) = recorder.as_mut() {
                        recorder.write_packet(&packet)?;
                    }
                    self.process_packet(&packet);
                }
                CaptureEvent::Timeout => continue,
                CaptureEvent::Exhausted => {
                    warn!("Live source ended on its own");
                    break;
                }
            }
        }
        let counters = source.drop_counters();
        if let Some(counters) = &counters {
            info!("{}", counters);
        }
        Ok(counters)
    }
}

#[cfg(test)]
mod test {
    use super::packet::test::{addr, tcp_packet};
    use super::*;
    use crate::commands::{DecodeError, FieldValue, Request, AUDIO_SUBHEADERS_LEN};
    use crate::framing::Frame;
    use anyhow::Result;
    use std::io::Cursor;

    const CAMERA: &str = "192.168.0.102:88";
    const CLIENT: &str = "192.168.0.10:50123";

    fn correlator() -> Correlator {
        Correlator::new(
            Arc::new(CommandRegistry::default()),
            CorrelatorConfig::new_simple(addr(CAMERA).ip().to_owned()),
        )
    }

    fn from_camera(secs: u64, payload: &[u8]) -> CapturedPacket {
        CapturedPacket::new(
            Duration::from_secs(secs),
            tcp_packet(addr(CAMERA), addr(CLIENT), payload),
        )
    }

    fn to_camera(secs: u64, payload: &[u8]) -> CapturedPacket {
        CapturedPacket::new(
            Duration::from_secs(secs),
            tcp_packet(addr(CLIENT), addr(CAMERA), payload),
        )
    }

    fn preset_list() -> Vec<u8> {
        Frame::new(CommandId::PresetListChanged, vec![0; 545]).to_buf()
    }

    #[test_log::test]
    fn identical_payloads_are_flagged_equal() {
        let mut cor = correlator();
        let first = cor.process_packet(&from_camera(100, &preset_list())).unwrap();
        let second = cor.process_packet(&from_camera(103, &preset_list())).unwrap();
        assert!(matches!(first.outcome, Outcome::Decoded(_)));
        assert_eq!(second.diff, BlockDiff::Same);
        assert_eq!(second.number, 2);
        assert_eq!(second.timestamp, Duration::from_secs(3));
        assert_eq!(cor.stats().all_equal(106), Some(true));
        assert_eq!(cor.stats().count(106), 2);
    }

    #[test_log::test]
    fn changed_payload_is_highlighted() {
        let mut cor = correlator();
        cor.process_packet(&from_camera(0, &preset_list()));
        let mut changed = preset_list();
        changed[HEADER_LEN] = 1;
        let obs = cor.process_packet(&from_camera(1, &changed)).unwrap();
        assert_eq!(obs.diff, BlockDiff::Differs(vec![HEADER_LEN]));
        assert_eq!(cor.stats().all_equal(106), Some(false));
    }

    #[test_log::test]
    fn observation_fields() {
        let mut cor = correlator();
        let frame = Frame::new(CommandId::PowerFrequency, 1u32.to_le_bytes().to_vec()).to_buf();
        let obs = cor.process_packet(&from_camera(0, &frame)).unwrap();
        assert_eq!(obs.direction, Direction::CameraToUser);
        assert_eq!(obs.src, addr(CAMERA));
        assert_eq!(obs.description, "show pwr freq");
        assert_eq!(obs.payload_len, 16);
        assert_eq!(obs.body_len, 4);
        assert!(!obs.length_mismatch());
        assert!(obs.trailing.is_empty());
        match &obs.outcome {
            Outcome::Decoded(fields) => {
                assert_eq!(fields.get("power frequency"), Some(&FieldValue::from("50 Hz")))
            }
            other => panic!("Unexpected outcome {:?}", other),
        }
        let text = obs.to_string();
        assert!(text.starts_with("192.168.0.102:88 -> 192.168.0.10:50123\nCamera -> User\n#1 @ 0.000000:\ncommand 112: show pwr freq"));
    }

    #[test_log::test]
    fn two_frames_in_one_packet() {
        let mut cor = correlator();
        let mut payload = Frame::new(CommandId::StreamNo, 0u32.to_le_bytes().to_vec()).to_buf();
        let second = Frame::new(CommandId::StreamNo, 1u32.to_le_bytes().to_vec()).to_buf();
        payload.extend_from_slice(&second);
        let obs = cor.process_packet(&to_camera(0, &payload)).unwrap();
        assert_eq!(obs.direction, Direction::UserToCamera);
        assert!(obs.length_mismatch());
        assert!(matches!(obs.outcome, Outcome::Decoded(_)));
        assert_eq!(obs.trailing, second);
        assert!(obs.to_string().contains("Packet length mismatch!"));
    }

    #[test_log::test]
    fn invalid_and_unhandled_are_recorded() {
        let mut cor = correlator();
        let bad = Frame::new(CommandId::PowerFrequency, 5u32.to_le_bytes().to_vec()).to_buf();
        let obs = cor.process_packet(&from_camera(0, &bad)).unwrap();
        assert!(matches!(obs.outcome, Outcome::Invalid(DecodeError::NotInSet { .. })));
        cor.process_packet(&from_camera(0, &Frame::new(4242u32, vec![1, 2]).to_buf()));
        assert_eq!(cor.stats().errors(), &BTreeSet::from([112]));
        assert_eq!(cor.stats().unhandled(), &BTreeSet::from([4242]));
    }

    #[test_log::test]
    fn unrelated_traffic_is_ignored() {
        let mut cor = correlator();
        let other = CapturedPacket::new(
            Duration::ZERO,
            tcp_packet(addr("10.0.0.1:1000"), addr("10.0.0.2:88"), &preset_list()),
        );
        assert_eq!(cor.process_packet(&other), None);
        // Too short for a header
        assert_eq!(cor.process_packet(&from_camera(0, b"\x00\x00\x00\x00FOSC")), None);
        // Bad magic
        let mut bad = preset_list();
        bad[4..8].copy_from_slice(b"FOSX");
        assert_eq!(cor.process_packet(&from_camera(0, &bad)), None);
        // Not even IP
        assert_eq!(cor.process_packet(&CapturedPacket::new(Duration::ZERO, vec![0; 60])), None);
        assert_eq!(cor.stats().packets(), 4);
        assert_eq!(cor.stats().shown(), 0);
    }

    #[test_log::test]
    fn keep_alives_are_ignored_by_default() {
        let mut cor = correlator();
        let keep_alive = Frame::from(Request::LoginCheck { uid: 1 }).to_buf();
        assert_eq!(cor.process_packet(&to_camera(0, &keep_alive)), None);
        assert_eq!(cor.stats().count(15), 0);
    }

    #[test_log::test]
    fn focus_limits_commands() {
        let mut cor = Correlator::new(
            Arc::new(CommandRegistry::default()),
            CorrelatorConfig::new_custom(
                addr(CAMERA).ip().to_owned(),
                BTreeSet::new(),
                BTreeSet::from([106, 107]),
                false,
            ),
        );
        let stream = Frame::new(CommandId::StreamNo, 0u32.to_le_bytes().to_vec()).to_buf();
        assert_eq!(cor.process_packet(&from_camera(0, &stream)), None);
        assert!(cor.process_packet(&from_camera(0, &preset_list())).is_some());
    }

    #[test_log::test]
    fn http_requests_join_the_order() {
        let mut cor = correlator();
        let req = b"GET /cgi-bin/CGIProxy.fcgi?cmd=setMirrorAndFlipSetting%26isMirror%3D1 HTTP/1.1\r\n\r\n";
        assert_eq!(cor.process_packet(&to_camera(0, req)), None);
        cor.process_packet(&from_camera(1, &preset_list()));
        assert_eq!(
            cor.stats().order(),
            &[
                Seen::Request("/cgi-bin/CGIProxy.fcgi?cmd=setMirrorAndFlipSetting&isMirror=1".into()),
                Seen::Command(106),
            ]
        );
        assert_eq!(cor.stats().requests(), 1);
    }

    #[test_log::test]
    fn audio_reaches_the_sink() -> Result<()> {
        use std::sync::Mutex;

        #[derive(Clone, Default)]
        struct Shared(Arc<Mutex<Vec<u8>>>);
        impl std::io::Write for Shared {
            fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }
            fn flush(&mut self) -> std::io::Result<()> {
                Ok(())
            }
        }

        let mut cor = correlator();
        let out = Shared::default();
        cor.audio_mut().open(out.clone())?;
        let mut body = vec![0; AUDIO_SUBHEADERS_LEN];
        body.extend_from_slice(&[0x42; 64]);
        cor.process_packet(&from_camera(0, &Frame::new(CommandId::AudioIn, body).to_buf()));
        assert_eq!(&out.0.lock().unwrap()[..], &[0x42; 64][..]);
        Ok(())
    }

    #[test_log::test]
    fn offline_capture() -> Result<()> {
        let mut writer = CaptureWriter::new(Vec::new())?;
        writer.write_packet(&from_camera(10, &preset_list()))?;
        writer.write_packet(&to_camera(11, b"GET /x HTTP/1.0\r\n"))?;
        writer.write_packet(&from_camera(12, &preset_list()))?;
        let file = writer.into_inner()?;

        let mut cor = correlator();
        cor.run_offline(&mut PcapFileSource::new(Cursor::new(file))?)?;
        let stats = cor.into_stats();
        assert_eq!(stats.packets(), 3);
        assert_eq!(stats.count(106), 2);
        assert_eq!(stats.all_equal(106), Some(true));
        assert_eq!(stats.order().len(), 3);
        Ok(())
    }

    /// Never runs dry, cancels the session on its own after a few reads
    struct Interrupted {
        cancel: CancellationToken,
        reads: usize,
    }

    impl PacketSource for Interrupted {
        fn next_event(&mut self) -> Result<CaptureEvent, CaptureError> {
            self.reads += 1;
            match self.reads {
                1 => Ok(CaptureEvent::Packet(from_camera(0, &preset_list()))),
                2 => Ok(CaptureEvent::Timeout),
                3 => {
                    self.cancel.cancel();
                    Ok(CaptureEvent::Packet(from_camera(1, b"not fosc")))
                }
                _ => panic!("Read after cancellation"),
            }
        }

        fn drop_counters(&self) -> Option<DropCounters> {
            Some(DropCounters {
                received: 2,
                dropped: 0,
                if_dropped: 1,
            })
        }
    }

    #[test_log::test]
    fn live_capture_until_cancelled() -> Result<()> {
        let cancel = CancellationToken::new();
        let mut source = Interrupted {
            cancel: cancel.clone(),
            reads: 0,
        };
        let mut recorder = CaptureWriter::new(Vec::new())?;
        let mut cor = correlator();
        let counters = cor.run_live(&mut source, Some(&mut recorder), &cancel)?;
        assert_eq!(counters.map(|c| c.if_dropped), Some(1));
        assert_eq!(recorder.count(), 2);
        assert_eq!(cor.stats().packets(), 2);
        assert_eq!(cor.stats().shown(), 1);

        // The recording replays to the same result
        let mut replay = correlator();
        replay.run_offline(&mut PcapFileSource::new(Cursor::new(recorder.into_inner()?))?)?;
        assert_eq!(replay.stats().count(106), 1);
        Ok(())
    }
}

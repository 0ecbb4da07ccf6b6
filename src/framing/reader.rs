use crate::audio::AudioSink;
use crate::commands::{CommandRegistry, Outcome};
use crate::framing::{Frame, FrameHeader, FramingError, HEADER_LEN};
use crate::hexdump::hex_dump;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use strum_macros::Display;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(1);
const DEFAULT_RESYNC_CHUNK: usize = 2000;
// Video frames are the largest thing we've seen, and they're well below this
const DEFAULT_MAX_BODY_LEN: usize = 1024 * 1024;

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ReaderConfig {
    /// Upper bound on a single read. Also bounds how long a cancelled reader takes to stop.
    pub read_timeout: Duration,
    /// How much noise is thrown away per read while resyncing
    pub resync_chunk: usize,
    /// Headers announcing a larger body are treated as corrupt
    pub max_body_len: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::new_simple()
    }
}

impl ReaderConfig {
    /// One second read timeout, like the official plugin
    pub fn new_simple() -> Self {
        Self {
            read_timeout: DEFAULT_READ_TIMEOUT,
            resync_chunk: DEFAULT_RESYNC_CHUNK,
            max_body_len: DEFAULT_MAX_BODY_LEN,
        }
    }

    pub fn new_custom(read_timeout: Duration, resync_chunk: usize, max_body_len: usize) -> Self {
        Self {
            read_timeout,
            resync_chunk: resync_chunk.max(1),
            max_body_len,
        }
    }
}

#[derive(Eq, PartialEq, Debug, Copy, Clone, Display)]
pub enum ReaderState {
    /// Waiting for the 12 header bytes
    AwaitHeader,
    /// Got a good header, accumulating the body
    ReadBody,
    /// Lost track of the framing, throwing incoming bytes away until the stream goes quiet
    Resync,
    /// The peer closed the stream
    Closed,
}

/// What the reader saw over its lifetime
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ReaderStats {
    /// Command ids of every good header, in arrival order
    pub sequence: Vec<u32>,
    /// Frames fully received and dispatched
    pub frames: usize,
    pub resync_count: usize,
    /// Commands that failed to decode at least once
    pub errors: BTreeSet<u32>,
    /// Commands without a decoder
    pub unhandled: BTreeSet<u32>,
}

/// The result of one [`FrameReader::step`](FrameReader::step)
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Step {
    /// The read timed out
    Idle,
    /// Got some bytes, but not a full frame yet
    Progress,
    /// A complete frame, and what the registry made of it
    Frame { frame: Frame, outcome: Outcome },
    /// Bytes were thrown away while out of sync
    Resync { discarded: usize },
    Closed,
}

/// Pulls frames out of a byte stream and dispatches them to a [`CommandRegistry`](CommandRegistry).
///
/// Reads are bounded by [`ReaderConfig::read_timeout`](ReaderConfig::read_timeout). A timeout is
/// not an error, it's how the reader notices cancellation and how it leaves the resync state.
///
/// There's no magic scanning when a header is corrupt: we drop whatever arrives until the stream
/// goes quiet for one timeout, then expect the next bytes to start a real header.
/// That's good enough against the camera, which only sends complete frames.
pub struct FrameReader<R> {
    io: R,
    registry: Arc<CommandRegistry>,
    config: ReaderConfig,
    state: ReaderState,
    header: [u8; HEADER_LEN],
    header_len: usize,
    command: u32,
    body: Vec<u8>,
    remaining: usize,
    stats: ReaderStats,
    audio: AudioSink,
}

impl<R> FrameReader<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new(io: R, registry: Arc<CommandRegistry>) -> Self {
        Self::with_config(io, registry, ReaderConfig::default())
    }

    pub fn with_config(io: R, registry: Arc<CommandRegistry>, config: ReaderConfig) -> Self {
        Self {
            io,
            registry,
            config,
            state: ReaderState::AwaitHeader,
            header: [0; HEADER_LEN],
            header_len: 0,
            command: 0,
            body: Vec::new(),
            remaining: 0,
            stats: ReaderStats::default(),
            audio: AudioSink::closed(),
        }
    }

    pub fn state(&self) -> ReaderState {
        self.state
    }

    pub fn stats(&self) -> &ReaderStats {
        &self.stats
    }

    /// Received `AudioIn` payloads go here while it's open
    pub fn audio_mut(&mut self) -> &mut AudioSink {
        &mut self.audio
    }

    /// Stop discarding bytes and expect a header right away
    pub fn retry(&mut self) {
        if self.state == ReaderState::Resync {
            debug!("Resync abandoned on request, awaiting header");
            self.state = ReaderState::AwaitHeader;
        }
    }

    pub fn into_stats(self) -> ReaderStats {
        self.stats
    }

    /// Reads and dispatches frames until the peer closes the stream or `cancel` is triggered.
    ///
    /// The token is checked once per read, so stopping takes at most one read timeout.
    /// Only IO errors end the loop early, decode failures are logged and skipped.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<(), FramingError> {
        loop {
            if cancel.is_cancelled() {
                debug!("Frame reader cancelled in state {}", self.state);
                break;
            }
            if let Step::Closed = self.step().await? {
                break;
            }
        }
        if self.stats.resync_count > 0 {
            warn!("Fell out of sync {} time(s)", self.stats.resync_count);
        }
        debug!("Sequence of incoming frames: {:?}", self.stats.sequence);
        Ok(())
    }

    /// Do one bounded read and advance the state machine
    pub async fn step(&mut self) -> Result<Step, FramingError> {
        match self.state {
            ReaderState::AwaitHeader => self.read_header().await,
            ReaderState::ReadBody => self.read_body().await,
            ReaderState::Resync => self.discard().await,
            ReaderState::Closed => Ok(Step::Closed),
        }
    }

    /// `None` on timeout
    async fn timed_read(
        io: &mut R,
        timeout: Duration,
        buf: &mut [u8],
    ) -> Result<Option<usize>, FramingError> {
        match tokio::time::timeout(timeout, io.read(buf)).await {
            Ok(res) => Ok(Some(res?)),
            Err(_) => Ok(None),
        }
    }

    fn close(&mut self) -> Step {
        debug!("Connection closed by peer");
        self.state = ReaderState::Closed;
        Step::Closed
    }

    fn enter_resync(&mut self, reason: FramingError) -> Step {
        warn!(
            "Resync after {}:\n{}",
            reason,
            hex_dump(&self.header[..self.header_len], &[])
        );
        self.stats.resync_count += 1;
        let discarded = self.header_len;
        self.header_len = 0;
        self.state = ReaderState::Resync;
        Step::Resync { discarded }
    }

    async fn read_header(&mut self) -> Result<Step, FramingError> {
        let n = match Self::timed_read(
            &mut self.io,
            self.config.read_timeout,
            &mut self.header[self.header_len..],
        )
        .await?
        {
            Some(n) => n,
            None => {
                if self.header_len > 0 {
                    let e = FramingError::ShortHeader(self.header_len);
                    warn!(
                        "Dropping partial header, {}:\n{}",
                        e,
                        hex_dump(&self.header[..self.header_len], &[])
                    );
                    self.header_len = 0;
                }
                return Ok(Step::Idle);
            }
        };
        if n == 0 {
            if self.header_len > 0 {
                warn!("{}", FramingError::ShortHeader(self.header_len));
            }
            return Ok(self.close());
        }
        self.header_len += n;
        if self.header_len < HEADER_LEN {
            return Ok(Step::Progress);
        }

        let hdr = match FrameHeader::parse_checked(&self.header) {
            Ok(hdr) => hdr,
            Err(e) => return Ok(self.enter_resync(e)),
        };
        if hdr.body_len as usize > self.config.max_body_len {
            return Ok(self.enter_resync(FramingError::BodyTooLarge {
                announced: hdr.body_len as usize,
                limit: self.config.max_body_len,
            }));
        }
        self.header_len = 0;
        self.stats.sequence.push(hdr.command);
        trace!(
            "Incoming command {} with {:#x} bytes body",
            hdr.command,
            hdr.body_len
        );

        self.command = hdr.command;
        self.body.clear();
        self.remaining = hdr.body_len as usize;
        if self.remaining == 0 {
            return Ok(self.finish_frame());
        }
        self.state = ReaderState::ReadBody;
        Ok(Step::Progress)
    }

    async fn read_body(&mut self) -> Result<Step, FramingError> {
        let start = self.body.len();
        self.body.resize(start + self.remaining, 0);
        let read = Self::timed_read(
            &mut self.io,
            self.config.read_timeout,
            &mut self.body[start..],
        )
        .await;
        let n = match read {
            Ok(Some(n)) => n,
            Ok(None) => {
                // Slow peer, keep what we have and wait some more
                self.body.truncate(start);
                return Ok(Step::Idle);
            }
            Err(e) => {
                self.body.truncate(start);
                return Err(e);
            }
        };
        self.body.truncate(start + n);
        if n == 0 {
            error!(
                "{}",
                FramingError::ClosedMidFrame {
                    remaining: self.remaining
                }
            );
            return Ok(self.close());
        }
        self.remaining -= n;
        trace!("{:#x} body bytes remaining", self.remaining);
        if self.remaining > 0 {
            return Ok(Step::Progress);
        }
        Ok(self.finish_frame())
    }

    async fn discard(&mut self) -> Result<Step, FramingError> {
        let mut scratch = vec![0; self.config.resync_chunk];
        match Self::timed_read(&mut self.io, self.config.read_timeout, &mut scratch).await? {
            None => {
                debug!("Stream went quiet, awaiting header");
                self.state = ReaderState::AwaitHeader;
                Ok(Step::Idle)
            }
            Some(0) => Ok(self.close()),
            Some(n) => {
                debug!("Discarding {:#x} bytes:\n{}", n, hex_dump(&scratch[..n], &[]));
                Ok(Step::Resync { discarded: n })
            }
        }
    }

    fn finish_frame(&mut self) -> Step {
        self.state = ReaderState::AwaitHeader;
        let command = self.command;
        let frame = Frame::new(command, std::mem::take(&mut self.body));
        let buf = frame.to_buf();
        let outcome = self.registry.dispatch(&buf);
        self.stats.frames += 1;
        match &outcome {
            Outcome::Decoded(_) => {}
            Outcome::Invalid(_) => {
                self.stats.errors.insert(command);
            }
            Outcome::Unhandled { .. } => {
                self.stats.unhandled.insert(command);
            }
        }
        if let Err(e) = self.audio.append(&buf) {
            error!("Failed to write to audio sink: {}", e);
        }
        Step::Frame { frame, outcome }
    }
}

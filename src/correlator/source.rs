//! Where captured packets come from, and where they go when a live capture is recorded

use byteorder::{WriteBytesExt, LE};
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{LegacyPcapReader, Linktype, PcapBlockOwned, PcapError};
use std::collections::VecDeque;
use std::io::{Read, Write};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace, warn};

const PCAP_MAGIC_USEC: u32 = 0xa1b2_c3d4;
const PCAP_MAGIC_NSEC: u32 = 0xa1b2_3c4d;
const PCAP_MAGIC_NSEC_SWAPPED: u32 = 0x4d3c_b2a1;
const PCAP_VERSION: (u16, u16) = (2, 4);
const SNAPLEN: u32 = 65535;
// Must hold one full-snaplen record (16 byte header + SNAPLEN)
const READ_BUFFER_LEN: usize = 1 << 17;
// Captures from other tools may use a larger snaplen
const MAX_READ_BUFFER_LEN: usize = 1 << 22;

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture parse error: {0}")]
    Pcap(String),
    #[error("Unsupported link type {0}, only Ethernet captures can be correlated")]
    Linktype(i32),
    #[error("Capture ends with a truncated record ({pending} bytes left over)")]
    Truncated { pending: usize },
    #[error("Capture IO error")]
    Io {
        #[from]
        source: std::io::Error,
    },
}

/// One link-layer frame, as the capture saw it
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CapturedPacket {
    /// Capture time since the Unix epoch
    pub timestamp: Duration,
    /// Length on the wire, `data` may be shorter if the snap length cut it
    pub orig_len: u32,
    pub data: Vec<u8>,
}

impl CapturedPacket {
    pub fn new(timestamp: Duration, data: Vec<u8>) -> Self {
        Self {
            timestamp,
            orig_len: data.len() as u32,
            data,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum CaptureEvent {
    Packet(CapturedPacket),
    /// Nothing arrived before the source's own timeout. Live sources only.
    Timeout,
    /// No more packets will ever come
    Exhausted,
}

/// What the capture device reports when a live session ends
#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct DropCounters {
    pub received: u64,
    pub dropped: u64,
    pub if_dropped: u64,
}

impl std::fmt::Display for DropCounters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} packets received, {} packets dropped, {} packets dropped by interface",
            self.received, self.dropped, self.if_dropped
        )
    }
}

/// A stream of captured link-layer frames.
///
/// Live capture backends implement this on top of their device handle. `next_event` should
/// block for at most a short timeout and return [`CaptureEvent::Timeout`](CaptureEvent::Timeout)
/// so that the caller gets a chance to notice cancellation.
pub trait PacketSource {
    fn next_event(&mut self) -> Result<CaptureEvent, CaptureError>;

    /// Interface level counters, only meaningful for live sources
    fn drop_counters(&self) -> Option<DropCounters> {
        None
    }
}

/// Reads a legacy (non-ng) pcap file of Ethernet frames
pub struct PcapFileSource<R: Read> {
    reader: LegacyPcapReader<R>,
    buffer_len: usize,
    nanosecond: bool,
    count: u64,
}

impl<R: Read> PcapFileSource<R> {
    pub fn new(input: R) -> Result<Self, CaptureError> {
        let reader = LegacyPcapReader::new(READ_BUFFER_LEN, input)
            .map_err(|e| CaptureError::Pcap(format!("Not a legacy pcap file: {:?}", e)))?;
        Ok(Self {
            reader,
            buffer_len: READ_BUFFER_LEN,
            nanosecond: false,
            count: 0,
        })
    }

    /// Packets returned so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Reads more of the capture after the parser asked for more data
    fn refill(&mut self) -> Result<(), CaptureError> {
        if self.reader.reader_exhausted() {
            // The parser reports Eof by itself when nothing is left
            return Err(CaptureError::Truncated {
                pending: self.reader.data().len(),
            });
        }
        let pending = self.reader.data().len();
        self.reader
            .refill()
            .map_err(|e| CaptureError::Pcap(format!("Refill error: {:?}", e)))?;
        if self.reader.data().len() > pending || self.reader.reader_exhausted() {
            return Ok(());
        }

        // The buffer is full and still doesn't hold a whole record
        let grown = self.buffer_len * 2;
        if grown > MAX_READ_BUFFER_LEN || !self.reader.grow(grown) {
            return Err(CaptureError::Pcap(format!(
                "Record larger than the {:#x} byte read buffer",
                self.buffer_len
            )));
        }
        debug!("Read buffer grown to {:#x} bytes", grown);
        self.buffer_len = grown;
        Ok(())
    }
}

impl<R: Read> PacketSource for PcapFileSource<R> {
    fn next_event(&mut self) -> Result<CaptureEvent, CaptureError> {
        loop {
            match self.reader.next() {
                Ok((offset, block)) => {
                    let packet = match block {
                        PcapBlockOwned::LegacyHeader(hdr) => {
                            if hdr.network != Linktype::ETHERNET {
                                return Err(CaptureError::Linktype(hdr.network.0));
                            }
                            self.nanosecond = hdr.magic_number == PCAP_MAGIC_NSEC
                                || hdr.magic_number == PCAP_MAGIC_NSEC_SWAPPED;
                            debug!(
                                "pcap v{}.{}, snaplen {}",
                                hdr.version_major, hdr.version_minor, hdr.snaplen
                            );
                            None
                        }
                        PcapBlockOwned::Legacy(b) => {
                            let frac = if self.nanosecond {
                                b.ts_usec
                            } else {
                                b.ts_usec.saturating_mul(1000)
                            };
                            Some(CapturedPacket {
                                timestamp: Duration::new(b.ts_sec as u64, 0)
                                    + Duration::from_nanos(frac as u64),
                                orig_len: b.origlen,
                                data: b.data.to_vec(),
                            })
                        }
                        PcapBlockOwned::NG(_) => {
                            warn!("pcapng block encountered, only legacy pcap is supported");
                            None
                        }
                    };
                    self.reader.consume(offset);
                    if let Some(packet) = packet {
                        self.count += 1;
                        return Ok(CaptureEvent::Packet(packet));
                    }
                }
                Err(PcapError::Eof) => return Ok(CaptureEvent::Exhausted),
                Err(PcapError::Incomplete) => self.refill()?,
                Err(e) => return Err(CaptureError::Pcap(format!("{:?}", e))),
            }
        }
    }
}

/// Replays packets from memory, handy to feed packets from a backend that isn't a [`PacketSource`](PacketSource)
#[derive(Debug, Clone, Default)]
pub struct ReplaySource {
    events: VecDeque<CaptureEvent>,
    counters: Option<DropCounters>,
}

impl ReplaySource {
    pub fn new(packets: impl IntoIterator<Item = CapturedPacket>) -> Self {
        Self {
            events: packets.into_iter().map(CaptureEvent::Packet).collect(),
            counters: None,
        }
    }

    pub fn push(&mut self, event: CaptureEvent) {
        self.events.push_back(event);
    }

    pub fn set_drop_counters(&mut self, counters: DropCounters) {
        self.counters = Some(counters);
    }
}

impl PacketSource for ReplaySource {
    fn next_event(&mut self) -> Result<CaptureEvent, CaptureError> {
        Ok(self.events.pop_front().unwrap_or(CaptureEvent::Exhausted))
    }

    fn drop_counters(&self) -> Option<DropCounters> {
        self.counters
    }
}

/// Writes a legacy pcap file (microsecond timestamps, Ethernet)
pub struct CaptureWriter<W: Write> {
    out: W,
    count: u64,
}

impl<W: Write> CaptureWriter<W> {
    /// Writes the global header right away
    pub fn new(mut out: W) -> Result<Self, CaptureError> {
        out.write_u32::<LE>(PCAP_MAGIC_USEC)?;
        out.write_u16::<LE>(PCAP_VERSION.0)?;
        out.write_u16::<LE>(PCAP_VERSION.1)?;
        out.write_i32::<LE>(0)?;
        out.write_u32::<LE>(0)?;
        out.write_u32::<LE>(SNAPLEN)?;
        out.write_u32::<LE>(Linktype::ETHERNET.0 as u32)?;
        Ok(Self { out, count: 0 })
    }

    pub fn write_packet(&mut self, packet: &CapturedPacket) -> Result<(), CaptureError> {
        let caplen = packet.data.len().min(SNAPLEN as usize);
        self.out.write_u32::<LE>(packet.timestamp.as_secs() as u32)?;
        self.out.write_u32::<LE>(packet.timestamp.subsec_micros())?;
        self.out.write_u32::<LE>(caplen as u32)?;
        self.out.write_u32::<LE>(packet.orig_len.max(caplen as u32))?;
        self.out.write_all(&packet.data[..caplen])?;
        self.count += 1;
        trace!("Recorded packet {} ({:#x} bytes)", self.count, caplen);
        Ok(())
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn into_inner(mut self) -> Result<W, CaptureError> {
        self.out.flush()?;
        Ok(self.out)
    }
}

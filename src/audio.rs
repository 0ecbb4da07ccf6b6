//! Collects the raw audio carried by `AudioIn` frames.
//!
//! The camera sends its microphone audio as a series of `AudioIn` frames. While a sink is open,
//! the audio part of each of those frames is appended to it; with no sink the audio is dropped.

use crate::commands::audio_payload;
use std::io::Write;
use tracing::{debug, trace};

#[derive(Default)]
pub struct AudioSink {
    out: Option<Box<dyn Write + Send>>,
    written: u64,
}

impl std::fmt::Debug for AudioSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioSink")
            .field("open", &self.is_open())
            .field("written", &self.written)
            .finish()
    }
}

impl AudioSink {
    /// A sink that discards everything until [`open`](Self::open) is called
    pub fn closed() -> Self {
        Self::default()
    }

    /// Start appending audio to `out`. A previously open writer is flushed and dropped.
    pub fn open(&mut self, out: impl Write + Send + 'static) -> std::io::Result<()> {
        self.close()?;
        debug!("Audio sink opened");
        self.out = Some(Box::new(out));
        Ok(())
    }

    /// Flush and drop the current writer, if any
    pub fn close(&mut self) -> std::io::Result<()> {
        if let Some(mut out) = self.out.take() {
            out.flush()?;
            debug!("Audio sink closed after {:#x} bytes", self.written);
        }
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.out.is_some()
    }

    /// Total audio bytes written since this sink was created
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Appends the audio of `frame` (header included) if it's an `AudioIn` frame and the sink is open.
    /// Returns how many bytes were written.
    pub fn append(&mut self, frame: &[u8]) -> std::io::Result<usize> {
        let out = match &mut self.out {
            Some(out) => out,
            None => return Ok(0),
        };
        let audio = match audio_payload(frame) {
            Some(audio) => audio,
            None => return Ok(0),
        };
        out.write_all(audio)?;
        self.written += audio.len() as u64;
        trace!("Appended {:#x} audio bytes", audio.len());
        Ok(audio.len())
    }
}

impl Drop for AudioSink {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

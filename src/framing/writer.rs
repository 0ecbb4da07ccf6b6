use crate::commands::{serverpush_preamble, Request};
use crate::framing::Frame;
use bytes::Bytes;
use futures_util::{Sink, SinkExt};
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;
use tokio_util::codec::{BytesCodec, FramedWrite};
use tracing::trace;

/// Sends [`Frame`](Frame)s, or [`Request`](Request)s, to the camera
pub struct FrameWriter<W> {
    write: FramedWrite<W, BytesCodec>,
}

impl<W> FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(io: W) -> Self {
        Self {
            write: FramedWrite::new(io, BytesCodec::new()),
        }
    }

    /// Sends the HTTP request that switches the connection to FOSC frames.
    /// This must be the first thing written on a fresh connection.
    pub async fn send_preamble(&mut self, host: &str, port: u16) -> std::io::Result<()> {
        let preamble = serverpush_preamble(host, port);
        trace!("Sending preamble: {:?}", preamble);
        self.write.send(Bytes::from(preamble.into_bytes())).await
    }

    pub fn into_inner(self) -> W {
        self.write.into_inner()
    }
}

impl<W> Sink<Frame> for FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    type Error = std::io::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        SinkExt::<Bytes>::poll_ready_unpin(&mut self.get_mut().write, cx)
    }

    fn start_send(self: Pin<&mut Self>, frame: Frame) -> Result<(), Self::Error> {
        let this = self.get_mut();
        let buf = Bytes::from(frame.to_buf());
        trace!(
            "Sending command {} with {:#x} bytes body: {}",
            frame.command_string(),
            frame.body.len(),
            hex::encode(&frame.body),
        );
        this.write.start_send_unpin(buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        SinkExt::<Bytes>::poll_flush_unpin(&mut self.get_mut().write, cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        SinkExt::<Bytes>::poll_close_unpin(&mut self.get_mut().write, cx)
    }
}

impl<W> Sink<Request> for FrameWriter<W>
where
    W: AsyncWrite + Unpin,
{
    type Error = std::io::Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::<Frame>::poll_ready(self, cx)
    }

    fn start_send(self: Pin<&mut Self>, req: Request) -> Result<(), Self::Error> {
        Sink::<Frame>::start_send(self, Frame::from(req))
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::<Frame>::poll_flush(self, cx)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Sink::<Frame>::poll_close(self, cx)
    }
}

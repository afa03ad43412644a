//! Per-connection read/dispatch/write loop.

use crate::dispatcher::{Dispatcher, Response};
use crate::metrics::RelayMetrics;
use postbox_types::{decode_frame, decode_frame_strict, decode_header, Frame, FrameError, Header};
use postbox_types::HEADER_SIZE;
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Serves one accepted connection until the peer disconnects or I/O fails.
///
/// Holds no identity or message state between frames.
pub struct Connection<S> {
    stream: S,
    peer: String,
    dispatcher: Arc<Dispatcher>,
    verify_checksums: bool,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Wrap an accepted stream.
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        dispatcher: Arc<Dispatcher>,
        verify_checksums: bool,
    ) -> Self {
        Self {
            stream,
            peer: peer.into(),
            dispatcher,
            verify_checksums,
        }
    }

    /// Run the loop: read a frame, dispatch it, write the response.
    ///
    /// Returns `Ok(())` on a clean disconnect (including one in the middle
    /// of a frame) and the I/O error otherwise.
    pub async fn run(mut self) -> io::Result<()> {
        let mut frames = 0u64;

        loop {
            let mut header_buf = [0u8; HEADER_SIZE];
            if !read_full(&mut self.stream, &mut header_buf).await? {
                break;
            }
            let header = decode_header(&header_buf).map_err(invalid_data)?;

            let mut payload = vec![0u8; header.payload_size as usize];
            if !read_full(&mut self.stream, &mut payload).await? {
                tracing::debug!("{} disconnected mid-frame", self.peer);
                break;
            }

            let response = match self.assemble(header, payload) {
                Ok(frame) => self.dispatcher.dispatch(&frame).await,
                Err(e) => {
                    tracing::debug!("Framing error from {}: {}", self.peer, e);
                    RelayMetrics::incr(&self.dispatcher.metrics().failures_total);
                    Response::general_error(e.to_string())
                }
            };

            self.write_response(&response).await?;
            frames += 1;
        }

        tracing::debug!("{} closed after {} frames", self.peer, frames);
        Ok(())
    }

    fn assemble(&self, header: Header, payload: Vec<u8>) -> Result<Frame, FrameError> {
        if self.verify_checksums {
            decode_frame_strict(header, payload)
        } else {
            decode_frame(header, payload)
        }
    }

    async fn write_response(&mut self, response: &Response) -> io::Result<()> {
        let bytes = match response.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!("Cannot encode response for {}: {}", self.peer, e);
                Response::internal_error().to_bytes().map_err(invalid_data)?
            }
        };

        self.stream.write_all(&bytes).await?;
        self.stream.flush().await
    }
}

/// Fill `buf` completely. `Ok(false)` means the peer closed first.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> io::Result<bool>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            if filled > 0 {
                tracing::debug!("Peer closed after {} of {} bytes", filled, buf.len());
            }
            return Ok(false);
        }
        filled += n;
    }
    Ok(true)
}

fn invalid_data(e: FrameError) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, e)
}

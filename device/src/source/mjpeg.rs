use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use motion_cam_common::frame::Frame;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use super::{forward_jpeg, SourceError, INITIAL_BACKOFF, MAX_BACKOFF};
use crate::clock::MonotonicClock;

const BOUNDARY: &[u8] = b"--frame\r\n";
const HEADER_END: &[u8] = b"\r\n\r\n";
/// Largest JPEG part the parser buffers before giving up on it.
const MAX_PART_BYTES: usize = 2 * 1024 * 1024;
/// Largest part header block.
const MAX_HEADER_BYTES: usize = 4 * 1024;

/// Parse state for the MJPEG multipart stream.
enum ParseState {
    /// Looking for the boundary marker `--frame\r\n`.
    SeekingBoundary,
    /// Found boundary, now looking for end of headers `\r\n\r\n`.
    SeekingHeaderEnd,
    /// Collecting JPEG bytes until the next boundary.
    CollectingJpeg,
}

/// Incremental parser for a `multipart/x-mixed-replace;boundary=frame` body.
///
/// Chunks can be split anywhere, including inside a boundary or a header
/// block. A part is only complete once the following boundary arrives.
/// Parts larger than the part limit are dropped and the parser resyncs on
/// the next boundary.
pub struct MjpegParser {
    buffer: BytesMut,
    state: ParseState,
    /// Offset in `buffer` from which to resume the boundary search.
    jpeg_start: usize,
    max_part: usize,
}

impl MjpegParser {
    pub fn new() -> Self {
        Self::with_part_limit(MAX_PART_BYTES)
    }

    pub fn with_part_limit(max_part: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(256 * 1024),
            state: ParseState::SeekingBoundary,
            jpeg_start: 0,
            max_part,
        }
    }

    /// Drop everything but a boundary-sized tail and look for the next part.
    fn resync(&mut self) {
        if self.buffer.len() > BOUNDARY.len() {
            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
        }
        self.jpeg_start = 0;
        self.state = ParseState::SeekingBoundary;
    }

    /// Feed one chunk and return every JPEG it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(chunk);
        let mut jpegs = Vec::new();

        loop {
            match self.state {
                ParseState::SeekingBoundary => {
                    if let Some(pos) = find_subsequence(&self.buffer, BOUNDARY) {
                        let _ = self.buffer.split_to(pos + BOUNDARY.len());
                        self.state = ParseState::SeekingHeaderEnd;
                    } else {
                        // keep a tail in case the boundary spans chunks
                        if self.buffer.len() > BOUNDARY.len() {
                            let _ = self.buffer.split_to(self.buffer.len() - BOUNDARY.len());
                        }
                        break;
                    }
                }
                ParseState::SeekingHeaderEnd => {
                    if let Some(pos) = find_subsequence(&self.buffer, HEADER_END) {
                        let _ = self.buffer.split_to(pos + HEADER_END.len());
                        self.jpeg_start = 0;
                        self.state = ParseState::CollectingJpeg;
                    } else {
                        if self.buffer.len() > MAX_HEADER_BYTES {
                            warn!(bytes = self.buffer.len(), "MJPEG part headers too long, resyncing");
                            self.resync();
                        }
                        break;
                    }
                }
                ParseState::CollectingJpeg => {
                    let Some(pos) = find_subsequence(&self.buffer[self.jpeg_start..], BOUNDARY)
                    else {
                        if self.buffer.len() > self.max_part {
                            warn!(
                                bytes = self.buffer.len(),
                                limit = self.max_part,
                                "MJPEG part exceeds size limit, dropping it"
                            );
                            self.resync();
                        } else {
                            self.jpeg_start = self.buffer.len().saturating_sub(BOUNDARY.len());
                        }
                        break;
                    };
                    let jpeg_end = self.jpeg_start + pos;
                    // strip the \r\n that precedes the boundary
                    let end = if self.buffer[..jpeg_end].ends_with(b"\r\n") {
                        jpeg_end - 2
                    } else {
                        jpeg_end
                    };

                    let jpeg = self.buffer.split_to(end).freeze();
                    let _ = self.buffer.split_to(jpeg_end - end + BOUNDARY.len());
                    if jpeg.len() > self.max_part {
                        warn!(bytes = jpeg.len(), limit = self.max_part, "dropping oversized MJPEG part");
                    } else if !jpeg.is_empty() {
                        jpegs.push(jpeg);
                    }
                    self.state = ParseState::SeekingHeaderEnd;
                }
            }
        }

        jpegs
    }
}

impl Default for MjpegParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Read frames from an upstream MJPEG stream until the capture loop stops.
/// Reconnects with exponential backoff on failure.
pub async fn run_mjpeg_source(stream_url: &str, clock: MonotonicClock, frames: mpsc::Sender<Frame>) {
    let mut backoff = INITIAL_BACKOFF;

    loop {
        info!(url = stream_url, "connecting to MJPEG stream");
        match consume_stream(stream_url, &clock, &frames).await {
            Ok(()) => {
                info!("stream ended cleanly");
                backoff = INITIAL_BACKOFF;
            }
            Err(e) => {
                error!(error = %e, "stream error, reconnecting in {:?}", backoff);
            }
        }
        if frames.is_closed() {
            info!("capture loop stopped, closing MJPEG source");
            return;
        }
        tokio::time::sleep(backoff).await;
        backoff = (backoff * 2).min(MAX_BACKOFF);
    }
}

async fn consume_stream(
    url: &str,
    clock: &MonotonicClock,
    frames: &mpsc::Sender<Frame>,
) -> Result<(), SourceError> {
    let client = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .build()
        .map_err(SourceError::HttpConnect)?;
    let response = client
        .get(url)
        .send()
        .await
        .map_err(SourceError::HttpConnect)?;

    if !response.status().is_success() {
        return Err(SourceError::HttpStatus(response.status().as_u16()));
    }

    info!(status = %response.status(), "connected to MJPEG stream");

    let mut byte_stream = response.bytes_stream();
    let mut parser = MjpegParser::new();

    while let Some(chunk) = byte_stream.next().await {
        let chunk = chunk.map_err(SourceError::HttpStream)?;
        for jpeg in parser.push(&chunk) {
            if !forward_jpeg(jpeg, clock, frames).await {
                return Ok(());
            }
        }
    }

    Ok(())
}

/// Find the position of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

use bytes::Bytes;
use image::ImageReader;
use std::io::Cursor;
use tracing::debug;

/// Encoding of a captured frame. The sensor is configured for JPEG output,
/// so that is the only format the device produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFormat {
    Jpeg,
}

impl FrameFormat {
    pub fn mime_type(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "image/jpeg",
        }
    }

    /// Short name used in broker payloads.
    pub fn name(&self) -> &'static str {
        match self {
            FrameFormat::Jpeg => "jpeg",
        }
    }
}

/// A captured camera frame.
///
/// The encoded bytes are reference-counted so the same capture can be handed
/// to the live view, the motion engine and the publisher without copying.
/// Dropping the last handle releases the buffer.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Bytes,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
    /// Milliseconds on the device's monotonic clock.
    pub captured_at_ms: u64,
    pub seq: u64,
}

impl Frame {
    /// Wrap an encoded JPEG. Width and height are read from the JPEG header
    /// and left at zero when the header cannot be parsed.
    pub fn jpeg(data: impl Into<Bytes>, captured_at_ms: u64, seq: u64) -> Result<Self, FrameError> {
        let data = data.into();
        if data.is_empty() {
            return Err(FrameError::Empty { seq });
        }
        let (width, height) = probe_dimensions(&data).unwrap_or_else(|| {
            debug!(seq, bytes = data.len(), "could not read JPEG dimensions");
            (0, 0)
        });
        Ok(Self {
            data,
            width,
            height,
            format: FrameFormat::Jpeg,
            captured_at_ms,
            seq,
        })
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Cheap clone of the underlying buffer.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

fn probe_dimensions(data: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame {seq} has an empty buffer")]
    Empty { seq: u64 },
}

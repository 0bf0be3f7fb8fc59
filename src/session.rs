use std::num::{NonZeroU8, NonZeroUsize};

use num_rational::Rational32;
use v_frame::{
    chroma::ChromaSubsampling,
    frame::{Frame, FrameBuilder},
};

use crate::{StreamInfo, error::PumpError, stage::FinishedFrame, util::pts_to_seconds};

/// A finished frame copied into caller-owned storage.
///
/// Rows are tightly packed: `as_bytes().len() == width * height * components`.
/// The buffer is independent from any stage, so it stays valid after the pump
/// moves on to the next frame.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Picture {
    width: u32,
    height: u32,
    components: usize,
    pts: Option<i64>,
    sequence: u64,
    data: Vec<u8>,
}

impl Picture {
    /// Creates an empty picture, ready to be filled by
    /// [`FramePump::next_frame_into`](crate::FramePump::next_frame_into).
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Width in pixels.
    #[inline]
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    #[inline]
    pub const fn height(&self) -> u32 {
        self.height
    }

    /// Interleaved components per pixel, either 1 or 3.
    #[inline]
    pub const fn component_count(&self) -> usize {
        self.components
    }

    /// Bytes per row. Always `width * components`.
    #[inline]
    pub const fn row_stride(&self) -> usize {
        self.width as usize * self.components
    }

    /// Presentation timestamp in stream time-base units, if the stage reported one.
    #[inline]
    pub const fn pts(&self) -> Option<i64> {
        self.pts
    }

    /// The 1-based sequence number of this frame within its session.
    #[inline]
    pub const fn sequence_number(&self) -> u64 {
        self.sequence
    }

    /// The packed pixel rows.
    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Consumes the picture and returns the packed pixel rows.
    #[inline]
    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }

    /// Copies a single-component picture into a monochrome `v_frame` frame.
    ///
    /// # Errors
    ///
    /// Returns [`PumpError::UnsupportedComponentCount`] for multi-component
    /// pictures and [`PumpError::GenericTransformError`] if the frame cannot
    /// be built (e.g. for an empty picture).
    #[inline]
    pub fn to_luma_frame(&self) -> Result<Frame<u8>, PumpError> {
        if self.components != 1 {
            return Err(PumpError::UnsupportedComponentCount {
                count: self.components,
            });
        }
        let mut frame: Frame<u8> = FrameBuilder::new(
            NonZeroUsize::new(self.width as usize).ok_or_else(|| {
                PumpError::GenericTransformError {
                    cause: "Zero-width resolution is not supported".to_string(),
                }
            })?,
            NonZeroUsize::new(self.height as usize).ok_or_else(|| {
                PumpError::GenericTransformError {
                    cause: "Zero-height resolution is not supported".to_string(),
                }
            })?,
            ChromaSubsampling::Monochrome,
            NonZeroU8::new(8).ok_or_else(|| PumpError::GenericTransformError {
                cause: "Zero-bit-depth is not supported".to_string(),
            })?,
        )
        .build()
        .map_err(|e| PumpError::GenericTransformError {
            cause: e.to_string(),
        })?;

        frame
            .y_plane
            .copy_from_u8_slice(&self.data)
            .map_err(|e| PumpError::GenericTransformError {
                cause: e.to_string(),
            })?;
        Ok(frame)
    }
}

/// Why a session stopped producing frames.
#[derive(Debug, Clone)]
pub enum Termination {
    /// Every stage was drained to completion.
    EndOfStream,
    /// A stage failed, or the pipeline stalled. The pump does not resume.
    Failed(PumpError),
}

/// Per-stream state exposed to the caller between pump calls.
#[derive(Debug, Clone)]
pub struct Session {
    frame_number: u64,
    total_frames: Option<u64>,
    size: Option<(u32, u32)>,
    time_base: Rational32,
    last_pts: Option<i64>,
    last_pts_seconds: f64,
    termination: Option<Termination>,
}

impl Session {
    /// Creates a fresh session for a stream.
    #[inline]
    pub fn new(info: &StreamInfo) -> Self {
        Self {
            frame_number: 0,
            total_frames: info.total_frames,
            size: None,
            time_base: info.time_base,
            last_pts: None,
            last_pts_seconds: 0.0,
            termination: None,
        }
    }

    /// Output width, fixed by the first finished frame. Zero before that.
    #[inline]
    pub fn frame_width(&self) -> u32 {
        self.size.map_or(0, |(w, _)| w)
    }

    /// Output height, fixed by the first finished frame. Zero before that.
    #[inline]
    pub fn frame_height(&self) -> u32 {
        self.size.map_or(0, |(_, h)| h)
    }

    /// Number of frames returned so far, which is also the sequence number of
    /// the most recent one.
    #[inline]
    pub const fn frame_sequence_number(&self) -> u64 {
        self.frame_number
    }

    /// The declared or estimated number of frames in the stream.
    #[inline]
    pub const fn estimated_total_frames(&self) -> Option<u64> {
        self.total_frames
    }

    /// The stream time base used to convert timestamps to seconds.
    #[inline]
    pub const fn time_base(&self) -> Rational32 {
        self.time_base
    }

    /// Timestamp of the most recent frame, in time-base units.
    #[inline]
    pub const fn last_pts(&self) -> Option<i64> {
        self.last_pts
    }

    /// Timestamp of the most recent frame in seconds, or `0.0` if it had none.
    #[inline]
    pub const fn last_pts_seconds(&self) -> f64 {
        self.last_pts_seconds
    }

    /// Whether the session has stopped producing frames.
    #[inline]
    pub const fn is_finished(&self) -> bool {
        self.termination.is_some()
    }

    /// Why the session stopped, once it has.
    #[inline]
    pub const fn termination(&self) -> Option<&Termination> {
        self.termination.as_ref()
    }

    pub(crate) fn terminate(&mut self, termination: Termination) {
        if self.termination.is_none() {
            self.termination = Some(termination);
        }
    }

    /// Copies `frame` into `out` and advances the session.
    ///
    /// The session is only updated once the copy has succeeded, so a rejected
    /// frame leaves the counter untouched.
    pub(crate) fn materialize<F: FinishedFrame>(
        &mut self,
        frame: &F,
        out: &mut Picture,
    ) -> Result<(), PumpError> {
        let components = frame.component_count();
        if components != 1 && components != 3 {
            return Err(PumpError::UnsupportedComponentCount { count: components });
        }

        let width = frame.width();
        let height = frame.height();
        let row_bytes = width as usize * components;
        let stride = frame.stride();
        let data = frame.data();
        let required = match height as usize {
            0 => 0,
            rows => stride * (rows - 1) + row_bytes,
        };
        if stride < row_bytes || data.len() < required {
            return Err(PumpError::ShortPlane {
                expected: required.max(row_bytes * height as usize),
                actual: data.len(),
            });
        }

        out.data.clear();
        out.data.reserve(row_bytes * height as usize);
        if stride == row_bytes {
            out.data.extend_from_slice(&data[..required]);
        } else {
            for row in data.chunks(stride).take(height as usize) {
                out.data.extend_from_slice(&row[..row_bytes]);
            }
        }

        match self.size {
            None => self.size = Some((width, height)),
            Some((w, h)) if (w, h) != (width, height) => {
                tracing::warn!(
                    width,
                    height,
                    session_width = w,
                    session_height = h,
                    "finished frame size differs from the session's output size"
                );
            }
            Some(_) => {}
        }

        self.frame_number += 1;
        self.last_pts = frame.pts();
        self.last_pts_seconds = self
            .last_pts
            .map_or(0.0, |pts| pts_to_seconds(pts, self.time_base));

        out.width = width;
        out.height = height;
        out.components = components;
        out.pts = self.last_pts;
        out.sequence = self.frame_number;
        Ok(())
    }
}

use std::collections::VecDeque;

use crate::{
    error::PumpError,
    helpers::y4m::RawFrame,
    stage::{FinishedFrame, Pull, Stage, Submit},
    util::align_up,
};

/// Packed pixel layouts produced by [`SoftwareTransform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    /// One 8-bit luma component per pixel.
    Gray8,
    /// Three 8-bit components per pixel, in blue, green, red order.
    Bgr24,
}

impl OutputFormat {
    /// Interleaved components per pixel.
    #[inline]
    pub const fn component_count(self) -> usize {
        match self {
            OutputFormat::Gray8 => 1,
            OutputFormat::Bgr24 => 3,
        }
    }
}

/// Configuration for [`SoftwareTransform`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransformConfig {
    /// Pixel layout of finished frames.
    pub format: OutputFormat,
    /// Output size. `None` keeps the decoded size.
    pub size: Option<(u32, u32)>,
    /// Rows of finished frames start on multiples of this many bytes.
    pub row_alignment: usize,
}

impl TransformConfig {
    /// Converts to `format` at the decoded size.
    #[inline]
    pub const fn new(format: OutputFormat) -> Self {
        Self {
            format,
            size: None,
            row_alignment: 32,
        }
    }

    /// Also scales to `width`x`height`.
    #[inline]
    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.size = Some((width, height));
        self
    }

    /// Changes the row alignment of finished frames.
    #[inline]
    #[must_use]
    pub const fn with_row_alignment(mut self, alignment: usize) -> Self {
        self.row_alignment = alignment;
        self
    }
}

impl Default for TransformConfig {
    #[inline]
    fn default() -> Self {
        Self::new(OutputFormat::Bgr24)
    }
}

/// A finished frame in a packed 8-bit layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedFrame {
    width: u32,
    height: u32,
    format: OutputFormat,
    stride: usize,
    data: Vec<u8>,
    pts: Option<i64>,
}

impl PackedFrame {
    /// The pixel layout of the frame.
    #[inline]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }
}

impl FinishedFrame for PackedFrame {
    #[inline]
    fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    fn component_count(&self) -> usize {
        self.format.component_count()
    }

    #[inline]
    fn stride(&self) -> usize {
        self.stride
    }

    #[inline]
    fn data(&self) -> &[u8] {
        &self.data
    }

    #[inline]
    fn pts(&self) -> Option<i64> {
        self.pts
    }
}

/// Scales and converts planar YUV frames into packed gray or BGR frames on the CPU.
///
/// Conversion uses BT.601 limited-range coefficients in integer arithmetic,
/// and scaling picks the nearest source sample. Each frame is converted on
/// submission and queued until retrieved.
#[derive(Debug)]
pub struct SoftwareTransform {
    config: TransformConfig,
    queue: VecDeque<PackedFrame>,
    flushed: bool,
}

impl SoftwareTransform {
    /// Creates a transform with the given configuration.
    #[inline]
    pub const fn new(config: TransformConfig) -> Self {
        Self {
            config,
            queue: VecDeque::new(),
            flushed: false,
        }
    }

    fn convert(&self, frame: &RawFrame) -> Result<PackedFrame, PumpError> {
        let geometry = frame.geometry;
        if geometry.width == 0 || geometry.height == 0 {
            return Err(PumpError::GenericTransformError {
                cause: "Zero-sized frames cannot be converted".to_string(),
            });
        }
        frame.check_planes()?;
        let (width, height) = self
            .config
            .size
            .unwrap_or((geometry.width as u32, geometry.height as u32));
        if width == 0 || height == 0 {
            return Err(PumpError::GenericTransformError {
                cause: format!("invalid output size {width}x{height}"),
            });
        }

        let components = self.config.format.component_count();
        let stride = align_up(width as usize * components, self.config.row_alignment);
        let mut data = vec![0u8; stride * height as usize];
        let chroma_shift = geometry.chroma_shift();

        for (y, row) in data.chunks_exact_mut(stride).enumerate() {
            let sy = y * geometry.height / height as usize;
            for x in 0..width as usize {
                let sx = x * geometry.width / width as usize;
                let luma = frame.sample(0, sx, sy);
                match self.config.format {
                    OutputFormat::Gray8 => row[x] = luma,
                    OutputFormat::Bgr24 => {
                        let (u, v) = chroma_shift.map_or((128, 128), |(shift_x, shift_y)| {
                            (
                                frame.sample(1, sx >> shift_x, sy >> shift_y),
                                frame.sample(2, sx >> shift_x, sy >> shift_y),
                            )
                        });
                        row[x * 3..x * 3 + 3].copy_from_slice(&yuv_to_bgr(luma, u, v));
                    }
                }
            }
        }

        Ok(PackedFrame {
            width,
            height,
            format: self.config.format,
            stride,
            data,
            pts: frame.pts,
        })
    }
}

fn yuv_to_bgr(y: u8, u: u8, v: u8) -> [u8; 3] {
    let c = i32::from(y) - 16;
    let d = i32::from(u) - 128;
    let e = i32::from(v) - 128;
    let clamp = |value: i32| ((value + 128) >> 8).clamp(0, 255) as u8;
    [
        clamp(298 * c + 516 * d),
        clamp(298 * c - 100 * d - 208 * e),
        clamp(298 * c + 409 * e),
    ]
}

impl Stage for SoftwareTransform {
    type Input = RawFrame;
    type Output = PackedFrame;

    fn submit(&mut self, frame: RawFrame) -> Result<Submit<RawFrame>, PumpError> {
        if self.flushed {
            return Err(PumpError::GenericTransformError {
                cause: "frame submitted after flush".to_string(),
            });
        }
        let converted = self.convert(&frame)?;
        self.queue.push_back(converted);
        Ok(Submit::Accepted)
    }

    fn retrieve(&mut self) -> Result<Pull<PackedFrame>, PumpError> {
        Ok(match self.queue.pop_front() {
            Some(frame) => Pull::Produced(frame),
            None if self.flushed => Pull::EndOfStream,
            None => Pull::NeedsMoreInput,
        })
    }

    fn flush(&mut self) -> Result<(), PumpError> {
        self.flushed = true;
        Ok(())
    }
}

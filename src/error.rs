use thiserror::Error;

/// Errors that terminate a frame pump session.
///
/// Every variant is fatal from the pump's point of view. Back-pressure and
/// end-of-stream are ordinary stage results (see [`Pull`](crate::Pull) and
/// [`Submit`](crate::Submit)) and never show up here.
#[derive(Debug, Clone, Error)]
pub enum PumpError {
    /// Failed to read or open the input video file.
    ///
    /// This error occurs when the source cannot access the specified file,
    /// either due to file permissions, file not found, or other I/O related issues.
    #[error("failed to open input file ({cause})")]
    FileReadError {
        /// The underlying cause of the error
        cause: String,
    },

    /// Internal FFmpeg error.
    ///
    /// Returned when libavformat, libavcodec or libavfilter report an error
    /// code that is neither `EAGAIN` nor end-of-file.
    /// Only available when the `ffmpeg` feature is enabled.
    #[cfg(feature = "ffmpeg")]
    #[error("FFMpeg internal error ({cause})")]
    FfmpegInternalError {
        /// The underlying cause of the error
        cause: String,
    },

    /// The filter graph description could not be parsed or configured.
    ///
    /// Only available when the `ffmpeg` feature is enabled.
    #[cfg(feature = "ffmpeg")]
    #[error("failed to configure filter graph \"{filter}\" ({cause})")]
    FilterGraphError {
        /// The filter description which was being configured
        filter: String,
        /// The underlying cause of the error
        cause: String,
    },

    /// The requested hardware device type is unknown or could not be created.
    ///
    /// Only available when the `ffmpeg` feature is enabled.
    #[cfg(feature = "ffmpeg")]
    #[error("hardware device \"{device}\" is unavailable ({cause})")]
    HardwareUnavailable {
        /// The device type name which was requested
        device: String,
        /// The underlying cause of the error
        cause: String,
    },

    /// Generic decoder error for issues not covered by specific error types.
    #[error("internal decoder error ({cause})")]
    GenericDecodeError {
        /// The underlying cause of the error
        cause: String,
    },

    /// Generic transform error for issues not covered by specific error types.
    #[error("internal transform error ({cause})")]
    GenericTransformError {
        /// The underlying cause of the error
        cause: String,
    },

    /// No video stream found in the input file.
    #[error("no decodeable video stream found in file")]
    NoVideoStream,

    /// A packet did not carry the number of bytes its stream geometry requires.
    #[error("packet holds {actual} bytes but a frame needs {expected}")]
    TruncatedPacket {
        /// The number of bytes one frame occupies
        expected: usize,
        /// The number of bytes the packet carried
        actual: usize,
    },

    /// Unsupported video format.
    ///
    /// This error is returned when the video uses a pixel format or colorspace
    /// that the selected stage cannot handle.
    #[error("unsupported video format {fmt}")]
    UnsupportedFormat {
        /// The video format which triggered the error
        fmt: String,
    },

    /// A finished frame had a component count other than 1 or 3.
    #[error("unsupported number of components for output ({count})")]
    UnsupportedComponentCount {
        /// The component count of the offending frame
        count: usize,
    },

    /// A finished frame's plane was shorter than its geometry implies.
    #[error("finished frame plane holds {actual} bytes but {expected} are required")]
    ShortPlane {
        /// The number of bytes the geometry requires
        expected: usize,
        /// The number of bytes the plane actually holds
        actual: usize,
    },

    /// The decoder refused a packet and had no frame to drain to make room.
    #[error("decoder is busy but has no frame to drain")]
    DecoderStall,

    /// The transform stage refused a decoded frame.
    ///
    /// The pump never submits to the transform without draining it first, so
    /// a busy transform means the stage broke its contract.
    #[error("transform stage refused a frame after being drained")]
    TransformBusy,
}

#[cfg(feature = "ffmpeg")]
impl From<ffmpeg_the_third::Error> for PumpError {
    #[inline]
    fn from(e: ffmpeg_the_third::Error) -> Self {
        PumpError::FfmpegInternalError {
            cause: e.to_string(),
        }
    }
}

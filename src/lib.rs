//! A demand-driven frame pump for video pipelines.
//!
//! A pump chains three stages: a [`PacketSource`] that reads compressed
//! packets, a decode [`Stage`] that turns packets into frames, and a transform
//! [`Stage`] that converts frames into their final layout. Each call to
//! [`FramePump::next_frame`] does just enough work to produce one finished
//! frame and copies it into a packed [`Picture`].
//!
//! The y4m source with the CPU transform is always available.
//! The FFmpeg backend, which adds container demuxing, hardware decoding and
//! libavfilter graphs, must be enabled via the `ffmpeg` Cargo feature.

#[cfg(feature = "ffmpeg")]
use crate::helpers::ffmpeg::{FfmpegDecoder, FfmpegPacketSource, FilterGraphTransform};
use std::fs::File;
use std::io::{BufReader, Read, Stdin, stdin};
use std::path::Path;

mod error;
pub mod negotiate;
mod pump;
mod session;
mod stage;
mod util;
mod helpers {
    #[cfg(feature = "ffmpeg")]
    pub(crate) mod ffmpeg;
    pub(crate) mod software;
    pub(crate) mod y4m;
}

pub use error::PumpError;
#[cfg(feature = "ffmpeg")]
pub use helpers::ffmpeg::FfmpegConfig;
pub use helpers::software::{OutputFormat, PackedFrame, SoftwareTransform, TransformConfig};
pub use helpers::y4m::{RawFrame, RawGeometry, RawPacket, RawVideoDecoder, Y4mPacketSource};
pub use negotiate::{FormatSelector, PreferenceList};
pub use num_rational::Rational32;
pub use pump::{FramePump, PumpState};
pub use session::{Picture, Session, Termination};
pub use stage::{FinishedFrame, PacketSource, Pull, Stage, Submit};
pub use v_frame;

/// Stream properties known before the first frame is decoded.
///
/// Sources fill this in when they open their input. Values that the
/// container does not declare are left as `None`.
#[derive(Debug, Clone, Copy)]
pub struct StreamInfo {
    /// The declared width of the video frame in pixels, or 0 if unknown.
    pub width: usize,
    /// The declared height of the video frame in pixels, or 0 if unknown.
    pub height: usize,
    /// The unit of packet and frame timestamps, in seconds.
    ///
    /// A timestamp `pts` corresponds to `pts * time_base` seconds.
    pub time_base: Rational32,
    /// The average frame rate of the video in frames per second.
    ///
    /// Examples:
    /// - `Rational32::new(30, 1)` for 30 fps
    /// - `Rational32::new(24000, 1001)` for 23.976 fps (24000/1001)
    pub frame_rate: Option<Rational32>,
    /// Estimated number of frames in the stream.
    pub total_frames: Option<u64>,
}

#[cfg(test)]
impl Default for StreamInfo {
    #[inline]
    fn default() -> Self {
        StreamInfo {
            width: 640,
            height: 480,
            time_base: Rational32::new(1, 30),
            frame_rate: Some(Rational32::new(30, 1)),
            total_frames: None,
        }
    }
}

/// A pump reading y4m data and converting it on the CPU.
pub type Y4mPump<R> = FramePump<Y4mPacketSource<R>, RawVideoDecoder, SoftwareTransform>;

/// A pump demuxing, decoding and filtering with FFmpeg.
#[cfg(feature = "ffmpeg")]
pub type FfmpegPump = FramePump<FfmpegPacketSource, FfmpegDecoder, FilterGraphTransform>;

/// Creates a pump reading y4m data from any reader.
///
/// # Errors
///
/// This method will return an error if:
/// - The y4m header is malformed or missing (`PumpError::GenericDecodeError`)
/// - The colorspace or frame rate is not supported (`PumpError::UnsupportedFormat`)
///
/// # Examples
///
/// ```no_run
/// use av_frame_pump::{OutputFormat, TransformConfig, from_reader};
/// use std::io::Cursor;
///
/// let data: Vec<u8> = std::fs::read("video.y4m").unwrap();
/// let mut pump = from_reader(Cursor::new(data), &TransformConfig::new(OutputFormat::Gray8))?;
/// let frames = pump.by_ref().count();
/// println!("{frames} frames");
/// # Ok::<(), av_frame_pump::PumpError>(())
/// ```
#[inline]
pub fn from_reader<R: Read>(reader: R, config: &TransformConfig) -> Result<Y4mPump<R>, PumpError> {
    let source = Y4mPacketSource::new(reader)?;
    let info = source.stream_info();
    let geometry = source.geometry();
    tracing::info!(
        width = info.width,
        height = info.height,
        frame_rate = ?info.frame_rate,
        format = ?config.format,
        "opened y4m stream"
    );
    Ok(FramePump::new(
        source,
        RawVideoDecoder::new(geometry),
        SoftwareTransform::new(*config),
        &info,
    ))
}

/// Creates a pump reading a y4m file.
///
/// # Errors
///
/// This method will return an error if:
/// - The file cannot be opened or read (`PumpError::FileReadError`)
/// - The y4m header is malformed or missing (`PumpError::GenericDecodeError`)
/// - The colorspace or frame rate is not supported (`PumpError::UnsupportedFormat`)
#[inline]
pub fn from_y4m_file<P: AsRef<Path>>(
    input: P,
    config: &TransformConfig,
) -> Result<Y4mPump<BufReader<File>>, PumpError> {
    let reader = BufReader::new(File::open(input).map_err(|e| PumpError::FileReadError {
        cause: e.to_string(),
    })?);
    from_reader(reader, config)
}

/// Creates a pump reading y4m data from standard input (stdin).
///
/// This is commonly used with command-line pipelines:
/// ```bash
/// ffmpeg -i input.mp4 -f yuv4mpegpipe - | your_app
/// ```
///
/// # Errors
///
/// Returns `PumpError::GenericDecodeError` if stdin does not start with a
/// valid y4m header.
#[inline]
pub fn from_stdin(config: &TransformConfig) -> Result<Y4mPump<BufReader<Stdin>>, PumpError> {
    // FFmpeg inputs are opened by path, so a pipe has to carry y4m.
    from_reader(BufReader::new(stdin()), config)
}

/// Creates a pump decoding any container FFmpeg can open.
///
/// The transform stage runs `config.filter` through libavfilter. When
/// `config.hw_device` is set, decoding happens on that device and the output
/// format is negotiated with `config.format_selector`.
///
/// # Errors
///
/// This method will return an error if:
/// - The file cannot be opened or read (`PumpError::FileReadError`)
/// - The file has no video stream (`PumpError::NoVideoStream`)
/// - The hardware device cannot be created (`PumpError::HardwareUnavailable`)
/// - The decoder cannot be opened (`PumpError::FfmpegInternalError`)
///
/// # Examples
///
/// ```no_run
/// use av_frame_pump::{FfmpegConfig, from_file};
///
/// let mut pump = from_file("video.mkv", FfmpegConfig::new("scale=1280:720,format=bgr24"))?;
/// for picture in pump.by_ref() {
///     let bgr = picture.as_bytes();
///     // Process the frame...
/// }
/// # Ok::<(), av_frame_pump::PumpError>(())
/// ```
#[cfg(feature = "ffmpeg")]
#[inline]
pub fn from_file<P: AsRef<Path>>(input: P, config: FfmpegConfig) -> Result<FfmpegPump, PumpError> {
    let source = FfmpegPacketSource::new(input)?;
    let info = source.stream_info()?;
    let transform = FilterGraphTransform::new(config.filter.clone(), info.time_base);
    let decoder = FfmpegDecoder::new(&source, config)?;
    Ok(FramePump::new(source, decoder, transform, &info))
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::helpers::y4m::tests::y4m_stream;

    #[test]
    fn y4m_pump_yields_every_frame_in_order() {
        let data = y4m_stream(8, 6, 4);
        let mut pump = from_reader(Cursor::new(data), &TransformConfig::new(OutputFormat::Gray8))
            .unwrap();
        assert_eq!(pump.frame_width(), 0);
        assert_eq!(pump.estimated_total_frames(), None);

        for i in 0..4u8 {
            let picture = pump.next_frame().unwrap();
            assert_eq!(picture.sequence_number(), u64::from(i) + 1);
            assert_eq!((picture.width(), picture.height()), (8, 6));
            assert_eq!(picture.component_count(), 1);
            assert_eq!(picture.row_stride(), 8);
            assert!(picture.as_bytes().iter().all(|&b| b == 16 + i));
            assert_eq!(picture.pts(), Some(i64::from(i)));
            assert!((pump.last_pts_seconds() - f64::from(i) / 25.0).abs() < 1e-9);
        }

        assert!(pump.next_frame().is_none());
        assert!(pump.is_finished());
        assert!(matches!(pump.termination(), Some(Termination::EndOfStream)));
        assert_eq!(pump.frame_sequence_number(), 4);
        assert!(pump.next_frame().is_none());
    }

    #[test]
    fn y4m_pump_converts_to_bgr() {
        let data = y4m_stream(4, 4, 2);
        let config = TransformConfig::new(OutputFormat::Bgr24).with_size(2, 2);
        let pictures: Vec<_> = from_reader(Cursor::new(data), &config).unwrap().collect();

        assert_eq!(pictures.len(), 2);
        for picture in &pictures {
            assert_eq!((picture.width(), picture.height()), (2, 2));
            assert_eq!(picture.component_count(), 3);
            assert_eq!(picture.row_stride(), 6);
            assert_eq!(picture.as_bytes().len(), 12);
        }
        // Luma 16 with neutral chroma is black.
        assert!(pictures[0].as_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn malformed_header_is_rejected() {
        let result = from_reader(
            Cursor::new(b"not a y4m stream\n".to_vec()),
            &TransformConfig::default(),
        );
        assert!(matches!(result, Err(PumpError::GenericDecodeError { .. })));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let result = from_y4m_file("/nonexistent/video.y4m", &TransformConfig::default());
        assert!(matches!(result, Err(PumpError::FileReadError { .. })));
    }

    #[test]
    fn picture_converts_to_v_frame() {
        let luma: Vec<u8> = (100..108).collect();
        let chroma = [128u8; 2];
        let mut data = Vec::new();
        {
            let mut encoder = y4m::encode(4, 2, y4m::Ratio::new(25, 1))
                .with_colorspace(y4m::Colorspace::C420jpeg)
                .write_header(&mut data)
                .unwrap();
            encoder
                .write_frame(&y4m::Frame::new([&luma[..], &chroma[..], &chroma[..]], None))
                .unwrap();
        }

        let mut pump = from_reader(
            Cursor::new(data.clone()),
            &TransformConfig::new(OutputFormat::Gray8),
        )
        .unwrap();
        let picture = pump.next_frame().unwrap();
        assert_eq!(picture.as_bytes(), &luma[..]);
        let frame = picture.to_luma_frame().unwrap();
        assert_eq!(frame.y_plane.width().get(), 4);
        assert_eq!(frame.y_plane.height().get(), 2);
        let pixels: Vec<u8> = frame.y_plane.pixels().collect();
        assert_eq!(pixels, picture.as_bytes());

        let mut pump = from_reader(Cursor::new(data), &TransformConfig::default()).unwrap();
        assert!(matches!(
            pump.next_frame().unwrap().to_luma_frame(),
            Err(PumpError::UnsupportedComponentCount { count: 3 })
        ));
    }
}

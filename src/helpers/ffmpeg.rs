extern crate ffmpeg_the_third as ffmpeg;

use std::{
    ffi::{CString, c_void},
    path::Path,
    ptr,
};

use ffmpeg::{
    Packet, Rational, codec, decoder, ffi, filter,
    format::{self, context},
    frame,
    media::Type,
    util::error::EAGAIN,
};
use ffmpeg_the_third::threading;
use num_rational::Rational32;

use crate::{
    StreamInfo,
    error::PumpError,
    negotiate::{FormatSelector, PreferenceList},
    stage::{FinishedFrame, PacketSource, Pull, Stage, Submit},
    util::{buffer_source_args, estimate_total_frames},
};

type BoxedSelector = Box<dyn FormatSelector<format::Pixel>>;

/// Configuration for the FFmpeg pipeline.
pub struct FfmpegConfig {
    /// libavfilter graph description applied to every decoded frame,
    /// e.g. `scale=1280:720,format=bgr24`.
    pub filter: String,
    /// Hardware device type to decode on, e.g. `vaapi`, `cuda` or `rkmpp`.
    /// `None` decodes in software.
    pub hw_device: Option<String>,
    /// Decoder to open by name, e.g. `hevc_rkmpp`. `None` picks FFmpeg's
    /// default decoder for the stream's codec.
    pub decoder: Option<String>,
    /// Chooses the decoder output format when decoding on hardware.
    pub format_selector: BoxedSelector,
}

impl FfmpegConfig {
    /// Software decoding followed by `filter`.
    #[inline]
    pub fn new(filter: impl Into<String>) -> Self {
        Self {
            filter: filter.into(),
            hw_device: None,
            decoder: None,
            format_selector: Box::new(PreferenceList::new([
                format::Pixel::DRM_PRIME,
                format::Pixel::NV12,
            ])),
        }
    }

    /// Rockchip MPP decoding of HEVC, scaled to 1280x720 BGR on the RGA.
    #[inline]
    pub fn rkmpp() -> Self {
        Self::new("scale_rkrga=w=1280:h=720:format=bgr24,hwmap=mode=read,format=bgr24")
            .with_hw_device("rkmpp")
            .with_decoder("hevc_rkmpp")
    }

    /// Decodes on the given hardware device type.
    #[inline]
    #[must_use]
    pub fn with_hw_device(mut self, device: impl Into<String>) -> Self {
        self.hw_device = Some(device.into());
        self
    }

    /// Opens the decoder with the given name instead of the default one.
    #[inline]
    #[must_use]
    pub fn with_decoder(mut self, name: impl Into<String>) -> Self {
        self.decoder = Some(name.into());
        self
    }

    /// Replaces the hardware output format policy.
    #[inline]
    #[must_use]
    pub fn with_format_selector<S>(mut self, selector: S) -> Self
    where
        S: FormatSelector<format::Pixel> + 'static,
    {
        self.format_selector = Box::new(selector);
        self
    }
}

impl Default for FfmpegConfig {
    #[inline]
    fn default() -> Self {
        Self::new("format=bgr24")
    }
}

fn to_rational32(r: Rational) -> Option<Rational32> {
    (r.denominator() != 0).then(|| Rational32::new(r.numerator(), r.denominator()))
}

fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == EAGAIN)
}

/// Reads packets of the best video stream of a container.
pub struct FfmpegPacketSource {
    input_ctx: context::Input,
    stream_index: usize,
}

impl FfmpegPacketSource {
    /// Opens `input` and selects its best video stream.
    ///
    /// # Errors
    ///
    /// * `PumpError::FfmpegInternalError` - If FFmpeg initialization fails
    /// * `PumpError::FileReadError` - If the input file cannot be opened or read
    /// * `PumpError::NoVideoStream` - If no video stream is found in the input file
    #[inline]
    pub fn new<P: AsRef<Path>>(input: P) -> Result<Self, PumpError> {
        ffmpeg::init()?;

        let input_ctx = format::input(&input).map_err(|e| PumpError::FileReadError {
            cause: e.to_string(),
        })?;
        let stream_index = input_ctx
            .streams()
            .best(Type::Video)
            .ok_or(PumpError::NoVideoStream)?
            .index();
        tracing::info!(
            path = %input.as_ref().display(),
            stream_index,
            "opened input"
        );

        Ok(Self {
            input_ctx,
            stream_index,
        })
    }

    /// Index of the selected stream within the container.
    #[inline]
    pub const fn stream_index(&self) -> usize {
        self.stream_index
    }

    /// Properties of the selected stream.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::NoVideoStream` if the selected stream disappeared.
    #[inline]
    pub fn stream_info(&self) -> Result<StreamInfo, PumpError> {
        let stream = self
            .input_ctx
            .stream(self.stream_index)
            .ok_or(PumpError::NoVideoStream)?;
        let time_base = to_rational32(stream.time_base()).unwrap_or_else(|| Rational32::new(0, 1));
        let frame_rate = to_rational32(stream.avg_frame_rate());
        let total_frames =
            estimate_total_frames(stream.frames(), Some(stream.duration()), time_base, frame_rate);
        if total_frames.is_none() {
            tracing::warn!("total frame count is unavailable for this stream");
        }

        let parameters = stream.parameters();
        let (width, height) = codec::context::Context::from_parameters(parameters)
            .and_then(|ctx| ctx.decoder().video())
            .map_or((0, 0), |video| (video.width() as usize, video.height() as usize));

        Ok(StreamInfo {
            width,
            height,
            time_base,
            frame_rate,
            total_frames,
        })
    }
}

impl PacketSource for FfmpegPacketSource {
    type Packet = Packet;

    fn next_packet(&mut self) -> Result<Option<Packet>, PumpError> {
        loop {
            match self.input_ctx.packets().next() {
                None | Some(Err(ffmpeg::Error::Eof)) => return Ok(None),
                Some(Err(e)) => return Err(e.into()),
                Some(Ok((stream, packet))) => {
                    if stream.index() == self.stream_index {
                        return Ok(Some(packet));
                    }
                }
            }
        }
    }
}

/// A reference to a hardware device, released on drop.
struct HwDeviceContext {
    ctx: *mut ffi::AVBufferRef,
}

impl HwDeviceContext {
    fn create(name: &str) -> Result<Self, PumpError> {
        let unavailable = |cause: String| PumpError::HardwareUnavailable {
            device: name.to_string(),
            cause,
        };
        let c_name = CString::new(name).map_err(|e| unavailable(e.to_string()))?;

        // SAFETY: `c_name` is a valid NUL-terminated string for the duration of
        // the call, and `ctx` is only kept if FFmpeg reports success.
        unsafe {
            let device_type = ffi::av_hwdevice_find_type_by_name(c_name.as_ptr());
            if device_type == ffi::AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
                return Err(unavailable(
                    "device type is not supported by this FFmpeg build".to_string(),
                ));
            }

            let mut ctx: *mut ffi::AVBufferRef = ptr::null_mut();
            let ret =
                ffi::av_hwdevice_ctx_create(&mut ctx, device_type, ptr::null(), ptr::null_mut(), 0);
            if ret < 0 || ctx.is_null() {
                return Err(unavailable(ffmpeg::Error::from(ret).to_string()));
            }
            Ok(Self { ctx })
        }
    }

    /// A new reference for a codec context to own.
    fn create_ref(&self) -> *mut ffi::AVBufferRef {
        // SAFETY: `self.ctx` is a live buffer reference until drop.
        unsafe { ffi::av_buffer_ref(self.ctx) }
    }
}

impl Drop for HwDeviceContext {
    fn drop(&mut self) {
        if !self.ctx.is_null() {
            // SAFETY: we own exactly one reference, which is released once.
            unsafe {
                ffi::av_buffer_unref(&mut self.ctx);
            }
        }
    }
}

unsafe extern "C" fn select_hw_format(
    ctx: *mut ffi::AVCodecContext,
    offered: *const ffi::AVPixelFormat,
) -> ffi::AVPixelFormat {
    // SAFETY: `opaque` is set to a `BoxedSelector` owned by the `FfmpegDecoder`
    // that owns this codec context, and `offered` is terminated by
    // `AV_PIX_FMT_NONE` per the libavcodec contract.
    unsafe {
        let selector = (*ctx).opaque as *const BoxedSelector;
        if selector.is_null() {
            return *offered;
        }

        let mut formats = Vec::new();
        let mut cursor = offered;
        while *cursor != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
            formats.push(format::Pixel::from(*cursor));
            cursor = cursor.add(1);
        }
        tracing::debug!(?formats, "decoder offered pixel formats");

        match (*selector).select(&formats) {
            Some(chosen) => {
                tracing::info!(format = ?chosen, "negotiated decoder output format");
                chosen.into()
            }
            None => {
                tracing::error!(?formats, "no acceptable hardware output format offered");
                ffi::AVPixelFormat::AV_PIX_FMT_NONE
            }
        }
    }
}

/// Decodes packets with libavcodec, optionally on a hardware device.
pub struct FfmpegDecoder {
    decoder: decoder::Video,
    // Dropped after `decoder`, which may still call back into the selector
    // or reference the device while it is being closed.
    _hw_device: Option<HwDeviceContext>,
    _selector: Option<Box<BoxedSelector>>,
}

impl FfmpegDecoder {
    /// Opens a decoder for the stream selected by `source`.
    ///
    /// `config` is consumed for its format selector, which must outlive the
    /// decoder.
    ///
    /// # Errors
    ///
    /// * `PumpError::NoVideoStream` - If the stream cannot be decoded as video
    /// * `PumpError::UnsupportedFormat` - If the named decoder does not exist
    /// * `PumpError::HardwareUnavailable` - If the hardware device cannot be created
    /// * `PumpError::FfmpegInternalError` - For any other codec setup failure
    #[inline]
    pub fn new(source: &FfmpegPacketSource, config: FfmpegConfig) -> Result<Self, PumpError> {
        let stream = source
            .input_ctx
            .stream(source.stream_index)
            .ok_or(PumpError::NoVideoStream)?;
        let mut context = codec::context::Context::from_parameters(stream.parameters())?;

        let mut hw_device = None;
        let mut selector = None;
        if let Some(name) = config.hw_device.as_deref() {
            let device = HwDeviceContext::create(name)?;
            let boxed: Box<BoxedSelector> = Box::new(config.format_selector);
            // SAFETY: the codec context takes its own device reference, and
            // `opaque` points at a heap allocation kept alive in `Self`.
            unsafe {
                let raw = context.as_mut_ptr();
                (*raw).hw_device_ctx = device.create_ref();
                (*raw).opaque = ptr::from_ref::<BoxedSelector>(&*boxed).cast_mut().cast::<c_void>();
                (*raw).get_format = Some(select_hw_format);
            }
            tracing::info!(device = name, "decoding on hardware");
            hw_device = Some(device);
            selector = Some(boxed);
        } else {
            context.set_threading(threading::Config::kind(threading::Type::Frame));
        }

        let decoder = match config.decoder.as_deref() {
            Some(name) => {
                let codec =
                    decoder::find_by_name(name).ok_or_else(|| PumpError::UnsupportedFormat {
                        fmt: format!("decoder {name}"),
                    })?;
                tracing::info!(decoder = name, "opening decoder by name");
                context.decoder().open_as(codec)?.video()?
            }
            None => context
                .decoder()
                .video()
                .map_err(|_| PumpError::NoVideoStream)?,
        };
        tracing::debug!(format = ?decoder.format(), "decoder opened");

        Ok(Self {
            decoder,
            _hw_device: hw_device,
            _selector: selector,
        })
    }
}

impl Stage for FfmpegDecoder {
    type Input = Packet;
    type Output = frame::Video;

    fn submit(&mut self, packet: Packet) -> Result<Submit<Packet>, PumpError> {
        match self.decoder.send_packet(&packet) {
            Ok(()) => Ok(Submit::Accepted),
            Err(e) if is_again(&e) => Ok(Submit::Busy(packet)),
            Err(e) => Err(e.into()),
        }
    }

    fn retrieve(&mut self) -> Result<Pull<frame::Video>, PumpError> {
        let mut decoded = frame::Video::empty();
        match self.decoder.receive_frame(&mut decoded) {
            Ok(()) => {
                if decoded.pts().is_none() {
                    let estimate = decoded.timestamp();
                    decoded.set_pts(estimate);
                }
                Ok(Pull::Produced(decoded))
            }
            Err(ffmpeg::Error::Eof) => Ok(Pull::EndOfStream),
            Err(e) if is_again(&e) => Ok(Pull::NeedsMoreInput),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<(), PumpError> {
        self.decoder.send_eof()?;
        Ok(())
    }
}

/// Runs decoded frames through a libavfilter graph.
///
/// The graph is built from the first submitted frame, so its input matches
/// whatever the decoder negotiated, including hardware frames.
pub struct FilterGraphTransform {
    description: String,
    time_base: Rational32,
    graph: Option<filter::Graph>,
    flushed: bool,
}

impl FilterGraphTransform {
    /// Creates a transform applying `description` to frames timed in `time_base`.
    #[inline]
    pub fn new(description: impl Into<String>, time_base: Rational32) -> Self {
        Self {
            description: description.into(),
            time_base,
            graph: None,
            flushed: false,
        }
    }

    fn graph_error(&self, cause: impl ToString) -> PumpError {
        PumpError::FilterGraphError {
            filter: self.description.clone(),
            cause: cause.to_string(),
        }
    }

    fn build(&self, frame: &frame::Video) -> Result<filter::Graph, PumpError> {
        let mut graph = filter::Graph::new();
        let buffer = filter::find("buffer").ok_or_else(|| self.graph_error("no buffer filter"))?;
        let buffersink =
            filter::find("buffersink").ok_or_else(|| self.graph_error("no buffersink filter"))?;

        let aspect = to_rational32(frame.aspect_ratio())
            .filter(|r| *r.numer() != 0)
            .unwrap_or_else(|| Rational32::new(1, 1));
        let args = buffer_source_args(
            frame.width(),
            frame.height(),
            ffi::AVPixelFormat::from(frame.format()) as i32,
            self.time_base,
            aspect,
        );
        graph
            .add(&buffer, "in", &args)
            .map_err(|e| self.graph_error(e))?;
        graph
            .add(&buffersink, "out", "")
            .map_err(|e| self.graph_error(e))?;

        // SAFETY: the frame and the graph are alive for the whole block, and
        // `av_buffersrc_parameters_set` takes its own reference to the frames
        // context before `params` is freed.
        unsafe {
            let hw_frames_ctx = (*frame.as_ptr()).hw_frames_ctx;
            if !hw_frames_ctx.is_null() {
                let mut source = graph
                    .get("in")
                    .ok_or_else(|| self.graph_error("buffer source vanished"))?;
                let params = ffi::av_buffersrc_parameters_alloc();
                if params.is_null() {
                    return Err(self.graph_error("failed to allocate buffer source parameters"));
                }
                (*params).hw_frames_ctx = hw_frames_ctx;
                let ret = ffi::av_buffersrc_parameters_set(source.as_mut_ptr(), params);
                ffi::av_free(params.cast::<c_void>());
                if ret < 0 {
                    return Err(self.graph_error(ffmpeg::Error::from(ret)));
                }
            }
        }

        graph
            .output("in", 0)
            .and_then(|parser| parser.input("out", 0))
            .and_then(|parser| parser.parse(&self.description))
            .map_err(|e| self.graph_error(e))?;
        graph.validate().map_err(|e| self.graph_error(e))?;
        tracing::info!(filter = %self.description, %args, "filter graph configured");
        Ok(graph)
    }
}

impl Stage for FilterGraphTransform {
    type Input = frame::Video;
    type Output = frame::Video;

    fn submit(&mut self, decoded: frame::Video) -> Result<Submit<frame::Video>, PumpError> {
        if self.graph.is_none() {
            let graph = self.build(&decoded)?;
            self.graph = Some(graph);
        }
        let Some(graph) = self.graph.as_mut() else {
            return Err(PumpError::GenericTransformError {
                cause: "filter graph missing".to_string(),
            });
        };
        let mut source = graph.get("in").ok_or_else(|| PumpError::GenericTransformError {
            cause: "buffer source missing".to_string(),
        })?;
        match source.source().add(&decoded) {
            Ok(()) => Ok(Submit::Accepted),
            Err(e) if is_again(&e) => Ok(Submit::Busy(decoded)),
            Err(e) => Err(e.into()),
        }
    }

    fn retrieve(&mut self) -> Result<Pull<frame::Video>, PumpError> {
        let Some(graph) = self.graph.as_mut() else {
            // Nothing was ever submitted.
            return Ok(if self.flushed {
                Pull::EndOfStream
            } else {
                Pull::NeedsMoreInput
            });
        };
        let mut sink = graph.get("out").ok_or_else(|| PumpError::GenericTransformError {
            cause: "buffer sink missing".to_string(),
        })?;
        let mut filtered = frame::Video::empty();
        match sink.sink().frame(&mut filtered) {
            Ok(()) => Ok(Pull::Produced(filtered)),
            Err(ffmpeg::Error::Eof) => Ok(Pull::EndOfStream),
            Err(e) if is_again(&e) => Ok(Pull::NeedsMoreInput),
            Err(e) => Err(e.into()),
        }
    }

    fn flush(&mut self) -> Result<(), PumpError> {
        self.flushed = true;
        if let Some(graph) = self.graph.as_mut() {
            let mut source = graph.get("in").ok_or_else(|| PumpError::GenericTransformError {
                cause: "buffer source missing".to_string(),
            })?;
            source.source().flush()?;
        }
        Ok(())
    }
}

impl FinishedFrame for frame::Video {
    #[inline]
    fn width(&self) -> u32 {
        frame::Video::width(self)
    }

    #[inline]
    fn height(&self) -> u32 {
        frame::Video::height(self)
    }

    #[inline]
    fn component_count(&self) -> usize {
        self.format()
            .descriptor()
            .map_or(0, |desc| usize::from(desc.nb_components()))
    }

    #[inline]
    fn stride(&self) -> usize {
        frame::Video::stride(self, 0)
    }

    #[inline]
    fn data(&self) -> &[u8] {
        frame::Video::data(self, 0)
    }

    #[inline]
    fn pts(&self) -> Option<i64> {
        ffmpeg::Frame::pts(self)
    }
}

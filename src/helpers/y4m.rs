use std::io::Read;

use num_rational::Rational32;
use v_frame::chroma::ChromaSubsampling;

use crate::{
    StreamInfo,
    error::PumpError,
    stage::{PacketSource, Pull, Stage, Submit},
};

/// One uncompressed y4m frame, carried through the pipeline as a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPacket {
    /// Index of the stream the packet belongs to. y4m files carry one stream.
    pub stream_index: usize,
    /// The Y, U and V planes back to back.
    pub data: Vec<u8>,
    /// Presentation timestamp in frame units.
    pub pts: Option<i64>,
}

/// Frame layout shared by the y4m source and the raw decoder.
#[derive(Debug, Clone, Copy)]
pub struct RawGeometry {
    /// Luma width in pixels.
    pub width: usize,
    /// Luma height in pixels.
    pub height: usize,
    /// Chroma layout of the planes.
    pub chroma_sampling: ChromaSubsampling,
    /// Bits per sample. Samples above 8 bits are stored as little-endian `u16`.
    pub bit_depth: usize,
}

impl RawGeometry {
    /// Bytes used by one sample.
    #[inline]
    pub const fn bytes_per_sample(&self) -> usize {
        if self.bit_depth > 8 { 2 } else { 1 }
    }

    /// Horizontal and vertical chroma decimation as right shifts, or `None`
    /// for monochrome content.
    #[inline]
    pub fn chroma_shift(&self) -> Option<(usize, usize)> {
        match self.chroma_sampling {
            ChromaSubsampling::Yuv420 => Some((1, 1)),
            ChromaSubsampling::Yuv422 => Some((1, 0)),
            ChromaSubsampling::Yuv444 => Some((0, 0)),
            _ => None,
        }
    }

    /// Width and height of the chroma planes in samples.
    #[inline]
    pub fn chroma_size(&self) -> (usize, usize) {
        self.chroma_shift().map_or((0, 0), |(sx, sy)| {
            ((self.width + sx) >> sx, (self.height + sy) >> sy)
        })
    }

    /// Bytes of the Y, U and V planes.
    #[inline]
    pub fn plane_sizes(&self) -> [usize; 3] {
        let bps = self.bytes_per_sample();
        let (cw, ch) = self.chroma_size();
        let chroma = cw * ch * bps;
        [self.width * self.height * bps, chroma, chroma]
    }

    /// Bytes of one complete frame.
    #[inline]
    pub fn frame_size(&self) -> usize {
        self.plane_sizes().iter().sum()
    }
}

/// A decoded planar picture.
#[derive(Debug, Clone)]
pub struct RawFrame {
    /// Layout of `planes`.
    pub geometry: RawGeometry,
    /// The Y, U and V planes, tightly packed. Chroma planes are empty for
    /// monochrome content.
    pub planes: [Vec<u8>; 3],
    /// Presentation timestamp in frame units.
    pub pts: Option<i64>,
}

impl RawFrame {
    /// Checks that every plane holds at least the bytes its geometry requires.
    ///
    /// # Errors
    ///
    /// Returns [`PumpError::TruncatedPacket`] for the first plane that is too short.
    #[inline]
    pub fn check_planes(&self) -> Result<(), PumpError> {
        for (plane, expected) in self.planes.iter().zip(self.geometry.plane_sizes()) {
            if plane.len() < expected {
                return Err(PumpError::TruncatedPacket {
                    expected,
                    actual: plane.len(),
                });
            }
        }
        Ok(())
    }

    /// Reads one sample of `plane` scaled to 8 bits.
    ///
    /// # Panics
    ///
    /// Panics if the sample lies outside the plane. Frames that passed
    /// [`check_planes`](RawFrame::check_planes) are safe to read anywhere
    /// inside their geometry.
    #[inline]
    pub fn sample(&self, plane: usize, x: usize, y: usize) -> u8 {
        let (plane_width, _) = if plane == 0 {
            (self.geometry.width, self.geometry.height)
        } else {
            self.geometry.chroma_size()
        };
        let data = &self.planes[plane];
        let index = y * plane_width + x;
        if self.geometry.bytes_per_sample() == 1 {
            data[index]
        } else {
            let value = u16::from_le_bytes([data[index * 2], data[index * 2 + 1]]);
            (value >> (self.geometry.bit_depth - 8)).min(255) as u8
        }
    }
}

const fn map_y4m_color_space(color_space: y4m::Colorspace) -> Option<ChromaSubsampling> {
    use y4m::Colorspace::{
        C420, C420jpeg, C420mpeg2, C420p10, C420p12, C420paldv, C422, C422p10, C422p12, C444,
        C444p10, C444p12, Cmono, Cmono12,
    };
    match color_space {
        Cmono | Cmono12 => Some(ChromaSubsampling::Monochrome),
        C420jpeg | C420paldv | C420mpeg2 | C420 | C420p10 | C420p12 => {
            Some(ChromaSubsampling::Yuv420)
        }
        C422 | C422p10 | C422p12 => Some(ChromaSubsampling::Yuv422),
        C444 | C444p10 | C444p12 => Some(ChromaSubsampling::Yuv444),
        _ => None,
    }
}

/// Reads frames from a y4m stream and hands them out as packets.
///
/// Timestamps count frames, so the time base is the inverse of the frame rate.
pub struct Y4mPacketSource<R: Read> {
    decoder: y4m::Decoder<R>,
    geometry: RawGeometry,
    frame_rate: Rational32,
    next_pts: i64,
}

impl<R: Read> Y4mPacketSource<R> {
    /// Parses the y4m header from `reader`.
    ///
    /// # Errors
    ///
    /// Returns [`PumpError::GenericDecodeError`] if the header is malformed,
    /// or [`PumpError::UnsupportedFormat`] for colorspaces without a known
    /// chroma layout.
    #[inline]
    pub fn new(reader: R) -> Result<Self, PumpError> {
        let decoder = y4m::decode(reader).map_err(|e| PumpError::GenericDecodeError {
            cause: e.to_string(),
        })?;
        let color_space = decoder.get_colorspace();
        let chroma_sampling =
            map_y4m_color_space(color_space).ok_or_else(|| PumpError::UnsupportedFormat {
                fmt: format!("{color_space:?}"),
            })?;
        let framerate = decoder.get_framerate();
        let frame_rate = match (i32::try_from(framerate.num), i32::try_from(framerate.den)) {
            (Ok(num), Ok(den)) if num > 0 && den > 0 => Rational32::new(num, den),
            _ => {
                return Err(PumpError::UnsupportedFormat {
                    fmt: format!("frame rate {}/{}", framerate.num, framerate.den),
                });
            }
        };
        let geometry = RawGeometry {
            width: decoder.get_width(),
            height: decoder.get_height(),
            chroma_sampling,
            bit_depth: color_space.get_bit_depth(),
        };

        Ok(Self {
            geometry,
            frame_rate,
            decoder,
            next_pts: 0,
        })
    }

    /// Frame layout declared by the header.
    #[inline]
    pub const fn geometry(&self) -> RawGeometry {
        self.geometry
    }

    /// Stream properties declared by the header. y4m does not declare a frame count.
    #[inline]
    pub fn stream_info(&self) -> StreamInfo {
        StreamInfo {
            width: self.geometry.width,
            height: self.geometry.height,
            time_base: self.frame_rate.recip(),
            frame_rate: Some(self.frame_rate),
            total_frames: None,
        }
    }
}

impl<R: Read> PacketSource for Y4mPacketSource<R> {
    type Packet = RawPacket;

    fn next_packet(&mut self) -> Result<Option<RawPacket>, PumpError> {
        let frame = match self.decoder.read_frame() {
            Ok(frame) => frame,
            Err(y4m::Error::EOF) => return Ok(None),
            Err(e) => {
                return Err(PumpError::GenericDecodeError {
                    cause: e.to_string(),
                });
            }
        };

        let mut data = Vec::with_capacity(self.geometry.frame_size());
        data.extend_from_slice(frame.get_y_plane());
        data.extend_from_slice(frame.get_u_plane());
        data.extend_from_slice(frame.get_v_plane());

        let pts = self.next_pts;
        self.next_pts += 1;
        Ok(Some(RawPacket {
            stream_index: 0,
            data,
            pts: Some(pts),
        }))
    }
}

/// Splits raw packets into planar frames.
///
/// The decoder holds at most one frame. While that slot is occupied, further
/// packets are refused with [`Submit::Busy`].
#[derive(Debug)]
pub struct RawVideoDecoder {
    geometry: RawGeometry,
    slot: Option<RawFrame>,
    next_pts: i64,
    flushed: bool,
}

impl RawVideoDecoder {
    /// Creates a decoder for packets laid out as `geometry`.
    #[inline]
    pub const fn new(geometry: RawGeometry) -> Self {
        Self {
            geometry,
            slot: None,
            next_pts: 0,
            flushed: false,
        }
    }
}

impl Stage for RawVideoDecoder {
    type Input = RawPacket;
    type Output = RawFrame;

    fn submit(&mut self, packet: RawPacket) -> Result<Submit<RawPacket>, PumpError> {
        if self.flushed {
            return Err(PumpError::GenericDecodeError {
                cause: "packet submitted after flush".to_string(),
            });
        }
        if self.slot.is_some() {
            return Ok(Submit::Busy(packet));
        }

        let expected = self.geometry.frame_size();
        if packet.data.len() != expected {
            return Err(PumpError::TruncatedPacket {
                expected,
                actual: packet.data.len(),
            });
        }

        // Missing timestamps continue from the last known one.
        let pts = packet.pts.unwrap_or(self.next_pts);
        self.next_pts = pts + 1;

        let [y_size, u_size, _] = self.geometry.plane_sizes();
        let mut data = packet.data;
        let v = data.split_off(y_size + u_size);
        let u = data.split_off(y_size);
        self.slot = Some(RawFrame {
            geometry: self.geometry,
            planes: [data, u, v],
            pts: Some(pts),
        });
        Ok(Submit::Accepted)
    }

    fn retrieve(&mut self) -> Result<Pull<RawFrame>, PumpError> {
        Ok(match self.slot.take() {
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

use std::iter::FusedIterator;

use crate::{
    StreamInfo,
    error::PumpError,
    session::{Picture, Session, Termination},
    stage::{FinishedFrame, PacketSource, Pull, Stage, Submit},
};

/// Where the pump is in the lifetime of its stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    /// Normal operation: outputs are pulled, and packets read on demand.
    Running,
    /// The source is exhausted and the decoder has been flushed.
    DrainingDecoder,
    /// The decoder is exhausted and the transform has been flushed.
    DrainingTransform,
    /// Terminal. No stage is touched again.
    Finished,
}

/// Demand-driven pump over a packet source, a decode stage and a transform stage.
///
/// Each call to [`next_frame`](FramePump::next_frame) does just enough work to
/// produce one finished frame. Stages are always checked output-first
/// (transform, then decoder, then a new packet) because earlier calls may have
/// left buffered output behind. This keeps frames in presentation order and
/// avoids reading packets that are not needed yet.
///
/// The pump is single threaded and blocking. Stages are owned by the pump and
/// released when it is dropped.
///
/// ## Examples
///
/// ```no_run
/// use av_frame_pump::{OutputFormat, TransformConfig, from_y4m_file};
///
/// let config = TransformConfig::new(OutputFormat::Bgr24);
/// let mut pump = from_y4m_file("video.y4m", &config)?;
/// while let Some(picture) = pump.next_frame() {
///     println!(
///         "frame {} at {:.3}s: {}x{}",
///         picture.sequence_number(),
///         pump.session().last_pts_seconds(),
///         picture.width(),
///         picture.height()
///     );
/// }
/// if let Some(av_frame_pump::Termination::Failed(e)) = pump.termination() {
///     eprintln!("pipeline aborted: {e}");
/// }
/// # Ok::<(), av_frame_pump::PumpError>(())
/// ```
pub struct FramePump<S, D, T>
where
    S: PacketSource,
    D: Stage<Input = S::Packet>,
    T: Stage<Input = D::Output>,
    T::Output: FinishedFrame,
{
    source: S,
    decoder: D,
    transform: T,
    state: PumpState,
    /// A packet the decoder refused while the busy-drain produced output.
    /// It is resubmitted before any new packet is read.
    pending: Option<S::Packet>,
    session: Session,
}

impl<S, D, T> FramePump<S, D, T>
where
    S: PacketSource,
    D: Stage<Input = S::Packet>,
    T: Stage<Input = D::Output>,
    T::Output: FinishedFrame,
{
    /// Assembles a pump from its three stages.
    #[inline]
    pub fn new(source: S, decoder: D, transform: T, info: &StreamInfo) -> Self {
        Self {
            source,
            decoder,
            transform,
            state: PumpState::Running,
            pending: None,
            session: Session::new(info),
        }
    }

    /// Returns the next finished frame, or `None` once the stream is exhausted
    /// or the pipeline failed.
    ///
    /// Use [`termination`](FramePump::termination) to tell the two apart.
    #[inline]
    pub fn next_frame(&mut self) -> Option<Picture> {
        let mut picture = Picture::new();
        self.next_frame_into(&mut picture).then_some(picture)
    }

    /// Like [`next_frame`](FramePump::next_frame), but reuses the buffer of
    /// `out`. Returns `false` when no frame was written.
    #[inline]
    pub fn next_frame_into(&mut self, out: &mut Picture) -> bool {
        if self.state == PumpState::Finished {
            return false;
        }

        let result = self
            .pump()
            .and_then(|frame| match frame {
                Some(frame) => self.session.materialize(&frame, out).map(|()| true),
                None => Ok(false),
            });

        match result {
            Ok(true) => {
                tracing::trace!(
                    sequence = self.session.frame_sequence_number(),
                    pts = self.session.last_pts(),
                    "frame ready"
                );
                true
            }
            Ok(false) => {
                tracing::debug!(
                    frames = self.session.frame_sequence_number(),
                    "pipeline drained"
                );
                self.finish(Termination::EndOfStream);
                false
            }
            Err(e) => {
                tracing::error!(error = %e, state = ?self.state, "aborting frame pump");
                self.finish(Termination::Failed(e));
                false
            }
        }
    }

    /// The current pump state.
    #[inline]
    pub const fn state(&self) -> PumpState {
        self.state
    }

    /// The session bookkeeping for this stream.
    #[inline]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Output width, fixed by the first finished frame.
    #[inline]
    pub fn frame_width(&self) -> u32 {
        self.session.frame_width()
    }

    /// Output height, fixed by the first finished frame.
    #[inline]
    pub fn frame_height(&self) -> u32 {
        self.session.frame_height()
    }

    /// Sequence number of the most recent frame.
    #[inline]
    pub const fn frame_sequence_number(&self) -> u64 {
        self.session.frame_sequence_number()
    }

    /// The declared or estimated number of frames in the stream.
    #[inline]
    pub const fn estimated_total_frames(&self) -> Option<u64> {
        self.session.estimated_total_frames()
    }

    /// Timestamp of the most recent frame, in time-base units.
    #[inline]
    pub const fn last_pts(&self) -> Option<i64> {
        self.session.last_pts()
    }

    /// Timestamp of the most recent frame, in seconds.
    #[inline]
    pub const fn last_pts_seconds(&self) -> f64 {
        self.session.last_pts_seconds()
    }

    /// Whether the pump has stopped producing frames.
    #[inline]
    pub const fn is_finished(&self) -> bool {
        self.session.is_finished()
    }

    /// Why the pump stopped, once it has.
    #[inline]
    pub const fn termination(&self) -> Option<&Termination> {
        self.session.termination()
    }

    fn finish(&mut self, termination: Termination) {
        self.state = PumpState::Finished;
        self.pending = None;
        self.session.terminate(termination);
    }

    fn enter(&mut self, state: PumpState) {
        tracing::debug!(from = ?self.state, to = ?state, "frame pump state change");
        self.state = state;
    }

    /// Drives the stages until a finished frame is available.
    ///
    /// `Ok(None)` means every stage was drained.
    fn pump(&mut self) -> Result<Option<T::Output>, PumpError> {
        loop {
            match self.state {
                PumpState::Finished => return Ok(None),
                PumpState::Running => {
                    // A transform end-of-stream before we flushed it carries no
                    // information, so it is handled like a request for input.
                    if let Pull::Produced(frame) = self.transform.retrieve()? {
                        return Ok(Some(frame));
                    }

                    match self.decoder.retrieve()? {
                        Pull::Produced(decoded) => {
                            self.feed_transform(decoded)?;
                            continue;
                        }
                        Pull::NeedsMoreInput => {}
                        Pull::EndOfStream => {
                            self.transform.flush()?;
                            self.enter(PumpState::DrainingTransform);
                            continue;
                        }
                    }

                    let packet = match self.pending.take() {
                        Some(packet) => packet,
                        None => match self.source.next_packet()? {
                            Some(packet) => packet,
                            None => {
                                self.decoder.flush()?;
                                self.enter(PumpState::DrainingDecoder);
                                continue;
                            }
                        },
                    };
                    if let Some(frame) = self.submit_packet(packet)? {
                        return Ok(Some(frame));
                    }
                }
                PumpState::DrainingDecoder => {
                    if let Pull::Produced(frame) = self.transform.retrieve()? {
                        return Ok(Some(frame));
                    }
                    match self.decoder.retrieve()? {
                        Pull::Produced(decoded) => self.feed_transform(decoded)?,
                        Pull::NeedsMoreInput | Pull::EndOfStream => {
                            self.transform.flush()?;
                            self.enter(PumpState::DrainingTransform);
                        }
                    }
                }
                PumpState::DrainingTransform => match self.transform.retrieve()? {
                    Pull::Produced(frame) => return Ok(Some(frame)),
                    Pull::NeedsMoreInput | Pull::EndOfStream => return Ok(None),
                },
            }
        }
    }

    /// Submits a packet, draining the decoder while it pushes back.
    ///
    /// Returns a finished frame if one became available while draining. In
    /// that case the packet is parked in `pending` and retried on the next call.
    fn submit_packet(&mut self, packet: S::Packet) -> Result<Option<T::Output>, PumpError> {
        let mut packet = packet;
        loop {
            match self.decoder.submit(packet)? {
                Submit::Accepted => return Ok(None),
                Submit::Busy(refused) => packet = refused,
            }

            tracing::debug!("decoder busy, draining before resubmitting");
            match self.decoder.retrieve()? {
                Pull::Produced(decoded) => self.feed_transform(decoded)?,
                Pull::NeedsMoreInput | Pull::EndOfStream => return Err(PumpError::DecoderStall),
            }

            if let Pull::Produced(frame) = self.transform.retrieve()? {
                self.pending = Some(packet);
                return Ok(Some(frame));
            }
        }
    }

    fn feed_transform(&mut self, decoded: D::Output) -> Result<(), PumpError> {
        match self.transform.submit(decoded)? {
            Submit::Accepted => Ok(()),
            Submit::Busy(_) => Err(PumpError::TransformBusy),
        }
    }
}

impl<S, D, T> Iterator for FramePump<S, D, T>
where
    S: PacketSource,
    D: Stage<Input = S::Packet>,
    T: Stage<Input = D::Output>,
    T::Output: FinishedFrame,
{
    type Item = Picture;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame()
    }
}

impl<S, D, T> FusedIterator for FramePump<S, D, T>
where
    S: PacketSource,
    D: Stage<Input = S::Packet>,
    T: Stage<Input = D::Output>,
    T::Output: FinishedFrame,
{
}

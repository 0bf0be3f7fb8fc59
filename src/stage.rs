//! Capability contracts between the frame pump and its collaborators.
//!
//! A pipeline is made of one [`PacketSource`] and two [`Stage`]s: a decoder
//! turning packets into decoded frames, and a transform turning decoded frames
//! into finished frames. Both stages are partial, buffered producers: they may
//! want several inputs before yielding an output, and may refuse input until
//! some output has been drained.

use crate::error::PumpError;

/// Result of pulling from a [`Stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pull<T> {
    /// The stage produced an output.
    Produced(T),
    /// The stage needs more input before it can produce anything.
    NeedsMoreInput,
    /// The stage has been flushed and every buffered output was retrieved.
    EndOfStream,
}

/// Result of pushing into a [`Stage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submit<T> {
    /// The stage took ownership of the input.
    Accepted,
    /// The stage's internal queue is full. The input is handed back and must
    /// be resubmitted after at least one output has been retrieved.
    Busy(T),
}

impl<T> Pull<T> {
    /// Returns `true` if the stage produced an output.
    #[inline]
    pub const fn is_produced(&self) -> bool {
        matches!(self, Pull::Produced(_))
    }
}

/// Produces compressed packets belonging to one selected stream.
pub trait PacketSource {
    /// The compressed unit handed to the decode stage.
    type Packet;

    /// Reads the next packet of the selected stream.
    ///
    /// Packets of other streams are discarded internally, never returned.
    ///
    /// # Errors
    ///
    /// Returns `Ok(None)` at end of stream. Any `Err` is unrecoverable for the
    /// session.
    fn next_packet(&mut self) -> Result<Option<Self::Packet>, PumpError>;
}

/// A buffered processing stage with a send/receive contract.
///
/// Decoders and transforms share this contract: [`submit`](Stage::submit) may
/// push back with [`Submit::Busy`], [`retrieve`](Stage::retrieve) may ask for
/// more input, and after [`flush`](Stage::flush) the stage must be drained
/// until it reports [`Pull::EndOfStream`].
pub trait Stage {
    /// What the stage consumes.
    type Input;
    /// What the stage produces.
    type Output;

    /// Offers one input to the stage. Accepted inputs are owned by the stage
    /// from then on.
    ///
    /// # Errors
    ///
    /// Any `Err` is unrecoverable for the session.
    fn submit(&mut self, input: Self::Input) -> Result<Submit<Self::Input>, PumpError>;

    /// Pulls one output from the stage.
    ///
    /// # Errors
    ///
    /// Any `Err` is unrecoverable for the session.
    fn retrieve(&mut self) -> Result<Pull<Self::Output>, PumpError>;

    /// Signals that no further input will ever be submitted.
    ///
    /// # Errors
    ///
    /// Any `Err` is unrecoverable for the session.
    fn flush(&mut self) -> Result<(), PumpError>;
}

/// A transformed picture ready to be copied out to the caller.
///
/// Only the first plane is read. Packed layouts with one (gray) or three
/// (e.g. BGR) components per pixel are supported by the pump; any other
/// component count aborts the session.
pub trait FinishedFrame {
    /// Width in pixels.
    fn width(&self) -> u32;
    /// Height in pixels.
    fn height(&self) -> u32;
    /// Number of interleaved components per pixel.
    fn component_count(&self) -> usize;
    /// Bytes between the starts of two consecutive rows.
    fn stride(&self) -> usize;
    /// The first plane, starting at the first row.
    fn data(&self) -> &[u8];
    /// Presentation timestamp in stream time-base units.
    fn pts(&self) -> Option<i64>;
}

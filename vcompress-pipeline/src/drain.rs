//! Drain-state protocol shared by the transcoding pipelines.

/// Outcome of polling one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainState {
    /// Nothing available; stop polling this stage for the current step.
    None,
    /// A control event was consumed; poll again before moving on.
    RetryImmediately,
    /// One unit of data moved to the next stage.
    Consumed,
}

impl DrainState {
    /// Whether the poll did anything at all.
    pub fn is_busy(self) -> bool {
        self != DrainState::None
    }
}

/// End-of-stream progress of a transcoding pipeline.
///
/// Each flag is only ever set after the previous one, so encoder end implies
/// decoder end implies extractor end.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EosFlags {
    /// The demuxer has no more samples for this track.
    pub extractor: bool,
    /// The decoder emitted its end-of-stream buffer.
    pub decoder: bool,
    /// The encoder emitted its end-of-stream buffer.
    pub encoder: bool,
}

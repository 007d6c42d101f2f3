use std::time::Duration;

/// Maps pipeline presentation times onto a recording's timeline.
///
/// The first frame lands at zero. After a pause the first frame is placed one
/// frame interval after the last recorded frame, so paused intervals are
/// dropped from the output rather than frozen. Times that would not advance
/// the timeline are rejected.
#[derive(Debug, Clone)]
pub struct RecordingTimeline {
    frame_interval: Duration,
    origin: Option<Duration>,
    offset: Duration,
    last: Option<Duration>,
    gap_pending: bool,
}

impl RecordingTimeline {
    pub fn new(frame_rate: u32) -> Self {
        Self {
            frame_interval: Duration::from_secs(1) / frame_rate.max(1),
            origin: None,
            offset: Duration::ZERO,
            last: None,
            gap_pending: false,
        }
    }

    /// Recording-relative time for a frame presented at `source_time`,
    /// or `None` if the frame must be dropped.
    pub fn map(&mut self, source_time: Duration) -> Option<Duration> {
        let origin = *self.origin.get_or_insert(source_time);
        let elapsed = source_time.checked_sub(origin)?;

        let time = match (self.gap_pending, self.last) {
            (true, Some(last)) => {
                let resumed_at = last + self.frame_interval;
                self.offset = elapsed.saturating_sub(resumed_at);
                resumed_at
            }
            _ => elapsed.saturating_sub(self.offset),
        };
        self.gap_pending = false;

        if self.last.is_some_and(|last| time <= last) {
            return None;
        }
        self.last = Some(time);
        Some(time)
    }

    /// Mark a discontinuity (capture was paused); the next frame is rebased.
    pub fn mark_gap(&mut self) {
        self.gap_pending = true;
    }

    /// Time of the last accepted frame.
    pub fn last(&self) -> Option<Duration> {
        self.last
    }

    pub fn frame_interval(&self) -> Duration {
        self.frame_interval
    }
}

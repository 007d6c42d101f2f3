/// Capture state machine.
///
/// ```text
/// Idle → Capturing ↔ Paused
///            ↓         ↓
///            Stopped → Idle
/// ```
///
/// `Stopped` is transient: it is reported while the pipeline is torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CaptureState {
    Idle,
    Capturing,
    Paused,
    Stopped,
}

impl CaptureState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_capturing(&self) -> bool {
        matches!(self, Self::Capturing)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Capturing or paused: the camera is open and the pipeline is wired.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Capturing | Self::Paused)
    }
}

/// Recording state machine, nested inside an active capture.
///
/// ```text
/// NotRecording → Recording → Finalizing → NotRecording
///                    ↓            ↓
///                Cancelling ←─────┘ → NotRecording
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordingState {
    NotRecording,
    Recording,
    Cancelling,
    Finalizing,
}

impl RecordingState {
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording)
    }

    /// A recording exists that has not yet reached a terminal outcome.
    pub fn is_in_flight(&self) -> bool {
        !matches!(self, Self::NotRecording)
    }
}

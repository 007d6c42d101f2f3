use crate::models::error::CaptureError;
use crate::models::recording::RecordingResult;
use crate::models::state::{CaptureState, RecordingState};

/// Event delegate for controller notifications.
///
/// Methods are called from whichever lane observed the event (caller thread,
/// muxing lane, supervisor). State-change notifications arrive in transition
/// order and may be delivered while a transition is still in progress: they
/// may read controller state but must not start another transition.
/// `on_error` and `on_recording_finished` carry no such restriction.
pub trait CaptureDelegate: Send + Sync {
    fn on_capture_state_changed(&self, state: CaptureState);

    fn on_recording_state_changed(&self, state: RecordingState);

    /// Faults that have no synchronous caller: device loss, mux failures,
    /// render failures inside the pipeline.
    fn on_error(&self, error: &CaptureError);

    /// Called when a recording file has been finalized.
    fn on_recording_finished(&self, result: &RecordingResult);
}

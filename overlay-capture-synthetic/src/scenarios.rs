//! End-to-end runs of the capture pipeline on the synthetic devices.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use overlay_capture_core::storage::metadata;
use overlay_capture_core::{
    AviMuxerFactory, CameraPosition, CaptureController, CaptureDelegate, CaptureError, CaptureState, FrameSize,
    MetadataItem, OverlaySource, RecordingResult, RecordingState, RecordingTarget, SessionConfiguration, SessionPreset,
};

use crate::{BannerOverlay, TestPatternCamera, ToneMicrophone};

const WAIT: Duration = Duration::from_secs(10);
const FRAME: FrameSize = FrameSize::new(64, 48);

type Controller = CaptureController<TestPatternCamera, ToneMicrophone>;

fn wait_until(mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT;
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for the pipeline");
        thread::sleep(Duration::from_millis(5));
    }
}

#[derive(Default)]
struct Observer {
    errors: Mutex<Vec<CaptureError>>,
    finished: Mutex<Vec<RecordingResult>>,
}

impl CaptureDelegate for Observer {
    fn on_capture_state_changed(&self, state: CaptureState) {
        log::debug!("capture -> {:?}", state);
    }

    fn on_recording_state_changed(&self, state: RecordingState) {
        log::debug!("recording -> {:?}", state);
    }

    fn on_error(&self, error: &CaptureError) {
        self.errors.lock().push(error.clone());
    }

    fn on_recording_finished(&self, result: &RecordingResult) {
        self.finished.lock().push(result.clone());
    }
}

fn controller_with(camera: TestPatternCamera, capture_audio: bool) -> (Controller, Arc<Observer>) {
    let config = SessionConfiguration {
        capture_audio,
        overlay_size: Some(FRAME),
        ..SessionConfiguration::new(SessionPreset::Vga640x480, CameraPosition::Back)
    };
    let controller = CaptureController::new(camera, ToneMicrophone::new(), config).unwrap();
    controller
        .set_overlay(Arc::new(OverlaySource::with_renderer(FRAME, BannerOverlay::new()).unwrap()))
        .unwrap();
    let observer = Arc::new(Observer::default());
    controller.set_delegate(observer.clone());
    (controller, observer)
}

fn controller() -> (Controller, Arc<Observer>) {
    controller_with(TestPatternCamera::new(CameraPosition::Back).with_frame_size(FRAME), false)
}

fn stop_recording(controller: &Controller) -> (RecordingState, Result<RecordingResult, CaptureError>) {
    let (tx, rx) = flume::unbounded();
    controller
        .stop_recording(move |controller, result| {
            let _ = tx.send((controller.recording_state(), result));
        })
        .unwrap();
    let outcome = rx.recv_timeout(WAIT).unwrap();
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err(), "completion delivered twice");
    outcome
}

#[test]
fn start_capture_with_high_preset() {
    let camera = TestPatternCamera::new(CameraPosition::Front).with_frame_size(FRAME);
    let controller = CaptureController::with_preset(camera, ToneMicrophone::new(), "high", CameraPosition::Front).unwrap();

    controller.start_capture().unwrap();
    assert_eq!(controller.capture_state(), CaptureState::Capturing);
    wait_until(|| controller.diagnostics().composited_frames > 0);
    controller.stop_capture().unwrap();
    assert_eq!(controller.capture_state(), CaptureState::Idle);
}

#[test]
fn unsupported_preset_is_a_device_error() {
    let camera = TestPatternCamera::new(CameraPosition::Front);
    assert!(matches!(
        CaptureController::with_preset(camera, ToneMicrophone::new(), "1920x1080", CameraPosition::Front),
        Err(CaptureError::DeviceError(_))
    ));
}

#[test]
fn immediate_stop_produces_a_valid_container() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("immediate.avi");
    let (controller, observer) = controller();
    controller
        .set_muxer_factory(Arc::new(AviMuxerFactory::new().with_metadata_sidecar()))
        .unwrap();
    controller.start_capture().unwrap();

    let target = RecordingTarget::new(&path, FrameSize::new(640, 480))
        .with_metadata(vec![MetadataItem::new("INAM", "Scenario B")]);
    controller.start_recording(target).unwrap();
    let (state, result) = stop_recording(&controller);

    assert_eq!(state, RecordingState::NotRecording);
    let result = result.unwrap();
    let bytes = std::fs::read(&path).unwrap();
    assert_eq!(&bytes[0..4], b"RIFF");
    assert_eq!(&bytes[8..12], b"AVI ");
    assert_eq!(metadata::read_metadata(&path).unwrap().checksum, result.checksum);
    assert_eq!(result.metadata.items, vec![MetadataItem::new("INAM", "Scenario B")]);
    assert_eq!(observer.finished.lock().len(), 1);

    controller.stop_capture().unwrap();
}

#[test]
fn recording_captures_video_and_audio() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("tone.avi");
    let camera = TestPatternCamera::new(CameraPosition::Back).with_frame_size(FRAME);
    let (controller, observer) = controller_with(camera, true);
    controller.start_capture().unwrap();
    controller.start_recording(RecordingTarget::new(&path, FRAME)).unwrap();

    wait_until(|| {
        let diagnostics = controller.diagnostics();
        diagnostics.recorded_video_frames >= 5 && diagnostics.recorded_audio_buffers >= 5
    });
    let (_, result) = stop_recording(&controller);
    let result = result.unwrap();
    assert!(result.video_frames >= 5);
    assert!(result.audio_sample_frames > 0);
    assert_eq!(result.metadata.audio_channels, Some(2));

    controller.stop_capture().unwrap();
    assert!(observer.errors.lock().is_empty());
}

#[test]
fn cancel_recording_removes_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cancelled.avi");
    let (controller, observer) = controller();
    controller
        .set_muxer_factory(Arc::new(AviMuxerFactory::new().with_metadata_sidecar()))
        .unwrap();
    controller.start_capture().unwrap();
    controller.start_recording(RecordingTarget::new(&path, FRAME)).unwrap();
    wait_until(|| controller.diagnostics().recorded_video_frames >= 3);

    controller.cancel_recording().unwrap();
    wait_until(|| controller.recording_state() == RecordingState::NotRecording);
    assert!(!path.exists());
    assert!(!metadata::sidecar_path(&path).exists());
    assert!(observer.finished.lock().is_empty());

    controller.stop_capture().unwrap();
}

#[test]
fn still_image_while_paused_is_the_last_composited_frame() {
    let (controller, _observer) = controller();
    controller.start_capture().unwrap();
    wait_until(|| controller.diagnostics().composited_frames >= 3);

    controller.pause_capture().unwrap();
    let paused = controller.capture_still_image().unwrap();
    let dropped = controller.diagnostics().frames_dropped_paused;
    wait_until(|| controller.diagnostics().frames_dropped_paused > dropped + 2);

    let later = controller.capture_still_image().unwrap();
    assert_eq!(paused, later);
    assert_eq!(paused.size, FRAME);
    assert!(paused.rgba.iter().any(|&b| b != 0));

    assert!(matches!(controller.pause_capture(), Err(CaptureError::InvalidState(_))));
    controller.resume_capture().unwrap();
    controller.stop_capture().unwrap();
}

#[test]
fn still_image_saves_as_png() {
    let dir = tempfile::tempdir().unwrap();
    let (controller, _observer) = controller();
    controller.start_capture().unwrap();
    wait_until(|| controller.diagnostics().composited_frames > 0);

    let still = controller.capture_still_image().unwrap();
    let path = dir.path().join("still.png");
    still.save_png(&path).unwrap();
    assert!(std::fs::metadata(&path).unwrap().len() > 0);
    controller.stop_capture().unwrap();
}

#[test]
fn failed_overlay_update_keeps_published_buffer() {
    let overlay = OverlaySource::initialize(FRAME).unwrap();
    let mut calls = 0;
    overlay.set_update_callback(move |context, _, _| {
        calls += 1;
        if calls == 1 {
            return Err("first draw fails".into());
        }
        context.clear(overlay_capture_core::Color::WHITE);
        Ok(true)
    });
    let before = overlay.published_frame();

    assert!(matches!(
        overlay.request_frame(Duration::ZERO),
        Err(CaptureError::RenderFailed(_))
    ));
    let after_failure = overlay.published_frame();
    assert!(Arc::ptr_eq(&before.shared_buffer(), &after_failure.shared_buffer()));
    assert!(after_failure.buffer().data().iter().all(|&b| b == 0));

    assert!(overlay.request_frame(Duration::from_millis(33)).unwrap());
    assert!(overlay.published_frame().buffer().data().iter().all(|&b| b == 255));
}

#[test]
fn device_loss_finalizes_recording_and_reports() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("lost.avi");
    let camera = TestPatternCamera::new(CameraPosition::Back)
        .with_frame_size(FRAME)
        .lose_device_after(20);
    let (controller, observer) = controller_with(camera, false);
    controller.start_capture().unwrap();
    controller.start_recording(RecordingTarget::new(&path, FRAME)).unwrap();

    wait_until(|| controller.capture_state() == CaptureState::Idle);
    wait_until(|| !observer.errors.lock().is_empty());
    assert!(matches!(observer.errors.lock()[0], CaptureError::DeviceError(_)));
    wait_until(|| observer.finished.lock().len() == 1);
    assert!(path.exists());
    assert_eq!(controller.recording_state(), RecordingState::NotRecording);
}

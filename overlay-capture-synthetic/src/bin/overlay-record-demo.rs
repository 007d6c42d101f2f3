//! Records a few seconds of the synthetic camera with a banner overlay and a
//! tone track, then saves a still of the last composited frame.
//!
//! Usage: `overlay-record-demo [output.avi] [seconds]`

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use overlay_capture_core::{
    CameraPosition, CaptureController, CaptureDelegate, CaptureError, CaptureState, MetadataItem, OverlaySource,
    RecordingResult, RecordingState, RecordingTarget, SessionConfiguration, SessionPreset,
};
use overlay_capture_synthetic::{BannerOverlay, TestPatternCamera, ToneMicrophone};

struct LoggingDelegate;

impl CaptureDelegate for LoggingDelegate {
    fn on_capture_state_changed(&self, state: CaptureState) {
        log::info!("capture state: {:?}", state);
    }

    fn on_recording_state_changed(&self, state: RecordingState) {
        log::info!("recording state: {:?}", state);
    }

    fn on_error(&self, error: &CaptureError) {
        log::error!("capture error: {}", error);
    }

    fn on_recording_finished(&self, result: &RecordingResult) {
        log::info!(
            "recording finished: {} ({} frames, {:.2}s, sha256 {})",
            result.file_path.display(),
            result.video_frames,
            result.duration_secs,
            result.checksum
        );
    }
}

fn run(output: PathBuf, seconds: u64) -> Result<(), CaptureError> {
    let config = SessionConfiguration {
        capture_audio: true,
        ..SessionConfiguration::new(SessionPreset::Vga640x480, CameraPosition::Back)
    };
    let size = config.overlay_frame_size();
    let controller = CaptureController::new(TestPatternCamera::new(CameraPosition::Back), ToneMicrophone::new(), config)?;
    controller.set_delegate(Arc::new(LoggingDelegate));
    controller.set_overlay(Arc::new(OverlaySource::with_renderer(size, BannerOverlay::new())?))?;

    controller.start_capture()?;
    let target = RecordingTarget::new(&output, size).with_metadata(vec![
        MetadataItem::new("INAM", "Overlay capture demo"),
        MetadataItem::new("ISFT", "overlay-record-demo"),
        MetadataItem::new("session", "synthetic"),
    ]);
    controller.start_recording(target)?;
    thread::sleep(Duration::from_secs(seconds));

    let (done, finished) = flume::bounded(1);
    controller.stop_recording(move |_, result| {
        let _ = done.send(result);
    })?;
    let result = finished
        .recv()
        .map_err(|_| CaptureError::MuxError("recording finished without a result".into()))??;

    let still = controller.capture_still_image()?;
    let still_path = output.with_extension("png");
    still.save_png(&still_path)?;
    controller.stop_capture()?;

    let diagnostics = controller.diagnostics();
    println!("recording: {}", result.file_path.display());
    println!("  frames:   {} ({:.2}s)", result.video_frames, result.duration_secs);
    println!("  audio:    {} sample frames", result.audio_sample_frames);
    println!("  sha256:   {}", result.checksum);
    println!("still:     {}", still_path.display());
    println!("pipeline:  {:?}", diagnostics);
    Ok(())
}

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let output = args.next().map(PathBuf::from).unwrap_or_else(|| PathBuf::from("overlay-demo.avi"));
    let seconds = args.next().and_then(|s| s.parse().ok()).unwrap_or(3);

    if let Err(e) = run(output, seconds) {
        log::error!("demo failed: {}", e);
        std::process::exit(1);
    }
}

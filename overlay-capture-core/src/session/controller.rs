use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};
use parking_lot::{Mutex, RwLock};

use super::pipeline::{Fault, Pipeline, RecordingSink, RenderMessage, RENDER_QUEUE_DEPTH};
use super::recording::{ExitHandler, LaneExit, MuxLane, RecordingTicket};
use crate::models::config::{CameraPosition, SessionConfiguration, SessionPreset};
use crate::models::device::{CameraDevice, PipelineDiagnostics};
use crate::models::error::CaptureError;
use crate::models::frame::StillImage;
use crate::models::recording::{RecordingResult, RecordingTarget};
use crate::models::state::{CaptureState, RecordingState};
use crate::overlay::source::OverlaySource;
use crate::storage::avi_muxer::AviMuxerFactory;
use crate::traits::camera_source::CameraSource;
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::compositor::Compositor;
use crate::traits::frame_sink::FrameSink;
use crate::traits::microphone_source::MicrophoneSource;
use crate::traits::muxer::{AudioFormat, MuxerFactory, StreamFormat};

/// Resources of one capture run.
struct CaptureRun {
    generation: u64,
    renders: Sender<RenderMessage>,
    render_lane: Option<JoinHandle<()>>,
    audio: bool,
}

impl CaptureRun {
    /// Stop the render lane, letting an in-flight render finish.
    fn shutdown(&mut self) {
        let _ = self.renders.send(RenderMessage::Shutdown);
        if let Some(lane) = self.render_lane.take() {
            if lane.join().is_err() {
                log::error!("render lane panicked");
            }
        }
    }
}

/// Everything a transition may touch. Guarded by the transition lock.
struct Ops<C: CameraSource, M: MicrophoneSource> {
    camera: C,
    microphone: M,
    muxer_factory: Arc<dyn MuxerFactory>,
    run: Option<CaptureRun>,
    recording: Option<MuxLane>,
    recordings_started: u64,
}

impl<C: CameraSource, M: MicrophoneSource> Drop for Ops<C, M> {
    fn drop(&mut self) {
        // The lane outlives the controller and finalizes on its own.
        if let Some(lane) = self.recording.take() {
            if lane.ticket().begin_finalize() {
                lane.finish(None);
            }
        }
        if let Some(mut run) = self.run.take() {
            let _ = self.camera.stop();
            if run.audio {
                let _ = self.microphone.stop();
            }
            run.shutdown();
        }
    }
}

struct Status {
    capture: CaptureState,
    recording: RecordingState,
    ticket: Option<Arc<RecordingTicket>>,
}

struct Shared<C: CameraSource, M: MicrophoneSource> {
    /// Transition-serialization lock.
    ops: Mutex<Ops<C, M>>,
    /// Current states. Held only for short reads and updates.
    status: Mutex<Status>,
    /// Orders status changes with their delegate notifications.
    notify_order: Mutex<()>,
    overlay: RwLock<Arc<OverlaySource>>,
    pipeline: Arc<Pipeline>,
    config: SessionConfiguration,
    camera_device: CameraDevice,
}

/// Receives the outcome of [`CaptureController::stop_recording`].
pub type CompletionHandler<C, M> =
    Box<dyn FnOnce(&CaptureController<C, M>, Result<RecordingResult, CaptureError>) + Send + 'static>;

/// Owns the capture pipeline and drives the capture and recording state machines.
///
/// ```text
/// Capture:   Idle ─start─► Capturing ─pause─► Paused ─resume─► Capturing ─stop─► Stopped ─► Idle
/// Recording: NotRecording ─start─► Recording ─stop─► Finalizing ─► NotRecording
///                                      └──cancel──► Cancelling ─► NotRecording
/// ```
///
/// Transitions are serialized: concurrent calls observe each other's
/// post-transition state. Rejected transitions return
/// [`CaptureError::InvalidState`] and leave both machines untouched.
///
/// The handle is cheap to clone; all clones drive the same pipeline.
pub struct CaptureController<C: CameraSource, M: MicrophoneSource> {
    shared: Arc<Shared<C, M>>,
}

impl<C: CameraSource, M: MicrophoneSource> Clone for CaptureController<C, M> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<C, M> CaptureController<C, M>
where
    C: CameraSource + 'static,
    M: MicrophoneSource + 'static,
{
    /// Build a controller for `camera`. Fails with `DeviceError` if the camera
    /// cannot capture the configured preset at the configured position.
    pub fn new(mut camera: C, microphone: M, config: SessionConfiguration) -> Result<Self, CaptureError> {
        config.validate().map_err(CaptureError::ConfigurationFailed)?;
        if !camera.supports(config.preset, config.camera_position) {
            return Err(CaptureError::DeviceError(format!(
                "camera does not support preset {} at the {:?} position",
                config.preset.as_str(),
                config.camera_position
            )));
        }
        camera.configure(config.preset, config.camera_position)?;
        let overlay = OverlaySource::initialize(config.overlay_frame_size())?;

        let (faults, fault_inbox) = flume::unbounded();
        let shared = Arc::new(Shared {
            camera_device: camera.device_info(),
            ops: Mutex::new(Ops {
                camera,
                microphone,
                muxer_factory: Arc::new(AviMuxerFactory::new()),
                run: None,
                recording: None,
                recordings_started: 0,
            }),
            status: Mutex::new(Status {
                capture: CaptureState::Idle,
                recording: RecordingState::NotRecording,
                ticket: None,
            }),
            notify_order: Mutex::new(()),
            overlay: RwLock::new(Arc::new(overlay)),
            pipeline: Arc::new(Pipeline::new(&config, faults)),
            config,
        });
        spawn_supervisor(Arc::downgrade(&shared), fault_inbox)?;

        log::info!(
            "capture controller ready: {} ({} preset, {:?})",
            shared.camera_device.name,
            shared.config.preset.as_str(),
            shared.config.camera_position
        );
        Ok(Self { shared })
    }

    /// Build a controller from a preset identifier such as `"high"` or `"1280x720"`.
    pub fn with_preset(camera: C, microphone: M, preset: &str, position: CameraPosition) -> Result<Self, CaptureError> {
        let preset: SessionPreset = preset.parse()?;
        Self::new(camera, microphone, SessionConfiguration::new(preset, position))
    }

    // --- Capture ---

    /// Idle → Capturing. Prepares the overlay's drawing context, opens the
    /// camera (and microphone when audio capture is configured) and starts the
    /// render and display lanes.
    pub fn start_capture(&self) -> Result<(), CaptureError> {
        let mut ops = self.shared.ops.lock();
        let capture = self.capture_state();
        if !capture.is_idle() {
            return Err(CaptureError::invalid_state("start capture", capture));
        }
        let overlay = self.overlay();
        overlay.prepare()?;

        let pipeline = &self.shared.pipeline;
        let generation = pipeline.begin_capture();
        let (renders, requests) = flume::bounded(RENDER_QUEUE_DEPTH);
        let lanes = pipeline
            .spawn_display_lane()
            .and_then(|()| pipeline.spawn_render_lane(overlay, requests));
        let render_lane = match lanes {
            Ok(lane) => lane,
            Err(e) => {
                pipeline.end_capture();
                return Err(e);
            }
        };
        let mut run = CaptureRun {
            generation,
            renders,
            render_lane: Some(render_lane),
            audio: false,
        };

        if let Err(e) = ops.camera.start(pipeline.camera_callback(generation, run.renders.clone())) {
            pipeline.end_capture();
            run.shutdown();
            return Err(e);
        }

        if self.shared.config.capture_audio {
            if ops.microphone.is_available() {
                if let Err(e) = ops.microphone.start(pipeline.microphone_callback()) {
                    let _ = ops.camera.stop();
                    pipeline.end_capture();
                    run.shutdown();
                    return Err(e);
                }
                run.audio = true;
            } else {
                log::warn!("audio capture requested but no microphone is available");
            }
        }

        ops.run = Some(run);
        self.transition(|status| {
            status.capture = CaptureState::Capturing;
            Ok(())
        })?;
        log::info!("capture started (generation {})", generation);
        Ok(())
    }

    /// Capturing or Paused → Idle. An active recording is finalized first; this
    /// call returns once the file is complete.
    pub fn stop_capture(&self) -> Result<(), CaptureError> {
        {
            let mut ops = self.shared.ops.lock();
            let capture = self.capture_state();
            if !capture.is_active() {
                return Err(CaptureError::invalid_state("stop capture", capture));
            }
            self.teardown(&mut ops);
        }
        self.shared.pipeline.await_display();
        log::info!("capture stopped");
        Ok(())
    }

    /// Capturing → Paused. Devices keep running; frames stop reaching the
    /// display and the recording.
    pub fn pause_capture(&self) -> Result<(), CaptureError> {
        {
            let _ops = self.shared.ops.lock();
            let capture = self.capture_state();
            if !capture.is_capturing() {
                return Err(CaptureError::invalid_state("pause capture", capture));
            }
            self.shared.pipeline.set_delivering(false);
            self.transition(|status| {
                status.capture = CaptureState::Paused;
                Ok(())
            })?;
        }
        self.shared.pipeline.await_display();
        Ok(())
    }

    /// Paused → Capturing. The paused interval is dropped from an active recording.
    pub fn resume_capture(&self) -> Result<(), CaptureError> {
        let _ops = self.shared.ops.lock();
        let capture = self.capture_state();
        if !capture.is_paused() {
            return Err(CaptureError::invalid_state("resume capture", capture));
        }
        self.shared.pipeline.mark_recording_gap();
        self.shared.pipeline.set_delivering(true);
        self.transition(|status| {
            status.capture = CaptureState::Capturing;
            Ok(())
        })
    }

    // --- Recording ---

    /// NotRecording → Recording. Requires an active capture. A failure leaves
    /// the capture running and the recording state unchanged.
    pub fn start_recording(&self, target: RecordingTarget) -> Result<(), CaptureError> {
        let mut ops = self.shared.ops.lock();
        {
            let status = self.shared.status.lock();
            if !status.capture.is_active() {
                return Err(CaptureError::invalid_state("start recording", status.capture));
            }
            if status.recording.is_in_flight() {
                return Err(CaptureError::invalid_state("start recording", status.recording));
            }
        }

        let config = &self.shared.config;
        let audio = ops.run.as_ref().is_some_and(|run| run.audio);
        let format = StreamFormat {
            video_size: target.size,
            frame_rate: config.recording_frame_rate,
            audio: audio.then_some(AudioFormat {
                sample_rate: config.audio_sample_rate,
                channels: config.audio_channels,
            }),
        };
        let muxer = ops.muxer_factory.create(&target, &format)?;

        ops.recordings_started += 1;
        let ticket = Arc::new(RecordingTicket::new(ops.recordings_started));
        let (done_tx, done_rx) = flume::bounded(1);
        let lane = MuxLane::spawn(muxer, Arc::clone(&ticket), done_rx, self.exit_handler(ticket.id(), done_tx))?;

        self.shared
            .pipeline
            .attach_recording(RecordingSink::new(ticket.id(), lane.sender(), config.recording_frame_rate));
        ops.recording = Some(lane);
        self.transition(|status| {
            status.recording = RecordingState::Recording;
            status.ticket = Some(ticket);
            Ok(())
        })?;
        log::info!("recording started: {} ({})", target.path.display(), target.size);
        Ok(())
    }

    /// Recording → Finalizing. Frames already delivered are flushed, the file
    /// is finalized on the mux lane, and `handler` is called exactly once
    /// afterwards, never from within this call. By the time it runs the
    /// controller is back to NotRecording. A failed finalization still calls
    /// `handler`, with the error.
    ///
    /// `handler` is not called if the recording is cancelled first.
    pub fn stop_recording<F>(&self, handler: F) -> Result<(), CaptureError>
    where
        F: FnOnce(&CaptureController<C, M>, Result<RecordingResult, CaptureError>) + Send + 'static,
    {
        let ops = self.shared.ops.lock();
        let lane = ops.recording.as_ref();
        self.transition(|status| {
            if !status.recording.is_recording() {
                return Err(CaptureError::invalid_state("stop recording", status.recording));
            }
            match lane {
                Some(lane) if lane.ticket().begin_finalize() => {
                    status.recording = RecordingState::Finalizing;
                    Ok(())
                }
                _ => Err(CaptureError::InvalidState("recording already ended".into())),
            }
        })?;

        if let Some(lane) = lane {
            self.shared.pipeline.detach_recording(lane.ticket().id());
            let controller = self.clone();
            let handler: CompletionHandler<C, M> = Box::new(handler);
            lane.finish(Some(Box::new(move |result| handler(&controller, result))));
        }
        Ok(())
    }

    /// Recording or Finalizing → Cancelling. The output is discarded and no
    /// completion handler fires. Fails with InvalidState if finalization has
    /// already completed.
    pub fn cancel_recording(&self) -> Result<(), CaptureError> {
        let ops = self.shared.ops.lock();
        let lane = ops.recording.as_ref();
        self.transition(|status| {
            if !matches!(status.recording, RecordingState::Recording | RecordingState::Finalizing) {
                return Err(CaptureError::invalid_state("cancel recording", status.recording));
            }
            match lane {
                Some(lane) if lane.ticket().cancel() => {
                    status.recording = RecordingState::Cancelling;
                    Ok(())
                }
                _ => Err(CaptureError::InvalidState("recording already finished".into())),
            }
        })?;

        if let Some(lane) = lane {
            self.shared.pipeline.detach_recording(lane.ticket().id());
            lane.cancel();
            log::info!("recording {} cancelled", lane.ticket().id());
        }
        Ok(())
    }

    /// The most recently composited frame, as a standalone RGBA image.
    ///
    /// Display-only: the image is not added to an active recording.
    pub fn capture_still_image(&self) -> Result<StillImage, CaptureError> {
        let capture = self.capture_state();
        if !capture.is_active() {
            return Err(CaptureError::invalid_state("capture a still image", capture));
        }
        self.shared
            .pipeline
            .last_composited()
            .map(|frame| StillImage::from_frame(&frame))
            .ok_or(CaptureError::NoFrameAvailable)
    }

    // --- Collaborators ---

    /// Replace the compositor. Takes effect from the next synchronized pair.
    pub fn set_compositor(&self, compositor: Arc<dyn Compositor>) {
        self.shared.pipeline.set_compositor(compositor);
    }

    /// Replace the overlay source. Only while Idle.
    pub fn set_overlay(&self, overlay: Arc<OverlaySource>) -> Result<(), CaptureError> {
        let _ops = self.shared.ops.lock();
        let capture = self.capture_state();
        if !capture.is_idle() {
            return Err(CaptureError::invalid_state("replace the overlay", capture));
        }
        *self.shared.overlay.write() = overlay;
        Ok(())
    }

    /// Replace the muxer used for future recordings. Only while NotRecording.
    pub fn set_muxer_factory(&self, factory: Arc<dyn MuxerFactory>) -> Result<(), CaptureError> {
        let mut ops = self.shared.ops.lock();
        let recording = self.recording_state();
        if recording.is_in_flight() {
            return Err(CaptureError::invalid_state("replace the muxer", recording));
        }
        ops.muxer_factory = factory;
        Ok(())
    }

    pub fn set_display_sink(&self, sink: Option<Arc<dyn FrameSink>>) {
        self.shared.pipeline.set_display_sink(sink);
    }

    pub fn set_delegate(&self, delegate: Arc<dyn CaptureDelegate>) {
        self.shared.pipeline.set_delegate(Some(delegate));
    }

    // --- Accessors (never block on a transition) ---

    pub fn capture_state(&self) -> CaptureState {
        self.shared.status.lock().capture
    }

    pub fn recording_state(&self) -> RecordingState {
        self.shared.status.lock().recording
    }

    /// Capturing or paused.
    pub fn is_capturing(&self) -> bool {
        self.capture_state().is_active()
    }

    pub fn is_paused(&self) -> bool {
        self.capture_state().is_paused()
    }

    pub fn is_recording(&self) -> bool {
        self.recording_state().is_recording()
    }

    pub fn configuration(&self) -> &SessionConfiguration {
        &self.shared.config
    }

    pub fn overlay(&self) -> Arc<OverlaySource> {
        Arc::clone(&self.shared.overlay.read())
    }

    pub fn camera_device(&self) -> &CameraDevice {
        &self.shared.camera_device
    }

    pub fn diagnostics(&self) -> PipelineDiagnostics {
        self.shared.pipeline.diagnostics()
    }

    // --- Internal helpers ---

    /// Apply a status change and notify the delegate of whatever changed.
    /// Nothing is mutated when `change` fails.
    fn transition<R>(&self, change: impl FnOnce(&mut Status) -> Result<R, CaptureError>) -> Result<R, CaptureError> {
        let _order = self.shared.notify_order.lock();
        let (before, after, value) = {
            let mut status = self.shared.status.lock();
            let before = (status.capture, status.recording);
            let value = change(&mut status)?;
            (before, (status.capture, status.recording), value)
        };
        if let Some(delegate) = self.shared.pipeline.delegate() {
            if after.0 != before.0 {
                delegate.on_capture_state_changed(after.0);
            }
            if after.1 != before.1 {
                delegate.on_recording_state_changed(after.1);
            }
        }
        Ok(value)
    }

    fn set_capture_state(&self, state: CaptureState) {
        let _ = self.transition(|status| {
            status.capture = state;
            Ok(())
        });
    }

    fn notify(&self, event: impl FnOnce(&dyn CaptureDelegate)) {
        if let Some(delegate) = self.shared.pipeline.delegate() {
            event(delegate.as_ref());
        }
    }

    /// Tear the pipeline down: finalize any recording, stop devices and the
    /// render lane, end in Idle.
    fn teardown(&self, ops: &mut Ops<C, M>) {
        self.set_capture_state(CaptureState::Stopped);
        self.finalize_active_recording(ops);

        let pipeline = &self.shared.pipeline;
        pipeline.end_capture();
        if let Some(mut run) = ops.run.take() {
            if let Err(e) = ops.camera.stop() {
                log::warn!("camera stop failed: {}", e);
            }
            if run.audio {
                if let Err(e) = ops.microphone.stop() {
                    log::warn!("microphone stop failed: {}", e);
                }
            }
            run.shutdown();
        }
        self.set_capture_state(CaptureState::Idle);
    }

    /// Finalize a recording still in progress and wait until its outcome has
    /// settled. Recordings already finalizing or cancelling are only awaited.
    fn finalize_active_recording(&self, ops: &mut Ops<C, M>) {
        let Some(lane) = ops.recording.take() else {
            return;
        };
        let began = self
            .transition(|status| {
                if status.recording.is_recording() && lane.ticket().begin_finalize() {
                    status.recording = RecordingState::Finalizing;
                    return Ok(true);
                }
                Ok(false)
            })
            .unwrap_or(false);

        if began {
            self.shared.pipeline.detach_recording(lane.ticket().id());
            lane.finish(None);
        }
        lane.wait();
    }

    fn exit_handler(&self, ticket_id: u64, done: Sender<()>) -> ExitHandler {
        let shared = Arc::downgrade(&self.shared);
        Box::new(move |exit| {
            if let Some(shared) = shared.upgrade() {
                CaptureController { shared }.settle_recording(ticket_id, exit, done);
            }
        })
    }

    /// Runs on the mux lane once a recording has its outcome.
    fn settle_recording(&self, ticket_id: u64, exit: LaneExit, done: Sender<()>) {
        self.shared.pipeline.detach_recording(ticket_id);
        let _ = self.transition(|status| {
            if status.ticket.as_ref().is_some_and(|ticket| ticket.id() == ticket_id) {
                status.recording = RecordingState::NotRecording;
                status.ticket = None;
            }
            Ok(())
        });
        let _ = done.send(());
        drop(done);

        match exit {
            LaneExit::Finished(Ok(result), handler) => {
                self.notify(|d| d.on_recording_finished(&result));
                if let Some(handler) = handler {
                    handler(Ok(result));
                }
            }
            LaneExit::Finished(Err(e), handler) => {
                log::error!("recording {} failed to finalize: {}", ticket_id, e);
                self.notify(|d| d.on_error(&e));
                if let Some(handler) = handler {
                    handler(Err(e));
                }
            }
            LaneExit::Cancelled => log::info!("recording {} discarded", ticket_id),
            LaneExit::Failed(e) => {
                log::error!("recording {} aborted: {}", ticket_id, e);
                self.notify(|d| d.on_error(&e));
            }
        }
    }

    fn handle_device_loss(&self, generation: u64, reason: String) {
        let error = CaptureError::DeviceError(reason);
        {
            let mut ops = self.shared.ops.lock();
            if ops.run.as_ref().map(|run| run.generation) != Some(generation) {
                log::debug!("ignoring device loss from capture generation {}", generation);
                return;
            }
            log::error!("{}; stopping capture", error);
            self.teardown(&mut ops);
        }
        self.shared.pipeline.await_display();
        self.notify(|d| d.on_error(&error));
    }
}

/// Fault channel consumer. Holds only a weak reference, so it exits once the
/// last controller handle is gone.
fn spawn_supervisor<C, M>(shared: Weak<Shared<C, M>>, faults: Receiver<Fault>) -> Result<(), CaptureError>
where
    C: CameraSource + 'static,
    M: MicrophoneSource + 'static,
{
    thread::Builder::new()
        .name("capture-supervisor".into())
        .spawn(move || {
            for fault in faults.iter() {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                let controller = CaptureController { shared };
                match fault {
                    Fault::DeviceLost { generation, reason } => controller.handle_device_loss(generation, reason),
                    Fault::Report(error) => controller.notify(|d| d.on_error(&error)),
                }
            }
        })
        .map(|_| ())
        .map_err(|e| CaptureError::ConfigurationFailed(format!("failed to spawn capture supervisor: {}", e)))
}

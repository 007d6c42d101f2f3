//! Frame delivery between the capture, render and mux lanes.
//!
//! ```text
//! camera thread ──frame──► FrameSynchronizer ◄──overlay── overlay-render
//!      │                         │
//!      └──RenderMessage──────────┼──► (render lane)
//!                                ▼
//!                  compositor ─► DisplayFrame ──► display ──► display sink
//!                                └► recording sink ──MuxCommand──► recording-mux
//! ```
//!
//! Pairing, compositing and the hand-off to both lanes happen under the
//! synchronizer lock, so composited frames leave the pipeline in slot order.
//! The display sink runs on its own lane with no pipeline lock held, so it may
//! call back into the controller.

use std::cell::Cell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use flume::{Receiver, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};

use super::recording::MuxCommand;
use crate::models::config::SessionConfiguration;
use crate::models::device::PipelineDiagnostics;
use crate::models::error::CaptureError;
use crate::models::frame::VideoFrame;
use crate::overlay::source::OverlaySource;
use crate::processing::alpha_blend::AlphaBlendCompositor;
use crate::processing::frame_sync::{FrameSynchronizer, SyncedPair};
use crate::processing::timeline::RecordingTimeline;
use crate::traits::camera_source::{CameraCallback, CameraEvent};
use crate::traits::capture_delegate::CaptureDelegate;
use crate::traits::compositor::Compositor;
use crate::traits::frame_sink::FrameSink;
use crate::traits::microphone_source::AudioBufferCallback;

/// Render requests that may queue up before camera frames are dropped.
pub(crate) const RENDER_QUEUE_DEPTH: usize = 4;
const DISPLAY_QUEUE_DEPTH: usize = 4;
const MAX_PENDING_SLOTS: usize = 8;

thread_local! {
    static ON_DISPLAY_LANE: Cell<bool> = const { Cell::new(false) };
}

pub(crate) enum RenderMessage {
    Render { slot: u64, time: Duration },
    Shutdown,
}

/// Events the pipeline cannot handle itself; consumed by the supervisor.
pub(crate) enum Fault {
    DeviceLost { generation: u64, reason: String },
    Report(CaptureError),
}

/// A composited frame on its way to the display lane, tagged with the
/// delivery epoch it was composited in.
struct DisplayFrame {
    epoch: u64,
    frame: VideoFrame,
}

/// State shared with the display lane.
struct Display {
    sink: RwLock<Option<Arc<dyn FrameSink>>>,
    /// Bumped whenever delivery stops; frames from an older epoch are dropped.
    epoch: AtomicU64,
    /// Held for the duration of each sink call.
    dispatch: Mutex<()>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl Display {
    fn run(&self, frames: Receiver<DisplayFrame>) {
        ON_DISPLAY_LANE.with(|flag| flag.set(true));
        for DisplayFrame { epoch, frame } in frames.iter() {
            let _dispatch = self.dispatch.lock();
            if epoch != self.epoch.load(Ordering::SeqCst) {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                continue;
            }
            let sink = self.sink.read().clone();
            if let Some(sink) = sink {
                sink.on_frame(&frame);
                self.delivered.fetch_add(1, Ordering::Relaxed);
            }
        }
        log::debug!("display lane stopped");
    }
}

/// The muxer input attached while a recording is active.
pub(crate) struct RecordingSink {
    ticket_id: u64,
    commands: Sender<MuxCommand>,
    timeline: RecordingTimeline,
}

impl RecordingSink {
    pub(crate) fn new(ticket_id: u64, commands: Sender<MuxCommand>, frame_rate: u32) -> Self {
        Self {
            ticket_id,
            commands,
            timeline: RecordingTimeline::new(frame_rate),
        }
    }
}

pub(crate) struct Pipeline {
    use_capture_time: bool,
    record_overlay: bool,
    delivering: AtomicBool,
    generation: AtomicU64,
    next_slot: AtomicU64,
    clock: Mutex<Instant>,
    synchronizer: Mutex<FrameSynchronizer>,
    compositor: RwLock<Arc<dyn Compositor>>,
    display: Arc<Display>,
    display_frames: Mutex<Option<Sender<DisplayFrame>>>,
    delegate: RwLock<Option<Arc<dyn CaptureDelegate>>>,
    recording: Mutex<Option<RecordingSink>>,
    last_composited: Mutex<Option<VideoFrame>>,
    diagnostics: Mutex<PipelineDiagnostics>,
    faults: Sender<Fault>,
}

impl Pipeline {
    pub(crate) fn new(config: &SessionConfiguration, faults: Sender<Fault>) -> Self {
        Self {
            use_capture_time: config.use_capture_time,
            record_overlay: config.record_overlay,
            delivering: AtomicBool::new(false),
            generation: AtomicU64::new(0),
            next_slot: AtomicU64::new(0),
            clock: Mutex::new(Instant::now()),
            synchronizer: Mutex::new(FrameSynchronizer::new(MAX_PENDING_SLOTS)),
            compositor: RwLock::new(Arc::new(AlphaBlendCompositor)),
            display: Arc::new(Display {
                sink: RwLock::new(None),
                epoch: AtomicU64::new(0),
                dispatch: Mutex::new(()),
                delivered: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            display_frames: Mutex::new(None),
            delegate: RwLock::new(None),
            recording: Mutex::new(None),
            last_composited: Mutex::new(None),
            diagnostics: Mutex::new(PipelineDiagnostics::default()),
            faults,
        }
    }

    // --- Lifecycle ---

    /// Reset per-run state and start delivering. Returns the new capture generation.
    pub(crate) fn begin_capture(&self) -> u64 {
        self.synchronizer.lock().reset();
        *self.clock.lock() = Instant::now();
        *self.last_composited.lock() = None;
        self.delivering.store(true, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Stop delivering and close the display lane. The lane exits once its
    /// current sink call returns.
    pub(crate) fn end_capture(&self) {
        self.set_delivering(false);
        *self.display_frames.lock() = None;
        self.synchronizer.lock().reset();
    }

    /// Attach or detach the sinks. After delivery is turned off, no frame
    /// reaches the recording, and no queued frame reaches the display sink,
    /// until it is turned back on. A sink call already running is awaited
    /// separately with [`Pipeline::await_display`].
    pub(crate) fn set_delivering(&self, delivering: bool) {
        self.delivering.store(delivering, Ordering::SeqCst);
        if !delivering {
            self.display.epoch.fetch_add(1, Ordering::SeqCst);
            // Wait out a hand-off that passed the check before the flag flipped.
            drop(self.synchronizer.lock());
        }
    }

    /// Block until no display sink call is running. Returns at once on the
    /// display lane itself. Must not be called with the transition lock held.
    pub(crate) fn await_display(&self) {
        if !ON_DISPLAY_LANE.with(Cell::get) {
            drop(self.display.dispatch.lock());
        }
    }

    pub(crate) fn attach_recording(&self, sink: RecordingSink) {
        *self.recording.lock() = Some(sink);
    }

    /// Detach the recording sink if it still belongs to `ticket_id`.
    pub(crate) fn detach_recording(&self, ticket_id: u64) -> bool {
        let mut recording = self.recording.lock();
        if recording.as_ref().is_some_and(|sink| sink.ticket_id == ticket_id) {
            *recording = None;
            return true;
        }
        false
    }

    /// The next recorded frame follows a pause.
    pub(crate) fn mark_recording_gap(&self) {
        if let Some(sink) = self.recording.lock().as_mut() {
            sink.timeline.mark_gap();
        }
    }

    // --- Collaborators ---

    pub(crate) fn set_compositor(&self, compositor: Arc<dyn Compositor>) {
        *self.compositor.write() = compositor;
    }

    pub(crate) fn set_display_sink(&self, sink: Option<Arc<dyn FrameSink>>) {
        *self.display.sink.write() = sink;
    }

    pub(crate) fn set_delegate(&self, delegate: Option<Arc<dyn CaptureDelegate>>) {
        *self.delegate.write() = delegate;
    }

    pub(crate) fn delegate(&self) -> Option<Arc<dyn CaptureDelegate>> {
        self.delegate.read().clone()
    }

    pub(crate) fn last_composited(&self) -> Option<VideoFrame> {
        self.last_composited.lock().clone()
    }

    pub(crate) fn diagnostics(&self) -> PipelineDiagnostics {
        let mut diagnostics = self.diagnostics.lock().clone();
        diagnostics.displayed_frames = self.display.delivered.load(Ordering::Relaxed);
        diagnostics.display_frames_dropped = self.display.dropped.load(Ordering::Relaxed);
        diagnostics
    }

    // --- Lanes ---

    /// Callback handed to the camera for one capture run.
    pub(crate) fn camera_callback(self: &Arc<Self>, generation: u64, renders: Sender<RenderMessage>) -> CameraCallback {
        let pipeline = Arc::clone(self);
        Arc::new(move |event: CameraEvent| match event {
            CameraEvent::Frame(frame) => pipeline.on_camera_frame(frame, &renders),
            CameraEvent::DeviceLost(reason) => {
                log::error!("camera lost: {}", reason);
                let _ = pipeline.faults.send(Fault::DeviceLost { generation, reason });
            }
        })
    }

    pub(crate) fn microphone_callback(self: &Arc<Self>) -> AudioBufferCallback {
        let pipeline = Arc::clone(self);
        Arc::new(move |samples: &[f32], sample_rate: f64, channels: u16| {
            pipeline.on_audio(samples, sample_rate, channels)
        })
    }

    pub(crate) fn spawn_render_lane(
        self: &Arc<Self>,
        overlay: Arc<OverlaySource>,
        requests: Receiver<RenderMessage>,
    ) -> Result<JoinHandle<()>, CaptureError> {
        let pipeline = Arc::clone(self);
        thread::Builder::new()
            .name("overlay-render".into())
            .spawn(move || {
                for message in requests.iter() {
                    match message {
                        RenderMessage::Render { slot, time } => pipeline.render_slot(&overlay, slot, time),
                        RenderMessage::Shutdown => break,
                    }
                }
                log::debug!("render lane stopped");
            })
            .map_err(|e| CaptureError::AllocationFailed(format!("failed to spawn render lane: {}", e)))
    }

    /// Start the display lane for one capture run. It holds no reference to
    /// the pipeline and ends when [`Pipeline::end_capture`] drops its sender.
    pub(crate) fn spawn_display_lane(&self) -> Result<(), CaptureError> {
        let (frames_tx, frames) = flume::bounded(DISPLAY_QUEUE_DEPTH);
        let display = Arc::clone(&self.display);
        thread::Builder::new()
            .name("display".into())
            .spawn(move || display.run(frames))
            .map_err(|e| CaptureError::AllocationFailed(format!("failed to spawn display lane: {}", e)))?;
        *self.display_frames.lock() = Some(frames_tx);
        Ok(())
    }

    fn on_camera_frame(&self, frame: VideoFrame, renders: &Sender<RenderMessage>) {
        self.diagnostics.lock().camera_frames += 1;
        if !self.delivering.load(Ordering::SeqCst) {
            self.diagnostics.lock().frames_dropped_paused += 1;
            return;
        }

        let time = if self.use_capture_time {
            frame.time()
        } else {
            self.clock.lock().elapsed()
        };
        let slot = self.next_slot.fetch_add(1, Ordering::SeqCst);

        match renders.try_send(RenderMessage::Render { slot, time }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.diagnostics.lock().render_requests_dropped += 1;
                log::trace!("render lane busy, dropping slot {}", slot);
                return;
            }
            Err(TrySendError::Disconnected(_)) => return,
        }

        let frame = frame.retimed(time);
        self.pair(|sync| sync.push_camera(slot, frame));
    }

    fn render_slot(&self, overlay: &OverlaySource, slot: u64, time: Duration) {
        match overlay.request_frame(time) {
            Ok(changed) => {
                if changed {
                    self.diagnostics.lock().overlay_renders += 1;
                }
                let frame = overlay.published_frame();
                self.pair(|sync| sync.push_overlay(slot, frame));
            }
            Err(e) => {
                self.diagnostics.lock().render_failures += 1;
                self.synchronizer.lock().abandon(slot);
                log::warn!("overlay render failed for slot {}: {}", slot, e);
                let _ = self.faults.send(Fault::Report(e));
            }
        }
    }

    fn on_audio(&self, samples: &[f32], sample_rate: f64, channels: u16) {
        if !self.delivering.load(Ordering::SeqCst) {
            return;
        }
        let recording = self.recording.lock();
        let Some(sink) = recording.as_ref() else {
            return;
        };
        let command = MuxCommand::Audio {
            samples: samples.to_vec(),
            sample_rate,
            channels,
        };
        if sink.commands.send(command).is_ok() {
            self.diagnostics.lock().recorded_audio_buffers += 1;
        }
    }

    /// Push one input into the synchronizer; composite and dispatch a completed pair.
    fn pair(&self, push: impl FnOnce(&mut FrameSynchronizer) -> Option<SyncedPair>) {
        let mut sync = self.synchronizer.lock();
        // Read before the delivery check: a pause that flips the flag after
        // this point also bumps the epoch, so the frame cannot outlive it.
        let epoch = self.display.epoch.load(Ordering::SeqCst);
        let released = push(&mut sync);
        let unmatched = sync.unmatched();

        let Some(pair) = released else {
            self.diagnostics.lock().unmatched_frames = unmatched;
            return;
        };
        if !self.delivering.load(Ordering::SeqCst) {
            let mut diagnostics = self.diagnostics.lock();
            diagnostics.frames_dropped_paused += 1;
            diagnostics.unmatched_frames = unmatched;
            return;
        }

        let compositor = Arc::clone(&*self.compositor.read());
        let composited = VideoFrame::new(
            compositor.composite(pair.camera.buffer(), pair.overlay.buffer()),
            pair.camera.time(),
        );
        *self.last_composited.lock() = Some(composited.clone());

        let recorded = if self.record_overlay { &composited } else { &pair.camera };
        self.record(recorded);
        self.show(epoch, composited);

        let mut diagnostics = self.diagnostics.lock();
        diagnostics.composited_frames += 1;
        diagnostics.unmatched_frames = unmatched;
        drop(diagnostics);
        drop(sync);
    }

    fn show(&self, epoch: u64, frame: VideoFrame) {
        let frames = self.display_frames.lock();
        let Some(frames) = frames.as_ref() else {
            return;
        };
        if let Err(TrySendError::Full(_)) = frames.try_send(DisplayFrame { epoch, frame }) {
            self.display.dropped.fetch_add(1, Ordering::Relaxed);
            log::trace!("display lane busy, dropping frame");
        }
    }

    fn record(&self, frame: &VideoFrame) {
        let mut recording = self.recording.lock();
        let Some(sink) = recording.as_mut() else {
            return;
        };
        let Some(time) = sink.timeline.map(frame.time()) else {
            log::trace!("frame at {:?} does not advance the recording, skipped", frame.time());
            return;
        };
        if sink.commands.send(MuxCommand::Video(frame.retimed(time))).is_ok() {
            self.diagnostics.lock().recorded_video_frames += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::frame::{FrameSize, PixelBuffer, PixelFormat};
    use crate::overlay::context::Color;

    fn wait_until(mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !condition() {
            assert!(Instant::now() < deadline, "timed out waiting for the pipeline");
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn camera_frame(fill: u8, ms: u64) -> VideoFrame {
        let buffer = PixelBuffer::from_data(FrameSize::new(2, 2), PixelFormat::Bgra, vec![fill; 16]).unwrap();
        VideoFrame::new(buffer, Duration::from_millis(ms))
    }

    struct Harness {
        pipeline: Arc<Pipeline>,
        callback: CameraCallback,
        renders: Sender<RenderMessage>,
        render_lane: Option<JoinHandle<()>>,
        faults: Receiver<Fault>,
    }

    impl Harness {
        fn new(config: SessionConfiguration, overlay: OverlaySource) -> Self {
            let (fault_tx, faults) = flume::unbounded();
            let pipeline = Arc::new(Pipeline::new(&config, fault_tx));
            let generation = pipeline.begin_capture();
            pipeline.spawn_display_lane().unwrap();
            let (renders, requests) = flume::bounded(RENDER_QUEUE_DEPTH);
            let render_lane = pipeline.spawn_render_lane(Arc::new(overlay), requests).unwrap();
            let callback = pipeline.camera_callback(generation, renders.clone());
            Self {
                pipeline,
                callback,
                renders,
                render_lane: Some(render_lane),
                faults,
            }
        }

        fn emit(&self, fill: u8, ms: u64) {
            (self.callback)(CameraEvent::Frame(camera_frame(fill, ms)));
        }

        fn composited(&self) -> u64 {
            self.pipeline.diagnostics().composited_frames
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.pipeline.end_capture();
            let _ = self.renders.send(RenderMessage::Shutdown);
            if let Some(lane) = self.render_lane.take() {
                let _ = lane.join();
            }
        }
    }

    fn white_overlay() -> OverlaySource {
        let overlay = OverlaySource::initialize(FrameSize::new(2, 2)).unwrap();
        overlay.set_update_callback(|ctx, _, _| {
            ctx.clear(Color::WHITE);
            Ok(true)
        });
        overlay
    }

    #[test]
    fn composites_camera_with_overlay() {
        let harness = Harness::new(SessionConfiguration::default(), white_overlay());
        harness.emit(10, 0);
        wait_until(|| harness.composited() == 1);

        let frame = harness.pipeline.last_composited().unwrap();
        // Opaque white overlay covers the color; camera alpha is kept.
        assert!(frame.buffer().data().chunks_exact(4).all(|px| px == [255, 255, 255, 10]));
        assert_eq!(frame.time(), Duration::ZERO);
    }

    #[test]
    fn frames_are_dropped_while_not_delivering() {
        let harness = Harness::new(SessionConfiguration::default(), white_overlay());
        harness.pipeline.set_delivering(false);
        harness.emit(10, 0);
        harness.emit(10, 33);

        let diagnostics = harness.pipeline.diagnostics();
        assert_eq!(diagnostics.camera_frames, 2);
        assert_eq!(diagnostics.frames_dropped_paused, 2);
        assert!(harness.pipeline.last_composited().is_none());
    }

    #[test]
    fn render_failure_is_reported_and_slot_dropped() {
        let overlay = OverlaySource::initialize(FrameSize::new(2, 2)).unwrap();
        overlay.set_update_callback(|_, _, _| Err("no font".into()));
        let harness = Harness::new(SessionConfiguration::default(), overlay);
        harness.emit(10, 0);

        match harness.faults.recv_timeout(Duration::from_secs(5)).unwrap() {
            Fault::Report(CaptureError::RenderFailed(msg)) => assert_eq!(msg, "no font"),
            _ => panic!("expected a render fault"),
        }
        assert_eq!(harness.pipeline.diagnostics().render_failures, 1);
        assert_eq!(harness.composited(), 0);
    }

    #[test]
    fn records_raw_camera_when_overlay_recording_is_off() {
        let config = SessionConfiguration {
            record_overlay: false,
            ..Default::default()
        };
        let harness = Harness::new(config, white_overlay());
        let (commands, inbox) = flume::unbounded();
        harness.pipeline.attach_recording(RecordingSink::new(1, commands, 30));

        harness.emit(10, 1000);
        wait_until(|| harness.composited() == 1);
        harness.emit(20, 1100);
        wait_until(|| harness.composited() == 2);

        let times: Vec<(u8, Duration)> = inbox
            .try_iter()
            .map(|command| match command {
                MuxCommand::Video(frame) => (frame.buffer().data()[0], frame.time()),
                _ => panic!("unexpected command"),
            })
            .collect();
        // Raw camera pixels on the recording timeline.
        assert_eq!(times, vec![(10, Duration::ZERO), (20, Duration::from_millis(100))]);

        assert!(harness.pipeline.detach_recording(1));
        assert!(!harness.pipeline.detach_recording(1));
    }

    #[test]
    fn pipeline_clock_replaces_device_timestamps() {
        let config = SessionConfiguration {
            use_capture_time: false,
            ..Default::default()
        };
        let harness = Harness::new(config, white_overlay());
        let (commands, inbox) = flume::unbounded();
        harness.pipeline.attach_recording(RecordingSink::new(1, commands, 30));

        // Device timestamps jump ahead and then run backwards.
        for (i, device_ms) in [9000u64, 10, 20].into_iter().enumerate() {
            harness.emit(i as u8, device_ms);
            wait_until(|| harness.composited() == i as u64 + 1);
            thread::sleep(Duration::from_millis(50));
        }

        let times: Vec<Duration> = inbox
            .try_iter()
            .map(|command| match command {
                MuxCommand::Video(frame) => frame.time(),
                _ => panic!("unexpected command"),
            })
            .collect();
        assert_eq!(times.len(), 3);
        assert_eq!(times[0], Duration::ZERO);
        assert!(times[1] >= Duration::from_millis(40));
        assert!(times[2] >= times[1] + Duration::from_millis(40));
        assert!(harness.pipeline.last_composited().unwrap().time() < Duration::from_secs(9));
    }

    #[derive(Default)]
    struct Collect {
        times: Mutex<Vec<Duration>>,
    }

    impl FrameSink for Collect {
        fn on_frame(&self, frame: &VideoFrame) {
            self.times.lock().push(frame.time());
        }
    }

    #[test]
    fn display_sink_receives_frames_in_order() {
        let harness = Harness::new(SessionConfiguration::default(), white_overlay());
        let sink = Arc::new(Collect::default());
        harness.pipeline.set_display_sink(Some(sink.clone()));

        for i in 0..3u64 {
            harness.emit(10, i * 33);
            wait_until(|| harness.composited() == i + 1);
        }
        wait_until(|| harness.pipeline.diagnostics().displayed_frames == 3);
        let expected: Vec<Duration> = [0, 33, 66].into_iter().map(Duration::from_millis).collect();
        assert_eq!(*sink.times.lock(), expected);
    }

    /// Turns delivery off from inside the sink, as a controller pause would.
    struct Pausing {
        pipeline: Mutex<Option<Arc<Pipeline>>>,
        done: Sender<()>,
    }

    impl FrameSink for Pausing {
        fn on_frame(&self, _: &VideoFrame) {
            let Some(pipeline) = self.pipeline.lock().take() else {
                return;
            };
            pipeline.set_delivering(false);
            pipeline.await_display();
            let _ = self.done.send(());
        }
    }

    #[test]
    fn display_sink_can_stop_delivery() {
        let harness = Harness::new(SessionConfiguration::default(), white_overlay());
        let (done, finished) = flume::bounded(1);
        harness.pipeline.set_display_sink(Some(Arc::new(Pausing {
            pipeline: Mutex::new(Some(Arc::clone(&harness.pipeline))),
            done,
        })));

        harness.emit(10, 0);
        finished.recv_timeout(Duration::from_secs(5)).unwrap();

        // The sink returned; a waiter on another thread is not blocked either.
        harness.pipeline.await_display();
        harness.emit(10, 33);
        let diagnostics = harness.pipeline.diagnostics();
        assert_eq!(diagnostics.composited_frames, 1);
        assert_eq!(diagnostics.frames_dropped_paused, 1);
    }

    #[test]
    fn device_loss_is_forwarded_with_generation() {
        let harness = Harness::new(SessionConfiguration::default(), white_overlay());
        (harness.callback)(CameraEvent::DeviceLost("unplugged".into()));
        match harness.faults.try_recv().unwrap() {
            Fault::DeviceLost { generation, reason } => {
                assert_eq!(generation, 1);
                assert_eq!(reason, "unplugged");
            }
            _ => panic!("expected device loss"),
        }
    }
}

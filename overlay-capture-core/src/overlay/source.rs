use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::context::DrawContext;
use crate::models::error::CaptureError;
use crate::models::frame::{FrameSize, PixelBuffer, PixelFormat, VideoFrame};

/// Draws overlay content into a retained [`DrawContext`].
pub trait OverlayRenderer: Send {
    /// One-time setup against a freshly created context (fonts, fixed layers).
    fn setup(&mut self, _context: &mut DrawContext, _size: FrameSize) {}

    /// Draw the frame for `time`. Returns whether the canvas changed.
    fn update(&mut self, context: &mut DrawContext, size: FrameSize, time: Duration) -> Result<bool, String>;
}

/// Closure form of [`OverlayRenderer::update`].
pub type UpdateCallback = Box<dyn FnMut(&mut DrawContext, FrameSize, Duration) -> Result<bool, String> + Send>;

/// Closure form of [`OverlayRenderer::setup`].
pub type ContextInitializer = Box<dyn FnOnce(&mut DrawContext, FrameSize) + Send>;

struct CallbackRenderer(UpdateCallback);

impl OverlayRenderer for CallbackRenderer {
    fn update(&mut self, context: &mut DrawContext, size: FrameSize, time: Duration) -> Result<bool, String> {
        (self.0)(context, size, time)
    }
}

/// Everything behind the render gate.
struct RenderState {
    context: Option<DrawContext>,
    initializer: Option<ContextInitializer>,
    renderer: Option<Box<dyn OverlayRenderer>>,
    renderer_ready: bool,
    published: Arc<PixelBuffer>,
    published_time: Duration,
    renders: u64,
}

/// Produces overlay frames on demand by running a renderer against a retained canvas.
///
/// A single gate serializes rendering, publishing and reading: a reader never
/// observes a canvas mid-render, and the published buffer is swapped only
/// after a complete copy of the canvas exists. A failed render leaves the
/// previously published buffer in place.
pub struct OverlaySource {
    size: FrameSize,
    gate: Mutex<RenderState>,
}

impl OverlaySource {
    /// Create a source of the given size. The published buffer starts out
    /// blank; the drawing context is created on first use.
    pub fn initialize(size: FrameSize) -> Result<Self, CaptureError> {
        let blank = PixelBuffer::allocate(size, PixelFormat::Rgba)?;
        Ok(Self {
            size,
            gate: Mutex::new(RenderState {
                context: None,
                initializer: None,
                renderer: None,
                renderer_ready: false,
                published: Arc::new(blank),
                published_time: Duration::ZERO,
                renders: 0,
            }),
        })
    }

    /// Like [`OverlaySource::initialize`], running `setup` once against the new context.
    pub fn initialize_with<F>(size: FrameSize, setup: F) -> Result<Self, CaptureError>
    where
        F: FnOnce(&mut DrawContext, FrameSize) + Send + 'static,
    {
        let source = Self::initialize(size)?;
        source.gate.lock().initializer = Some(Box::new(setup));
        Ok(source)
    }

    /// Create a source driven by an [`OverlayRenderer`].
    pub fn with_renderer<R>(size: FrameSize, renderer: R) -> Result<Self, CaptureError>
    where
        R: OverlayRenderer + 'static,
    {
        let source = Self::initialize(size)?;
        source.gate.lock().renderer = Some(Box::new(renderer));
        Ok(source)
    }

    /// Install the per-frame drawing callback, replacing any previous renderer.
    pub fn set_update_callback<F>(&self, callback: F)
    where
        F: FnMut(&mut DrawContext, FrameSize, Duration) -> Result<bool, String> + Send + 'static,
    {
        let mut state = self.gate.lock();
        state.renderer = Some(Box::new(CallbackRenderer(Box::new(callback))));
        state.renderer_ready = false;
    }

    pub fn output_size(&self) -> FrameSize {
        self.size
    }

    /// Create the drawing context now instead of on the first frame request.
    pub fn prepare(&self) -> Result<(), CaptureError> {
        let mut state = self.gate.lock();
        Self::ensure_context(&mut state, self.size)?;
        Ok(())
    }

    pub fn is_prepared(&self) -> bool {
        self.gate.lock().context.is_some()
    }

    /// Render the frame for `time` and publish it.
    ///
    /// Returns whether the content changed. When it did not, the previous
    /// buffer is republished with the new time. Renderer failures are returned
    /// as [`CaptureError::RenderFailed`] and leave the published buffer intact.
    pub fn request_frame(&self, time: Duration) -> Result<bool, CaptureError> {
        let mut guard = self.gate.lock();
        Self::ensure_context(&mut guard, self.size)?;

        let state = &mut *guard;
        let (Some(context), Some(renderer)) = (state.context.as_mut(), state.renderer.as_mut()) else {
            state.published_time = time;
            return Ok(false);
        };

        if !state.renderer_ready {
            renderer.setup(context, self.size);
            state.renderer_ready = true;
        }

        let changed = renderer
            .update(context, self.size, time)
            .map_err(CaptureError::RenderFailed)?;

        if changed {
            let snapshot = context.snapshot()?;
            state.published = Arc::new(snapshot);
            state.renders += 1;
        }
        state.published_time = time;
        Ok(changed)
    }

    /// The most recently published frame.
    pub fn published_frame(&self) -> VideoFrame {
        let state = self.gate.lock();
        VideoFrame::from_shared(Arc::clone(&state.published), state.published_time)
    }

    /// Read the published buffer while holding the render gate.
    pub fn with_published<R>(&self, read: impl FnOnce(&PixelBuffer, Duration) -> R) -> R {
        let state = self.gate.lock();
        read(&state.published, state.published_time)
    }

    /// Number of renders that produced a new buffer.
    pub fn render_count(&self) -> u64 {
        self.gate.lock().renders
    }

    fn ensure_context(state: &mut RenderState, size: FrameSize) -> Result<(), CaptureError> {
        if state.context.is_some() {
            return Ok(());
        }
        let mut context = DrawContext::allocate(size)?;
        if let Some(init) = state.initializer.take() {
            init(&mut context, size);
        }
        log::debug!("overlay context created at {}", size);
        state.context = Some(context);
        Ok(())
    }
}

impl std::fmt::Debug for OverlaySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlaySource").field("size", &self.size).finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::thread;

    use super::*;
    use crate::overlay::context::{Color, Rect};

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn rejects_unallocatable_size() {
        assert!(matches!(
            OverlaySource::initialize(FrameSize::new(0, 0)),
            Err(CaptureError::AllocationFailed(_))
        ));
    }

    #[test]
    fn output_size_is_stable() {
        let source = OverlaySource::initialize(FrameSize::new(8, 4)).unwrap();
        source.set_update_callback(|ctx, _, _| {
            ctx.clear(Color::WHITE);
            Ok(true)
        });
        let before = source.output_size();
        for i in 0..5 {
            source.request_frame(ms(i)).unwrap();
        }
        assert_eq!(source.output_size(), before);
        assert_eq!(before, FrameSize::new(8, 4));
    }

    #[test]
    fn context_is_created_lazily_and_initialized_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let source = OverlaySource::initialize_with(FrameSize::new(2, 2), move |ctx, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            ctx.clear(Color::BLACK);
        })
        .unwrap();
        assert!(!source.is_prepared());

        source.set_update_callback(|_, _, _| Ok(true));
        source.request_frame(ms(0)).unwrap();
        source.request_frame(ms(33)).unwrap();

        assert!(source.is_prepared());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        // The initializer's background made it into the published frame.
        assert_eq!(source.published_frame().buffer().data()[3], 255);
    }

    #[test]
    fn marks_persist_between_frames() {
        let source = OverlaySource::initialize(FrameSize::new(2, 1)).unwrap();
        source.set_update_callback(|ctx, _, time| {
            let x = if time.is_zero() { 0 } else { 1 };
            ctx.fill_rect(Rect::new(x, 0, 1, 1), Color::WHITE);
            Ok(true)
        });
        source.request_frame(ms(0)).unwrap();
        source.request_frame(ms(40)).unwrap();
        assert_eq!(source.published_frame().buffer().data(), &[255; 8]);
    }

    #[test]
    fn unchanged_content_republishes_previous_buffer() {
        let source = OverlaySource::initialize(FrameSize::new(1, 1)).unwrap();
        let first = Arc::new(AtomicBool::new(true));
        let flag = Arc::clone(&first);
        source.set_update_callback(move |ctx, _, _| {
            if flag.swap(false, Ordering::SeqCst) {
                ctx.clear(Color::WHITE);
                return Ok(true);
            }
            ctx.clear(Color::BLACK);
            Ok(false)
        });

        assert!(source.request_frame(ms(0)).unwrap());
        let a = source.published_frame();
        assert!(!source.request_frame(ms(40)).unwrap());
        let b = source.published_frame();

        assert!(Arc::ptr_eq(&a.shared_buffer(), &b.shared_buffer()));
        assert_eq!(b.time(), ms(40));
        assert_eq!(source.render_count(), 1);
    }

    #[test]
    fn no_renderer_publishes_blank() {
        let source = OverlaySource::initialize(FrameSize::new(1, 1)).unwrap();
        assert!(!source.request_frame(ms(10)).unwrap());
        let frame = source.published_frame();
        assert!(!frame.buffer().has_data());
        assert_eq!(frame.time(), ms(10));
    }

    #[test]
    fn failed_render_keeps_initial_buffer_then_recovers() {
        let source = OverlaySource::initialize(FrameSize::new(2, 2)).unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        source.set_update_callback(move |ctx, _, _| {
            ctx.clear(Color::WHITE);
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err("font missing".into());
            }
            Ok(true)
        });

        let err = source.request_frame(ms(0)).unwrap_err();
        assert_eq!(err, CaptureError::RenderFailed("font missing".into()));
        source.with_published(|buf, _| {
            assert!(!buf.has_data());
            assert!(buf.data().iter().all(|&b| b == 0));
        });

        assert!(source.request_frame(ms(40)).unwrap());
        source.with_published(|buf, time| {
            assert!(buf.has_data());
            assert!(buf.data().iter().all(|&b| b == 255));
            assert_eq!(time, ms(40));
        });
    }

    #[test]
    fn failed_render_keeps_previous_buffer() {
        let source = OverlaySource::initialize(FrameSize::new(1, 1)).unwrap();
        let attempts = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&attempts);
        source.set_update_callback(move |ctx, _, _| {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                ctx.clear(Color::WHITE);
                return Ok(true);
            }
            ctx.clear(Color::BLACK);
            Err("boom".into())
        });

        source.request_frame(ms(0)).unwrap();
        assert!(source.request_frame(ms(40)).is_err());
        let frame = source.published_frame();
        assert_eq!(frame.buffer().data(), &[255, 255, 255, 255]);
        assert_eq!(frame.time(), ms(0));
    }

    struct CountingRenderer {
        setups: Arc<AtomicU32>,
    }

    impl OverlayRenderer for CountingRenderer {
        fn setup(&mut self, context: &mut DrawContext, _size: FrameSize) {
            self.setups.fetch_add(1, Ordering::SeqCst);
            context.clear(Color::rgba(0, 0, 255, 255));
        }

        fn update(&mut self, context: &mut DrawContext, _size: FrameSize, _time: Duration) -> Result<bool, String> {
            context.set_pixel(0, 0, Color::WHITE);
            Ok(true)
        }
    }

    #[test]
    fn renderer_setup_runs_once() {
        let setups = Arc::new(AtomicU32::new(0));
        let source = OverlaySource::with_renderer(
            FrameSize::new(2, 1),
            CountingRenderer {
                setups: Arc::clone(&setups),
            },
        )
        .unwrap();

        for i in 0..3 {
            source.request_frame(ms(i * 33)).unwrap();
        }
        assert_eq!(setups.load(Ordering::SeqCst), 1);
        assert_eq!(source.published_frame().buffer().data(), &[255, 255, 255, 255, 0, 0, 255, 255]);
    }

    #[test]
    fn readers_never_observe_partial_renders() {
        let source = Arc::new(OverlaySource::initialize(FrameSize::new(64, 64)).unwrap());
        source.set_update_callback(|ctx, _, time| {
            // Fill byte-by-byte so a torn read would mix two values.
            let value = (time.as_millis() % 251) as u8;
            for b in ctx.pixels_mut() {
                *b = value;
            }
            Ok(true)
        });

        let done = Arc::new(AtomicBool::new(false));
        let readers: Vec<_> = (0..4)
            .map(|i| {
                let source = Arc::clone(&source);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut reads = 0u32;
                    while !done.load(Ordering::SeqCst) {
                        let consistent = if i % 2 == 0 {
                            let frame = source.published_frame();
                            let data = frame.buffer().data();
                            data.iter().all(|&b| b == data[0])
                        } else {
                            source.with_published(|buf, _| buf.data().iter().all(|&b| b == buf.data()[0]))
                        };
                        assert!(consistent, "observed a torn overlay buffer");
                        reads += 1;
                    }
                    reads
                })
            })
            .collect();

        let writers: Vec<_> = (0..2)
            .map(|w| {
                let source = Arc::clone(&source);
                thread::spawn(move || {
                    for i in 0..300u64 {
                        source.request_frame(Duration::from_millis(i * 2 + w)).unwrap();
                    }
                })
            })
            .collect();

        for writer in writers {
            writer.join().unwrap();
        }
        done.store(true, Ordering::SeqCst);
        for reader in readers {
            assert!(reader.join().unwrap() > 0);
        }
        assert_eq!(source.render_count(), 600);
    }
}

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use flume::{Receiver, Sender};

use crate::models::error::CaptureError;
use crate::models::frame::VideoFrame;
use crate::models::recording::RecordingResult;
use crate::traits::muxer::Muxer;

/// Delivered exactly once with the outcome of a finalization.
pub(crate) type FinishCallback = Box<dyn FnOnce(Result<RecordingResult, CaptureError>) + Send>;

/// Called on the mux lane when it stops serving a recording.
pub(crate) type ExitHandler = Box<dyn FnOnce(LaneExit) + Send>;

pub(crate) enum MuxCommand {
    /// A frame already placed on the recording timeline.
    Video(VideoFrame),
    Audio {
        samples: Vec<f32>,
        sample_rate: f64,
        channels: u16,
    },
    Finish(Option<FinishCallback>),
    Cancel,
}

/// How a recording ended, as seen by the mux lane.
pub(crate) enum LaneExit {
    Finished(Result<RecordingResult, CaptureError>, Option<FinishCallback>),
    Cancelled,
    Failed(CaptureError),
}

const RECORDING: u8 = 0;
const FINALIZING: u8 = 1;
const COMPLETED: u8 = 2;
const CANCELLED: u8 = 3;
const FAILED: u8 = 4;

/// The outcome cell of one recording.
///
/// Every terminal transition is a compare-and-swap, so exactly one of
/// completion, cancellation or failure is ever decided for a recording.
#[derive(Debug)]
pub(crate) struct RecordingTicket {
    id: u64,
    outcome: AtomicU8,
}

impl RecordingTicket {
    pub(crate) fn new(id: u64) -> Self {
        Self {
            id,
            outcome: AtomicU8::new(RECORDING),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }

    /// Recording → Finalizing.
    pub(crate) fn begin_finalize(&self) -> bool {
        self.transition(RECORDING, FINALIZING)
    }

    /// Recording or Finalizing → Cancelled.
    pub(crate) fn cancel(&self) -> bool {
        self.transition(RECORDING, CANCELLED) || self.transition(FINALIZING, CANCELLED)
    }

    /// Finalizing → Completed. Fails if a cancel won the race.
    pub(crate) fn complete(&self) -> bool {
        self.transition(FINALIZING, COMPLETED)
    }

    /// Recording → Failed.
    pub(crate) fn fail(&self) -> bool {
        self.transition(RECORDING, FAILED)
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.outcome.load(Ordering::SeqCst) == CANCELLED
    }

    fn transition(&self, from: u8, to: u8) -> bool {
        self.outcome
            .compare_exchange(from, to, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}

/// Handle to the `recording-mux` thread serving one recording.
pub(crate) struct MuxLane {
    ticket: Arc<RecordingTicket>,
    commands: Sender<MuxCommand>,
    done: Receiver<()>,
    // Never joined: completion handlers run on this thread and may call back
    // into the controller.
    _thread: JoinHandle<()>,
}

impl MuxLane {
    /// Spawn the lane. `on_exit` runs on the lane thread once the recording
    /// has reached its outcome; `done` is the receiving side of a signal that
    /// handler sends (or drops) once controller state has settled.
    pub(crate) fn spawn(
        muxer: Box<dyn Muxer>,
        ticket: Arc<RecordingTicket>,
        done: Receiver<()>,
        on_exit: ExitHandler,
    ) -> Result<Self, CaptureError> {
        let (commands, inbox) = flume::unbounded();
        let lane_ticket = Arc::clone(&ticket);
        let thread = thread::Builder::new()
            .name("recording-mux".into())
            .spawn(move || {
                let exit = run(muxer, &lane_ticket, inbox);
                on_exit(exit);
            })
            .map_err(|e| CaptureError::MuxError(format!("failed to spawn mux lane: {}", e)))?;

        Ok(Self {
            ticket,
            commands,
            done,
            _thread: thread,
        })
    }

    pub(crate) fn ticket(&self) -> &Arc<RecordingTicket> {
        &self.ticket
    }

    pub(crate) fn sender(&self) -> Sender<MuxCommand> {
        self.commands.clone()
    }

    /// Queue finalization behind any frames already sent.
    pub(crate) fn finish(&self, callback: Option<FinishCallback>) {
        if let Err(flume::SendError(MuxCommand::Finish(Some(callback)))) =
            self.commands.send(MuxCommand::Finish(callback))
        {
            // The lane is gone. A cancelled recording never reports; anything else
            // still owes its caller an outcome.
            if !self.ticket.is_cancelled() {
                callback(Err(CaptureError::MuxError("recording lane exited before finalization".into())));
            }
        }
    }

    pub(crate) fn cancel(&self) {
        let _ = self.commands.send(MuxCommand::Cancel);
    }

    /// Block until the lane has settled controller state for this recording.
    pub(crate) fn wait(&self) {
        let _ = self.done.recv();
    }
}

fn run(mut muxer: Box<dyn Muxer>, ticket: &RecordingTicket, inbox: Receiver<MuxCommand>) -> LaneExit {
    let mut failure: Option<CaptureError> = None;

    for command in inbox.iter() {
        if ticket.is_cancelled() {
            muxer.cancel();
            return LaneExit::Cancelled;
        }

        let appended = match command {
            MuxCommand::Video(frame) if failure.is_none() => muxer.append_video(&frame),
            MuxCommand::Audio {
                samples,
                sample_rate,
                channels,
            } if failure.is_none() => muxer.append_audio(&samples, sample_rate, channels),
            MuxCommand::Video(_) | MuxCommand::Audio { .. } => Ok(()),
            MuxCommand::Finish(callback) => return finish(muxer, ticket, failure, callback),
            MuxCommand::Cancel => {
                muxer.cancel();
                return LaneExit::Cancelled;
            }
        };

        if let Err(e) = appended {
            log::error!("recording {} write failed: {}", ticket.id(), e);
            if ticket.fail() {
                muxer.cancel();
                return LaneExit::Failed(e);
            }
            // A stop or cancel is already on its way; hold the error for it.
            failure = Some(e);
        }
    }

    // Every sender is gone without a finish or cancel.
    muxer.cancel();
    LaneExit::Cancelled
}

fn finish(
    mut muxer: Box<dyn Muxer>,
    ticket: &RecordingTicket,
    failure: Option<CaptureError>,
    callback: Option<FinishCallback>,
) -> LaneExit {
    let result = match failure {
        Some(e) => {
            muxer.cancel();
            Err(e)
        }
        None => muxer.finish(),
    };

    if ticket.complete() {
        return LaneExit::Finished(result, callback);
    }

    // Cancelled while finalizing: discard whatever was produced.
    log::info!("recording {} cancelled during finalization", ticket.id());
    muxer.cancel();
    LaneExit::Cancelled
}

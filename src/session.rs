//! The capture stage machine: stage sequencing, the hold/confirmation
//! protocol, countdowns, and the feedback stream.
//!
//! The machine itself is synchronous. The engine delivers frame estimates,
//! timer expiries and lifecycle completions into it, then drains the
//! published events. Timers are owned here as data (one slot, with a
//! generation counter); only the driving of their deadlines lives in the
//! engine.

use log::{debug, info};
use std::fmt;
use std::time::{Duration, Instant};

use crate::config::{CaptureConfig, TimingConfig, ValidationConfig};
use crate::error::CaptureError;
use crate::keypoint::PoseEstimate;
use crate::measure::MeasurementRecord;
use crate::validator::{self, Orientation, ValidationOutcome};

/// Stages of the guided capture sequence. Transitions are strictly
/// forward; `Error` is absorbing until an explicit retake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureStage {
    Initializing,
    FrontPrompt,
    DetectingFront,
    SidePrompt,
    DetectingSide,
    Done,
    Error,
}

impl CaptureStage {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error)
    }

    /// The orientation this stage validates against, if it is a detection
    /// stage.
    pub fn orientation(&self) -> Option<Orientation> {
        match self {
            Self::DetectingFront => Some(Orientation::Front),
            Self::DetectingSide => Some(Orientation::Side),
            _ => None,
        }
    }
}

impl fmt::Display for CaptureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initializing => "Initializing",
            Self::FrontPrompt => "Front Prompt",
            Self::DetectingFront => "Detecting Front",
            Self::SidePrompt => "Side Prompt",
            Self::DetectingSide => "Detecting Side",
            Self::Done => "Done",
            Self::Error => "Error",
        };
        write!(f, "{}", name)
    }
}

/// Events published to the navigation shell and live UI.
#[derive(Debug, Clone)]
pub enum CaptureEvent {
    StageChanged(CaptureStage),
    Feedback(String),
    /// Seconds remaining in the visible countdown; `None` clears it.
    Countdown(Option<u32>),
    /// Both poses captured and the measurement record assembled.
    Complete(MeasurementRecord),
    /// No stored height; the user must go back to height entry.
    NeedHeight,
    Failed(CaptureError),
}

/// Follow-up work the engine owes the machine after an event lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionSignal {
    /// Both poses captured: assemble the measurement record now.
    Synthesize,
    /// The success delay elapsed: hand the pending record over.
    DeliverResult,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimerKind {
    /// Dwell in a prompt stage before detection starts.
    PromptDwell,
    /// The pose must hold this long before the countdown begins.
    Confirmation,
    CountdownTick { remaining: u32 },
    /// Pause between the success message and the result handoff.
    SuccessDelay,
}

#[derive(Debug, Clone, Copy)]
struct ArmedTimer {
    kind: TimerKind,
    deadline: Instant,
    generation: u64,
}

/// The authoritative capture session state.
///
/// A single timer slot carries whichever delay is in flight, which is also
/// what enforces the invariant that the confirmation delay, the countdown
/// and active frame validation are mutually exclusive. Stale expiries are
/// rejected by generation; stale async completions (a model load finishing
/// after a retake) are rejected by epoch.
pub struct CaptureSession {
    stage: CaptureStage,
    pose_valid: bool,
    stream_ready: bool,
    model_ready: bool,
    epoch: u64,
    next_generation: u64,
    armed: Option<ArmedTimer>,
    fault: Option<CaptureError>,
    timing: TimingConfig,
    validation: ValidationConfig,
    updates: Vec<CaptureEvent>,
}

impl CaptureSession {
    pub fn new(config: &CaptureConfig) -> Self {
        let mut session = Self {
            stage: CaptureStage::Initializing,
            pose_valid: false,
            stream_ready: false,
            model_ready: false,
            epoch: 0,
            next_generation: 0,
            armed: None,
            fault: None,
            timing: config.timing.clone(),
            validation: config.validation.clone(),
            updates: Vec::new(),
        };
        session.push_feedback("Requesting camera access...");
        session
    }

    pub fn stage(&self) -> CaptureStage {
        self.stage
    }

    pub fn fault(&self) -> Option<&CaptureError> {
        self.fault.as_ref()
    }

    /// Bumped on every reset; async completions started before the bump
    /// must be discarded.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn timer_pending(&self) -> bool {
        self.armed.is_some()
    }

    /// Whether the scheduler should run inference this tick.
    pub fn detection_active(&self) -> bool {
        self.armed.is_none()
            && self.stream_ready
            && self.model_ready
            && self.stage.orientation().is_some()
    }

    /// Deadline of the armed timer plus the generation the engine must
    /// echo back into [`timer_fired`](Self::timer_fired).
    pub fn next_deadline(&self) -> Option<(Instant, u64)> {
        self.armed.map(|t| (t.deadline, t.generation))
    }

    /// The camera stream is up and bound to the display surface.
    pub fn stream_attached(&mut self) {
        if self.stage != CaptureStage::Initializing {
            return;
        }
        self.stream_ready = true;
        self.set_stage(CaptureStage::FrontPrompt);
        self.push_feedback("Camera ready. Prepare for FRONT pose.");
        self.arm(TimerKind::PromptDwell, self.timing.prompt_dwell());
    }

    pub fn stream_failed(&mut self, error: CaptureError) {
        self.fail(error);
    }

    pub fn model_loading(&mut self) {
        self.push_feedback("Loading pose detection model...");
    }

    /// Returns false when the completion belongs to a superseded session
    /// and the caller must dispose the freshly loaded model.
    pub fn model_loaded(&mut self, epoch: u64) -> bool {
        if epoch != self.epoch || self.stage == CaptureStage::Error {
            debug!("Ignoring stale model load (epoch {} != {})", epoch, self.epoch);
            return false;
        }
        self.model_ready = true;
        self.push_feedback("Model loaded. Position for FRONT pose.");
        true
    }

    pub fn model_failed(&mut self, epoch: u64, error: CaptureError) {
        if epoch != self.epoch {
            debug!("Ignoring stale model failure (epoch {} != {})", epoch, self.epoch);
            return;
        }
        self.fail(error);
    }

    /// Force the terminal error stage: all timers stop, detection stops,
    /// and only a retake gets the session moving again.
    pub fn fail(&mut self, error: CaptureError) {
        if self.stage == CaptureStage::Error {
            return;
        }
        self.cancel_timer();
        self.pose_valid = false;
        self.push(CaptureEvent::Countdown(None));
        self.set_stage(CaptureStage::Error);
        self.push(CaptureEvent::Failed(error.clone()));
        self.fault = Some(error);
    }

    /// Per-frame validator result handling. Frames are ignored outside the
    /// detection stages and while any timer is pending.
    pub fn handle_estimate(&mut self, estimate: Option<PoseEstimate>) {
        let Some(target) = self.stage.orientation() else {
            return;
        };
        if self.armed.is_some() {
            return;
        }

        match validator::validate_pose(estimate.as_ref(), target, &self.validation) {
            ValidationOutcome::Valid => {
                if !self.pose_valid {
                    self.pose_valid = true;
                    self.push_feedback("Good Pose! Hold Still...");
                    self.arm(TimerKind::Confirmation, self.timing.confirmation_delay());
                }
                // Already holding: the confirmation timer is in flight.
            }
            ValidationOutcome::Invalid(reason) => {
                self.pose_valid = false;
                self.cancel_timer();
                self.push_feedback(reason.message());
            }
        }
    }

    /// Timer expiry delivered by the engine. A generation that does not
    /// match the armed timer is a cancelled timer's echo and does nothing.
    pub fn timer_fired(&mut self, generation: u64) -> Option<SessionSignal> {
        let timer = self.armed?;
        if timer.generation != generation {
            debug!(
                "Ignoring stale timer expiry (generation {} != {})",
                generation, timer.generation
            );
            return None;
        }
        self.armed = None;

        match timer.kind {
            TimerKind::PromptDwell => {
                match self.stage {
                    CaptureStage::FrontPrompt => self.set_stage(CaptureStage::DetectingFront),
                    CaptureStage::SidePrompt => self.set_stage(CaptureStage::DetectingSide),
                    _ => {}
                }
                None
            }
            TimerKind::Confirmation => {
                let remaining = self.timing.countdown_seconds;
                if remaining == 0 {
                    return self.finish_countdown();
                }
                self.push(CaptureEvent::Countdown(Some(remaining)));
                self.push_feedback(format!("Hold Pose: {}", remaining));
                self.arm(
                    TimerKind::CountdownTick { remaining },
                    Duration::from_secs(1),
                );
                None
            }
            TimerKind::CountdownTick { remaining } => {
                let next = remaining.saturating_sub(1);
                if next == 0 {
                    return self.finish_countdown();
                }
                self.push(CaptureEvent::Countdown(Some(next)));
                self.push_feedback(format!("Hold Pose: {}", next));
                self.arm(
                    TimerKind::CountdownTick { remaining: next },
                    Duration::from_secs(1),
                );
                None
            }
            TimerKind::SuccessDelay => Some(SessionSignal::DeliverResult),
        }
    }

    /// Countdown ran to zero: advance past the captured pose.
    fn finish_countdown(&mut self) -> Option<SessionSignal> {
        self.push(CaptureEvent::Countdown(None));
        self.pose_valid = false;

        match self.stage {
            CaptureStage::DetectingFront => {
                self.push_feedback("Front pose captured! Prepare for SIDE pose.");
                self.set_stage(CaptureStage::SidePrompt);
                self.arm(TimerKind::PromptDwell, self.timing.prompt_dwell());
                None
            }
            CaptureStage::DetectingSide => {
                self.push_feedback("Side pose captured! Processing...");
                self.set_stage(CaptureStage::Done);
                Some(SessionSignal::Synthesize)
            }
            _ => None,
        }
    }

    /// The engine assembled the measurement record; show the success
    /// message, then deliver after a short pause.
    pub fn result_ready(&mut self) {
        if self.stage != CaptureStage::Done {
            return;
        }
        self.push_feedback("Poses captured successfully!");
        self.arm(TimerKind::SuccessDelay, self.timing.success_delay());
    }

    /// Retake: cancel everything and return to the initial stage. The
    /// epoch bump invalidates every completion issued before this point.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.cancel_timer();
        self.pose_valid = false;
        self.stream_ready = false;
        self.model_ready = false;
        self.fault = None;
        self.push(CaptureEvent::Countdown(None));
        self.set_stage(CaptureStage::Initializing);
        self.push_feedback("Requesting camera access...");
    }

    /// Drain the events published since the last drain.
    pub fn take_updates(&mut self) -> Vec<CaptureEvent> {
        std::mem::take(&mut self.updates)
    }

    fn set_stage(&mut self, stage: CaptureStage) {
        if self.stage == stage {
            return;
        }
        info!("Capture stage: {} -> {}", self.stage, stage);
        self.stage = stage;
        self.push(CaptureEvent::StageChanged(stage));
    }

    fn arm(&mut self, kind: TimerKind, delay: Duration) {
        self.next_generation += 1;
        self.armed = Some(ArmedTimer {
            kind,
            deadline: Instant::now() + delay,
            generation: self.next_generation,
        });
    }

    fn cancel_timer(&mut self) {
        self.armed = None;
    }

    fn push_feedback(&mut self, message: impl Into<String>) {
        self.push(CaptureEvent::Feedback(message.into()));
    }

    fn push(&mut self, event: CaptureEvent) {
        self.updates.push(event);
    }
}

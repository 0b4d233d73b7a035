//! The asynchronous driver: owns the camera and model lifecycles, runs the
//! per-frame detection loop, and feeds timer expiries into the stage
//! machine. Single-threaded: frame processing and timer handling are
//! serialized on one task, so at most one inference call is ever in
//! flight.

use anyhow::Result;
use log::{debug, error, info, warn};
use opencv::{core::Mat, imgproc, prelude::*};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use crate::camera::Camera;
use crate::config::CaptureConfig;
use crate::error::{CaptureError, MeasureError};
use crate::measure::{MeasurementRecord, MeasurementTable, ResultSynthesizer};
use crate::model::PoseModel;
use crate::session::{CaptureEvent, CaptureSession, CaptureStage, SessionSignal};
use crate::storage;

/// One RGB frame for the preview surface.
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub rgb_data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EngineCommand {
    Retake,
    Shutdown,
}

/// Control surface handed to the navigation shell.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    commands: mpsc::UnboundedSender<EngineCommand>,
}

impl EngineHandle {
    pub fn retake(&self) {
        let _ = self.commands.send(EngineCommand::Retake);
    }

    pub fn shutdown(&self) {
        let _ = self.commands.send(EngineCommand::Shutdown);
    }
}

enum Wakeup {
    Command(Option<EngineCommand>),
    LoadFinished(u64, std::result::Result<PoseModel, CaptureError>),
    Timer(u64),
    Tick,
}

pub struct CaptureEngine {
    config: CaptureConfig,
    session: CaptureSession,
    camera: Option<Camera>,
    model: Option<PoseModel>,
    model_load: Option<(u64, JoinHandle<std::result::Result<PoseModel, CaptureError>>)>,
    synthesizer: ResultSynthesizer,
    pending_record: Option<MeasurementRecord>,
    events: mpsc::UnboundedSender<CaptureEvent>,
    commands: mpsc::UnboundedReceiver<EngineCommand>,
    preview: Option<mpsc::Sender<PreviewFrame>>,
}

impl CaptureEngine {
    /// Build an engine, loading the measurement table from its configured
    /// or standard location.
    pub fn new(
        config: CaptureConfig,
    ) -> Result<(Self, EngineHandle, mpsc::UnboundedReceiver<CaptureEvent>)> {
        let table = MeasurementTable::load_default(&config.data)?;
        Ok(Self::with_table(config, table))
    }

    pub fn with_table(
        config: CaptureConfig,
        table: MeasurementTable,
    ) -> (Self, EngineHandle, mpsc::UnboundedReceiver<CaptureEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        let engine = Self {
            session: CaptureSession::new(&config),
            config,
            camera: None,
            model: None,
            model_load: None,
            synthesizer: ResultSynthesizer::new(table),
            pending_record: None,
            events: events_tx,
            commands: commands_rx,
            preview: None,
        };
        let handle = EngineHandle { commands: commands_tx };

        (engine, handle, events_rx)
    }

    /// Attach a preview sink. Frames are dropped when the sink is full; a
    /// closed sink mid-session is a display failure.
    pub fn attach_preview(&mut self, capacity: usize) -> mpsc::Receiver<PreviewFrame> {
        let (tx, rx) = mpsc::channel(capacity);
        self.preview = Some(tx);
        rx
    }

    /// Drive the capture session to completion. Runs until shutdown or
    /// until the control handle is dropped.
    pub async fn run(mut self) {
        self.start_session();
        self.flush();

        let mut ticker = time::interval(self.config.timing.frame_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.session.next_deadline();
            let sleep_target = time::Instant::from_std(
                deadline
                    .map(|(at, _)| at)
                    .unwrap_or_else(std::time::Instant::now),
            );

            let wakeup = tokio::select! {
                biased;
                command = self.commands.recv() => Wakeup::Command(command),
                (epoch, result) = await_load(&mut self.model_load), if self.model_load.is_some() => {
                    Wakeup::LoadFinished(epoch, result)
                }
                _ = time::sleep_until(sleep_target), if deadline.is_some() => {
                    Wakeup::Timer(deadline.map(|(_, generation)| generation).unwrap_or(0))
                }
                _ = ticker.tick() => Wakeup::Tick,
            };

            match wakeup {
                Wakeup::Command(Some(EngineCommand::Retake)) => self.retake(),
                Wakeup::Command(Some(EngineCommand::Shutdown)) | Wakeup::Command(None) => break,
                Wakeup::LoadFinished(epoch, result) => self.finish_model_load(epoch, result),
                Wakeup::Timer(generation) => {
                    if let Some(signal) = self.session.timer_fired(generation) {
                        self.on_signal(signal);
                    }
                }
                Wakeup::Tick => self.on_tick(),
            }

            // The error stage keeps no hardware: the stream and the model
            // are released immediately, not when the engine exits.
            if self.session.stage() == CaptureStage::Error {
                self.release_resources();
            }

            self.flush();
        }

        self.teardown();
    }

    /// Acquire the camera and kick off the model load. Called at startup
    /// and again on every retake.
    fn start_session(&mut self) {
        match Camera::acquire(&self.config.camera) {
            Ok(camera) => {
                info!("Camera acquired: {}", camera.info().name);
                self.camera = Some(camera);
                self.session.stream_attached();
                self.begin_model_load();
            }
            Err(err) => {
                error!("Camera acquisition failed: {}", err);
                self.session.stream_failed(err);
            }
        }
    }

    /// At most one load may be in flight; repeated triggers are no-ops.
    fn begin_model_load(&mut self) {
        if self.model.is_some() || self.model_load.is_some() {
            return;
        }
        self.session.model_loading();

        let epoch = self.session.epoch();
        let model_config = self.config.model.clone();
        let handle = tokio::task::spawn_blocking(move || PoseModel::load(&model_config));
        self.model_load = Some((epoch, handle));
    }

    fn finish_model_load(
        &mut self,
        epoch: u64,
        result: std::result::Result<PoseModel, CaptureError>,
    ) {
        self.model_load = None;
        match result {
            Ok(mut model) => {
                if self.session.model_loaded(epoch) {
                    self.model = Some(model);
                } else {
                    // Finished after a retake superseded it.
                    model.dispose();
                }
            }
            Err(err) => {
                error!("Model load failed: {}", err);
                self.session.model_failed(epoch, err);
            }
        }
    }

    /// One scheduler tick: pump the preview, and run inference only while
    /// the session says detection is active.
    fn on_tick(&mut self) {
        if self.session.stage().is_terminal() {
            return;
        }
        let Some(camera) = self.camera.as_mut() else {
            return;
        };

        let frame = match camera.read_frame() {
            Ok(frame) => frame,
            Err(err) => {
                debug!("Frame capture failed: {}", err);
                return;
            }
        };

        self.push_preview(&frame);

        if !self.session.detection_active() {
            return;
        }
        let Some(model) = self.model.as_mut() else {
            return;
        };

        // Inference is best effort: a failed tick counts as no detection.
        let estimate = match model.estimate(&frame) {
            Ok(estimate) => estimate,
            Err(err) => {
                warn!("Pose inference failed: {}", err);
                None
            }
        };

        self.session.handle_estimate(estimate);
    }

    fn push_preview(&mut self, frame: &Mat) {
        let Some(sink) = self.preview.clone() else {
            return;
        };

        let preview = match to_preview_frame(frame) {
            Ok(preview) => preview,
            Err(err) => {
                debug!("Preview conversion failed: {}", err);
                return;
            }
        };

        match sink.try_send(preview) {
            Ok(()) => {}
            // Slow consumer: skip the frame, the next tick brings another.
            Err(mpsc::error::TrySendError::Full(_)) => {}
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.preview = None;
                if !self.session.stage().is_terminal() {
                    self.session.fail(CaptureError::DisplayError(
                        "preview surface closed".to_string(),
                    ));
                }
            }
        }
    }

    fn on_signal(&mut self, signal: SessionSignal) {
        match signal {
            SessionSignal::Synthesize => {
                let height = storage::stored_height();
                match self.synthesizer.synthesize(height) {
                    Ok(record) => {
                        self.pending_record = Some(record);
                        self.session.result_ready();
                    }
                    Err(MeasureError::MissingHeight) => {
                        warn!("No stored height; redirecting to height entry");
                        let _ = self.events.send(CaptureEvent::NeedHeight);
                    }
                    Err(err) => {
                        error!("Result synthesis failed: {}", err);
                        self.session.fail(CaptureError::Unknown(err.to_string()));
                    }
                }
            }
            SessionSignal::DeliverResult => {
                if let Some(record) = self.pending_record.take() {
                    let _ = self.events.send(CaptureEvent::Complete(record));
                }
            }
        }
    }

    /// Tear everything down and start the session over from the top.
    fn retake(&mut self) {
        info!("Retake requested");
        self.release_resources();
        self.pending_record = None;
        self.session.reset();
        self.flush();
        self.start_session();
    }

    fn release_resources(&mut self) {
        if let Some((_, handle)) = self.model_load.take() {
            handle.abort();
        }
        if let Some(mut model) = self.model.take() {
            model.dispose();
        }
        if let Some(mut camera) = self.camera.take() {
            camera.release();
        }
    }

    fn teardown(&mut self) {
        debug!("Capture engine shutting down");
        self.release_resources();
        self.flush();
    }

    fn flush(&mut self) {
        for event in self.session.take_updates() {
            if self.events.send(event).is_err() {
                // Receiver gone; nothing left to notify.
                break;
            }
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.release_resources();
    }
}

async fn await_load(
    slot: &mut Option<(u64, JoinHandle<std::result::Result<PoseModel, CaptureError>>)>,
) -> (u64, std::result::Result<PoseModel, CaptureError>) {
    match slot {
        Some((epoch, handle)) => {
            let epoch = *epoch;
            let result = match handle.await {
                Ok(result) => result,
                Err(err) if err.is_cancelled() => {
                    Err(CaptureError::ModelLoadFailed("model load cancelled".to_string()))
                }
                Err(err) => Err(CaptureError::ModelLoadFailed(format!(
                    "model load task failed: {}",
                    err
                ))),
            };
            (epoch, result)
        }
        // Disabled by the select guard; never polled without a load.
        None => std::future::pending().await,
    }
}

fn to_preview_frame(frame: &Mat) -> Result<PreviewFrame> {
    let mut rgb = Mat::default();
    imgproc::cvt_color(frame, &mut rgb, imgproc::COLOR_BGR2RGB, 0)?;

    let width = rgb.cols() as u32;
    let height = rgb.rows() as u32;
    let rgb_data = rgb.data_bytes()?.to_vec();

    Ok(PreviewFrame {
        rgb_data,
        width,
        height,
    })
}

pub mod camera;
pub mod config;
pub mod engine;
pub mod error;
pub mod keypoint;
pub mod measure;
pub mod model;
pub mod session;
pub mod storage;
pub mod validator;

pub use camera::{Camera, CameraFacing, CameraInfo};
pub use config::CaptureConfig;
pub use engine::{CaptureEngine, EngineHandle, PreviewFrame};
pub use error::{CaptureError, InferenceError, MeasureError};
pub use keypoint::{Keypoint, KeypointIndex, PoseEstimate};
pub use measure::{MeasurementRecord, MeasurementTable, MeasurementValue, ResultSynthesizer};
pub use model::PoseModel;
pub use session::{CaptureEvent, CaptureSession, CaptureStage, SessionSignal};
pub use validator::{validate_pose, InvalidReason, Orientation, ValidationOutcome};

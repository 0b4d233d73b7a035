use thiserror::Error;

/// Fatal session failures. Any of these forces the capture stage machine
/// into its terminal error stage; recovery requires an explicit retake.
#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Camera permission denied.")]
    PermissionDenied,

    #[error("No suitable camera found.")]
    DeviceNotFound,

    #[error("Camera already in use.")]
    DeviceBusy,

    #[error("Camera access is not allowed from this context.")]
    InsecureContext,

    #[error("Failed to load pose detection model: {0}")]
    ModelLoadFailed(String),

    #[error("Video display error: {0}")]
    DisplayError(String),

    #[error("Could not access camera: {0}")]
    Unknown(String),
}

/// Per-frame inference failure. These are logged and treated as "no pose
/// detected" for the tick; they never stop the detection loop.
#[derive(Debug, Clone, Error)]
#[error("pose inference failed: {0}")]
pub struct InferenceError(pub String);

/// Failures of the result synthesis step. `MissingHeight` is recoverable
/// (the user is sent back to height entry) and is deliberately not a
/// `CaptureError`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MeasureError {
    #[error("no stored height available")]
    MissingHeight,

    #[error("measurement table has no height entries")]
    EmptyTable,
}

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub data: DataConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    /// Prefer an external (environment-facing) device over a built-in one.
    #[serde(default = "default_prefer_external")]
    pub prefer_external: bool,
    /// Pin a specific /dev/videoN index instead of auto-detecting.
    #[serde(default)]
    pub device_index: Option<i32>,
    #[serde(default = "default_frame_width")]
    pub frame_width: u32,
    #[serde(default = "default_frame_height")]
    pub frame_height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Explicit path to the MoveNet ONNX file. When unset the standard
    /// model directories are searched.
    #[serde(default)]
    pub model_path: Option<PathBuf>,
    #[serde(default = "default_input_size")]
    pub input_size: i32,
    /// A frame with no keypoint above this score counts as "nobody tracked".
    #[serde(default = "default_presence_score")]
    pub presence_score: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    #[serde(default = "default_min_keypoint_score")]
    pub min_keypoint_score: f32,
    /// Below this shoulder span (pixels) a subject cannot read as front-facing.
    #[serde(default = "default_min_shoulder_width")]
    pub min_shoulder_width: f32,
    #[serde(default = "default_front_ratio")]
    pub front_ratio: f32,
    #[serde(default = "default_side_ratio")]
    pub side_ratio: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    /// Dwell in the prompt stages before detection begins.
    #[serde(default = "default_prompt_dwell_ms")]
    pub prompt_dwell_ms: u64,
    /// How long a pose must stay valid before the countdown starts.
    #[serde(default = "default_confirmation_delay_ms")]
    pub confirmation_delay_ms: u64,
    #[serde(default = "default_countdown_seconds")]
    pub countdown_seconds: u32,
    /// Pause between the success message and the result handoff.
    #[serde(default = "default_success_delay_ms")]
    pub success_delay_ms: u64,
    #[serde(default = "default_frame_interval_ms")]
    pub frame_interval_ms: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    /// Explicit path to the measurement table JSON. When unset the standard
    /// data directories are searched.
    #[serde(default)]
    pub table_path: Option<PathBuf>,
}

fn default_prefer_external() -> bool { true }
fn default_frame_width() -> u32 { 640 }
fn default_frame_height() -> u32 { 480 }
fn default_fps() -> u32 { 30 }
fn default_input_size() -> i32 { 192 }
fn default_presence_score() -> f32 { 0.2 }
fn default_min_keypoint_score() -> f32 { 0.3 }
fn default_min_shoulder_width() -> f32 { 50.0 }
fn default_front_ratio() -> f32 { 0.8 }
fn default_side_ratio() -> f32 { 0.7 }
fn default_prompt_dwell_ms() -> u64 { 1500 }
fn default_confirmation_delay_ms() -> u64 { 1500 }
fn default_countdown_seconds() -> u32 { 5 }
fn default_success_delay_ms() -> u64 { 1500 }
fn default_frame_interval_ms() -> u64 { 33 }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            prefer_external: default_prefer_external(),
            device_index: None,
            frame_width: default_frame_width(),
            frame_height: default_frame_height(),
            fps: default_fps(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: None,
            input_size: default_input_size(),
            presence_score: default_presence_score(),
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_keypoint_score: default_min_keypoint_score(),
            min_shoulder_width: default_min_shoulder_width(),
            front_ratio: default_front_ratio(),
            side_ratio: default_side_ratio(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            prompt_dwell_ms: default_prompt_dwell_ms(),
            confirmation_delay_ms: default_confirmation_delay_ms(),
            countdown_seconds: default_countdown_seconds(),
            success_delay_ms: default_success_delay_ms(),
            frame_interval_ms: default_frame_interval_ms(),
        }
    }
}

impl TimingConfig {
    pub fn prompt_dwell(&self) -> Duration {
        Duration::from_millis(self.prompt_dwell_ms)
    }

    pub fn confirmation_delay(&self) -> Duration {
        Duration::from_millis(self.confirmation_delay_ms)
    }

    pub fn success_delay(&self) -> Duration {
        Duration::from_millis(self.success_delay_ms)
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl CaptureConfig {
    /// Load from a JSON file, falling back to defaults when the file does
    /// not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: CaptureConfig = serde_json::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Default on-disk location of the user config.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .map(|p| p.join("stature").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    }
}

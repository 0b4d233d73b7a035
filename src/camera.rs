use anyhow::Result;
use log::{debug, info, warn};
use opencv::{
    core::Mat,
    prelude::*,
    videoio::{self, VideoCapture},
};
use std::fs::OpenOptions;
use std::io;
use std::path::Path;

use crate::config::CameraConfig;
use crate::error::CaptureError;

/// Which way a detected device points, inferred from its advertised name.
/// The capture flow wants an environment-facing view of the whole body, so
/// external devices are preferred over laptop-lid cameras.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CameraFacing {
    External,
    Integrated,
    Unknown,
}

#[derive(Debug, Clone)]
pub struct CameraInfo {
    pub device_id: i32,
    pub device_path: String,
    pub name: String,
    pub facing: CameraFacing,
}

/// An acquired live video source. Exactly one may be active per session;
/// the engine releases any previous instance before acquiring a new one.
pub struct Camera {
    capture: VideoCapture,
    info: CameraInfo,
    width: u32,
    height: u32,
    released: bool,
}

impl Camera {
    /// Acquire a video stream according to the configured preference.
    /// Failures are classified into the session error taxonomy.
    pub fn acquire(config: &CameraConfig) -> Result<Self, CaptureError> {
        let mut cameras = detect_cameras();

        if let Some(index) = config.device_index {
            cameras.retain(|c| c.device_id == index);
        }

        if cameras.is_empty() {
            return Err(CaptureError::DeviceNotFound);
        }

        if config.prefer_external {
            let mut ordered: Vec<CameraInfo> = cameras
                .iter()
                .filter(|c| c.facing == CameraFacing::External)
                .cloned()
                .collect();
            ordered.extend(cameras.iter().filter(|c| c.facing == CameraFacing::Unknown).cloned());
            ordered.extend(cameras.iter().filter(|c| c.facing == CameraFacing::Integrated).cloned());
            cameras = ordered;
        }

        let mut last_error: Option<CaptureError> = None;
        for candidate in &cameras {
            info!("Trying camera video{}: {}", candidate.device_id, candidate.name);

            // Probe the device node first; the raw errno is the only place
            // the access-failure class is visible.
            if let Err(err) = probe_device(&candidate.device_path) {
                let classified = classify_probe_error(&err);
                warn!(
                    "Cannot open {}: {} ({})",
                    candidate.device_path, err, classified
                );
                last_error = Some(classified);
                continue;
            }

            match open_capture(candidate, config) {
                Ok(camera) => {
                    info!(
                        "Acquired camera video{} at {}x{}",
                        candidate.device_id, camera.width, camera.height
                    );
                    return Ok(camera);
                }
                Err(err) => {
                    warn!("Camera video{} failed to start: {}", candidate.device_id, err);
                    last_error = Some(err);
                }
            }
        }

        Err(last_error.unwrap_or(CaptureError::DeviceNotFound))
    }

    pub fn info(&self) -> &CameraInfo {
        &self.info
    }

    pub fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Read the next frame (BGR). Mid-session failures are transient; the
    /// caller skips the tick and tries again.
    pub fn read_frame(&mut self) -> Result<Mat> {
        let mut frame = Mat::default();
        self.capture.read(&mut frame)?;

        if frame.empty() {
            anyhow::bail!("Empty frame captured");
        }

        Ok(frame)
    }

    /// Stop the underlying stream. Safe to call repeatedly.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        let _ = self.capture.release();
        info!("Camera video{} released", self.info.device_id);
    }
}

impl Drop for Camera {
    fn drop(&mut self) {
        self.release();
    }
}

fn open_capture(info: &CameraInfo, config: &CameraConfig) -> Result<Camera, CaptureError> {
    let mut capture = VideoCapture::new(info.device_id, videoio::CAP_V4L2)
        .map_err(|e| CaptureError::Unknown(e.to_string()))?;

    if !capture.is_opened().unwrap_or(false) {
        let _ = capture.release();
        return Err(CaptureError::Unknown(format!(
            "camera {} did not open",
            info.device_path
        )));
    }

    let _ = capture.set(videoio::CAP_PROP_FRAME_WIDTH, config.frame_width as f64);
    let _ = capture.set(videoio::CAP_PROP_FRAME_HEIGHT, config.frame_height as f64);
    let _ = capture.set(videoio::CAP_PROP_FPS, config.fps as f64);
    let _ = capture.set(videoio::CAP_PROP_BUFFERSIZE, 1.0);

    // Verify the device actually delivers frames before reporting success.
    let mut test_frame = Mat::default();
    let readable = capture.read(&mut test_frame).unwrap_or(false) && !test_frame.empty();
    if !readable {
        let _ = capture.release();
        return Err(CaptureError::Unknown(format!(
            "camera {} opened but produced no frames",
            info.device_path
        )));
    }

    let width = capture
        .get(videoio::CAP_PROP_FRAME_WIDTH)
        .unwrap_or(config.frame_width as f64) as u32;
    let height = capture
        .get(videoio::CAP_PROP_FRAME_HEIGHT)
        .unwrap_or(config.frame_height as f64) as u32;

    Ok(Camera {
        capture,
        info: info.clone(),
        width,
        height,
        released: false,
    })
}

/// Enumerate V4L2 capture devices through sysfs, skipping metadata nodes.
fn detect_cameras() -> Vec<CameraInfo> {
    let mut cameras = Vec::new();

    let video_dir = Path::new("/sys/class/video4linux");
    if !video_dir.exists() {
        return cameras;
    }

    if let Ok(entries) = std::fs::read_dir(video_dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();

            let Some(device_id) = name
                .strip_prefix("video")
                .and_then(|s| s.parse::<i32>().ok())
            else {
                continue;
            };

            // Index 0 is the capture stream; higher indices are metadata
            // companions that open but never produce frames.
            let index_path = entry.path().join("index");
            if let Ok(index_str) = std::fs::read_to_string(&index_path) {
                if index_str.trim().parse::<i32>().unwrap_or(0) != 0 {
                    debug!("Skipping video{} (metadata node)", device_id);
                    continue;
                }
            }

            let name_path = entry.path().join("name");
            let camera_name = std::fs::read_to_string(name_path)
                .map(|s| s.trim().to_string())
                .unwrap_or_else(|_| format!("Camera {}", device_id));

            cameras.push(CameraInfo {
                device_id,
                device_path: format!("/dev/video{}", device_id),
                name: camera_name.clone(),
                facing: classify_facing(&camera_name),
            });
        }
    }

    cameras.sort_by_key(|c| c.device_id);

    info!("Detected {} camera(s)", cameras.len());
    for cam in &cameras {
        debug!("  video{}: {} ({:?})", cam.device_id, cam.name, cam.facing);
    }

    cameras
}

fn classify_facing(name: &str) -> CameraFacing {
    let name_lower = name.to_lowercase();

    let external_keywords = ["usb", "external", "rear", "back", "webcam"];
    for keyword in &external_keywords {
        if name_lower.contains(keyword) {
            return CameraFacing::External;
        }
    }

    let integrated_keywords = ["integrated", "built-in", "internal", "laptop"];
    for keyword in &integrated_keywords {
        if name_lower.contains(keyword) {
            return CameraFacing::Integrated;
        }
    }

    CameraFacing::Unknown
}

fn probe_device(path: &str) -> io::Result<()> {
    OpenOptions::new().read(true).open(path).map(|_| ())
}

/// Map a device-node open failure onto the session error taxonomy.
fn classify_probe_error(err: &io::Error) -> CaptureError {
    match err.raw_os_error() {
        Some(code) if code == libc::EACCES => CaptureError::PermissionDenied,
        Some(code) if code == libc::EBUSY => CaptureError::DeviceBusy,
        Some(code) if code == libc::EPERM => CaptureError::InsecureContext,
        Some(code) if code == libc::ENOENT => CaptureError::DeviceNotFound,
        _ => CaptureError::Unknown(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_facing() {
        assert_eq!(classify_facing("USB 2.0 Camera"), CameraFacing::External);
        assert_eq!(classify_facing("Rear camera"), CameraFacing::External);
        assert_eq!(
            classify_facing("Integrated Camera: Integrated C"),
            CameraFacing::Integrated
        );
        assert_eq!(classify_facing("mmal service 16.1"), CameraFacing::Unknown);
    }

    #[test]
    fn test_classify_probe_error() {
        let denied = io::Error::from_raw_os_error(libc::EACCES);
        assert!(matches!(
            classify_probe_error(&denied),
            CaptureError::PermissionDenied
        ));

        let busy = io::Error::from_raw_os_error(libc::EBUSY);
        assert!(matches!(classify_probe_error(&busy), CaptureError::DeviceBusy));

        let walled = io::Error::from_raw_os_error(libc::EPERM);
        assert!(matches!(
            classify_probe_error(&walled),
            CaptureError::InsecureContext
        ));

        let gone = io::Error::from_raw_os_error(libc::ENOENT);
        assert!(matches!(
            classify_probe_error(&gone),
            CaptureError::DeviceNotFound
        ));

        let other = io::Error::new(io::ErrorKind::Other, "boom");
        assert!(matches!(classify_probe_error(&other), CaptureError::Unknown(_)));
    }

    #[test]
    fn test_release_is_idempotent() {
        let capture = VideoCapture::default().unwrap();
        let mut camera = Camera {
            capture,
            info: CameraInfo {
                device_id: 0,
                device_path: "/dev/video0".to_string(),
                name: "test".to_string(),
                facing: CameraFacing::Unknown,
            },
            width: 640,
            height: 480,
            released: false,
        };

        camera.release();
        camera.release();
        assert!(camera.released);
    }
}
